//! Nuclei template dialect executor: validates the template body as
//! YAML, re-serializes it to a temp file, and shells out to an external
//! `nuclei` binary.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use stellar_core::{Dialect, Error, Poc, PocResult, PocTarget, Result};
use tokio::process::Command;
use tokio::time::timeout;

use super::PocExecutor;

const DEADLINE: Duration = Duration::from_secs(60);
const VALID_SEVERITIES: &[&str] = &["info", "low", "medium", "high", "critical"];
const FORBIDDEN_TOKENS: &[&str] = &["file://", "${", "<%", "{{file", "{{exec"];

#[derive(Debug, Deserialize)]
struct NucleiInfo {
    name: String,
    #[serde(default)]
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NucleiRequest {
    #[serde(default)]
    path: Option<Vec<String>>,
    #[serde(default)]
    matchers: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct NucleiTemplate {
    info: NucleiInfo,
    #[serde(default)]
    requests: Vec<NucleiRequest>,
    #[serde(default, rename = "http")]
    http_requests: Vec<NucleiRequest>,
}

pub struct NucleiExecutor;

impl NucleiExecutor {
    pub fn new() -> Self {
        Self
    }

    fn check_forbidden(script: &str) -> Result<()> {
        for token in FORBIDDEN_TOKENS {
            if script.contains(token) {
                return Err(Error::InvalidInput(format!(
                    "nuclei template contains forbidden token: {token}"
                )));
            }
        }
        Ok(())
    }

    fn parse_template(script: &str) -> Result<NucleiTemplate> {
        let template: NucleiTemplate = serde_yaml::from_str(script)
            .map_err(|e| Error::InvalidInput(format!("invalid nuclei template yaml: {e}")))?;

        if template.info.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "nuclei template missing info.name".to_string(),
            ));
        }

        let requests: Vec<&NucleiRequest> = template
            .requests
            .iter()
            .chain(template.http_requests.iter())
            .collect();
        if requests.is_empty() {
            return Err(Error::InvalidInput(
                "nuclei template must declare at least one request".to_string(),
            ));
        }
        for request in &requests {
            let has_path = request.path.as_ref().is_some_and(|p| !p.is_empty());
            if !has_path {
                return Err(Error::InvalidInput(
                    "nuclei template request missing path".to_string(),
                ));
            }
            let has_matchers = request.matchers.as_ref().is_some_and(|m| !m.is_empty());
            if !has_matchers {
                return Err(Error::InvalidInput(
                    "nuclei template request missing matchers".to_string(),
                ));
            }
        }

        if let Some(severity) = &template.info.severity {
            if !VALID_SEVERITIES.contains(&severity.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "nuclei template has invalid severity: {severity}"
                )));
            }
        }

        Ok(template)
    }

    pub fn validate_template(poc: &Poc) -> Result<()> {
        Self::check_forbidden(&poc.script)?;
        Self::parse_template(&poc.script)?;
        Ok(())
    }

    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        Self::validate_template(poc)?;

        let dir = tempfile::tempdir().map_err(|e| Error::Internal(e.to_string()))?;
        let template_path = dir.path().join("template.yaml");
        tokio::fs::write(&template_path, &poc.script)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut command = Command::new("nuclei");
        command
            .arg("-target")
            .arg(&target.url)
            .arg("-t")
            .arg(&template_path)
            .arg("-json")
            .arg("-silent")
            .arg("-no-color")
            .arg("-disable-update-check");

        let output = timeout(DEADLINE, command.output())
            .await
            .map_err(|_| Error::Timeout("nuclei poc exceeded 60s deadline".to_string()))?
            .map_err(|e| Error::PluginError(format!("failed to spawn nuclei: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().find(|line| !line.trim().is_empty());

        let mut result = PocResult::new(poc.id, target.clone());
        match first_line {
            Some(line) => {
                result.success = true;
                result.output = line.to_string();
                result.response = line.to_string();
            }
            None => {
                result.success = false;
                if !output.status.success() {
                    result.error = String::from_utf8_lossy(&output.stderr).to_string();
                }
            }
        }
        Ok(result)
    }
}

impl Default for NucleiExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PocExecutor for NucleiExecutor {
    fn name(&self) -> &'static str {
        "nuclei"
    }

    fn supported_dialects(&self) -> &'static [Dialect] {
        &[Dialect::NucleiTemplate]
    }

    fn validate(&self, poc: &Poc) -> Result<()> {
        Self::validate_template(poc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stellar_core::Severity;
    use uuid::Uuid;

    fn poc(script: &str) -> Poc {
        Poc {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            script: script.to_string(),
            dialect: Dialect::NucleiTemplate,
            severity: Severity::Info,
            tags: Vec::new(),
            required_params: Vec::new(),
            default_params: BTreeMap::new(),
            enabled: true,
        }
    }

    const VALID_TEMPLATE: &str = r#"
info:
  name: example-check
  severity: medium
requests:
  - path:
      - "{{BaseURL}}/admin"
    matchers:
      - type: status
        status:
          - 200
"#;

    #[test]
    fn test_parse_template_accepts_valid_template() {
        assert!(NucleiExecutor::validate_template(&poc(VALID_TEMPLATE)).is_ok());
    }

    #[test]
    fn test_parse_template_rejects_missing_matchers() {
        let script = r#"
info:
  name: example-check
requests:
  - path:
      - "{{BaseURL}}/admin"
"#;
        assert!(NucleiExecutor::validate_template(&poc(script)).is_err());
    }

    #[test]
    fn test_parse_template_rejects_invalid_severity() {
        let script = r#"
info:
  name: example-check
  severity: catastrophic
requests:
  - path:
      - "/"
    matchers:
      - type: status
        status: [200]
"#;
        assert!(NucleiExecutor::validate_template(&poc(script)).is_err());
    }

    #[test]
    fn test_check_forbidden_rejects_file_scheme() {
        assert!(NucleiExecutor::check_forbidden("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_parse_template_rejects_empty_name() {
        let script = r#"
info:
  name: ""
requests:
  - path: ["/"]
    matchers: [{type: status, status: [200]}]
"#;
        assert!(NucleiExecutor::validate_template(&poc(script)).is_err());
    }

    #[test]
    fn test_parse_template_rejects_malformed_yaml() {
        assert!(NucleiExecutor::validate_template(&poc("not: [valid")).is_err());
    }
}
