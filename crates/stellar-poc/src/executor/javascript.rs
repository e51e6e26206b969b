//! JavaScript dialect executor: wrapper with an `https`/`http`
//! helper (TLS verification disabled), `node --check` syntax validation,
//! run under `node` with a 30s deadline.

use std::time::Duration;
use stellar_core::{Dialect, Error, Poc, PocResult, PocTarget, Result};
use tokio::process::Command;
use tokio::time::timeout;

use super::PocExecutor;
use crate::wrapper;

const DEADLINE: Duration = Duration::from_secs(30);

const BLOCKED_PATTERNS: &[&str] = &[
    "require('child_process')",
    "require(\"child_process\")",
    "eval(",
    "Function(",
    "process.exit",
    "process.kill",
    ".unlink",
    ".rmdir",
    ".mkdir",
];

pub struct JavaScriptExecutor;

impl JavaScriptExecutor {
    pub fn new() -> Self {
        Self
    }

    fn check_blocklist(script: &str) -> Result<()> {
        for pattern in BLOCKED_PATTERNS {
            if script.contains(pattern) {
                return Err(Error::InvalidInput(format!(
                    "javascript poc contains blocked construct: {pattern}"
                )));
            }
        }

        let fs_write = regex::Regex::new(r#"require\(['"]fs['"]\)[\s\S]{0,80}write"#)
            .expect("static regex is valid");
        if fs_write.is_match(script) {
            return Err(Error::InvalidInput(
                "javascript poc writes to the filesystem".to_string(),
            ));
        }

        let timer_eval = regex::Regex::new(r"set(?:Timeout|Interval)\([^)]*eval")
            .expect("static regex is valid");
        if timer_eval.is_match(script) {
            return Err(Error::InvalidInput(
                "javascript poc schedules eval via a timer".to_string(),
            ));
        }

        Ok(())
    }

    fn build_source(&self, poc: &Poc) -> String {
        format!(
            r#"const https = require('https');
const http = require('http');
const agent = new https.Agent({{ rejectUnauthorized: false }});

const result = {{
  success: false,
  payload: '',
  request: '',
  response: '',
  output: '',
  error: '',
  data: {{}},
}};

const target = {{
  url: process.env.TARGET_URL || '',
  host: process.env.TARGET_HOST || '',
  port: process.env.TARGET_PORT || '',
  scheme: process.env.TARGET_SCHEME || '',
  path: process.env.TARGET_PATH || '',
}};

function setSuccess(v) {{ result.success = !!v; }}
function setPayload(v) {{ result.payload = String(v); }}
function setRequest(v) {{ result.request = String(v); }}
function setResponse(v) {{ result.response = String(v); }}
function setOutput(v) {{ result.output = String(v); }}
function setError(v) {{ result.error = String(v); }}
function setData(k, v) {{ result.data[k] = String(v); }}

async function run() {{
{user_script}
}}

run()
  .catch((err) => setError(String(err && err.message ? err.message : err)))
  .finally(() => {{
    console.log('{start}');
    console.log(JSON.stringify(result));
    console.log('{end}');
  }});
"#,
            user_script = indent(&poc.script, "  "),
            start = wrapper::RESULT_START,
            end = wrapper::RESULT_END,
        )
    }

    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        Self::check_blocklist(&poc.script)?;

        let source = self.build_source(poc);
        let dir = tempfile::tempdir().map_err(|e| Error::Internal(e.to_string()))?;
        let script_path = dir.path().join("poc.js");
        tokio::fs::write(&script_path, &source)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let syntax_check = Command::new("node")
            .arg("--check")
            .arg(&script_path)
            .output()
            .await
            .map_err(|e| Error::PluginError(format!("failed to run node --check: {e}")))?;
        if !syntax_check.status.success() {
            return Err(Error::InvalidInput(format!(
                "javascript poc failed syntax check: {}",
                String::from_utf8_lossy(&syntax_check.stderr)
            )));
        }

        let mut command = Command::new("node");
        command.arg(&script_path);
        for (key, value) in wrapper::target_env_vars(target) {
            command.env(key, value);
        }

        let output = timeout(DEADLINE, command.output())
            .await
            .map_err(|_| Error::Timeout("javascript poc exceeded 30s deadline".to_string()))?
            .map_err(|e| Error::PluginError(format!("failed to spawn node: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = wrapper::extract_outcome(&stdout);

        let mut result = PocResult::new(poc.id, target.clone());
        result.success = outcome.success;
        result.payload = outcome.payload;
        result.request = outcome.request;
        result.response = outcome.response;
        result.output = outcome.output;
        result.error = outcome.error;
        result.data = outcome.data;
        Ok(result)
    }
}

fn indent(script: &str, prefix: &str) -> String {
    script
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Default for JavaScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PocExecutor for JavaScriptExecutor {
    fn name(&self) -> &'static str {
        "javascript"
    }

    fn supported_dialects(&self) -> &'static [Dialect] {
        &[Dialect::Javascript]
    }

    fn validate(&self, poc: &Poc) -> Result<()> {
        Self::check_blocklist(&poc.script)
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
            dialect: Dialect::Javascript,
            severity: Severity::Info,
            tags: Vec::new(),
            required_params: Vec::new(),
            default_params: BTreeMap::new(),
            enabled: true,
        }
    }

    #[test]
    fn test_blocklist_rejects_child_process() {
        assert!(JavaScriptExecutor::check_blocklist("require('child_process').exec('ls')").is_err());
    }

    #[test]
    fn test_blocklist_rejects_process_exit() {
        assert!(JavaScriptExecutor::check_blocklist("process.exit(1)").is_err());
    }

    #[test]
    fn test_blocklist_allows_clean_script() {
        assert!(JavaScriptExecutor::check_blocklist("setSuccess(true);").is_ok());
    }

    #[test]
    fn test_blocklist_rejects_timer_eval() {
        assert!(JavaScriptExecutor::check_blocklist("setTimeout(() => eval('2+2'), 10)").is_err());
    }

    #[test]
    fn test_validate_delegates_to_blocklist() {
        let executor = JavaScriptExecutor::new();
        assert!(executor.validate(&poc("eval('1+1')")).is_err());
        assert!(executor.validate(&poc("setSuccess(true);")).is_ok());
    }
}
