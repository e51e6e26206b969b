//! YAML template dialect executor: a built-in HTTP-request
//! interpreter (no external process), run directly against the target with
//! `{{var}}` substitution and a small matcher language.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use stellar_core::{Dialect, Error, Poc, PocResult, PocTarget, Result};

use super::PocExecutor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct YamlTemplate {
    requests: Vec<YamlRequest>,
}

#[derive(Debug, Clone, Deserialize)]
struct YamlRequest {
    #[serde(default = "default_method")]
    method: String,
    path: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    matchers: Vec<Matcher>,
    #[serde(default = "default_condition")]
    matchers_condition: String,
    #[serde(default)]
    extractors: Vec<Extractor>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_condition() -> String {
    "and".to_string()
}

/// Which piece of the response a `word`/`regex` matcher runs against.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Part {
    #[default]
    Body,
    Header,
    All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Matcher {
    Status {
        status: Vec<u16>,
    },
    Word {
        words: Vec<String>,
        #[serde(default)]
        part: Part,
    },
    Regex {
        regex: String,
        #[serde(default)]
        part: Part,
    },
    Size {
        size: Vec<usize>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Extractor {
    name: String,
    regex: String,
}

pub struct YamlExecutor;

impl YamlExecutor {
    pub fn new() -> Self {
        Self
    }

    fn parse_template(script: &str) -> Result<YamlTemplate> {
        let template: YamlTemplate = serde_yaml::from_str(script)
            .map_err(|e| Error::InvalidInput(format!("invalid yaml template: {e}")))?;
        if template.requests.is_empty() {
            return Err(Error::InvalidInput(
                "yaml template must declare at least one request".to_string(),
            ));
        }
        for request in &template.requests {
            if request.matchers.is_empty() {
                return Err(Error::InvalidInput(
                    "yaml template request missing matchers".to_string(),
                ));
            }
            for extractor in &request.extractors {
                Regex::new(&extractor.regex).map_err(|e| {
                    Error::InvalidInput(format!("invalid extractor regex: {e}"))
                })?;
            }
            for matcher in &request.matchers {
                if let Matcher::Regex { regex } = matcher {
                    Regex::new(regex)
                        .map_err(|e| Error::InvalidInput(format!("invalid matcher regex: {e}")))?;
                }
            }
        }
        Ok(template)
    }

    fn substitute(template: &str, target: &PocTarget) -> String {
        template
            .replace("{{url}}", &target.url)
            .replace("{{host}}", &target.host)
            .replace("{{port}}", &target.port.to_string())
            .replace("{{scheme}}", &target.scheme)
            .replace("{{path}}", &target.path)
    }

    /// Select the text a `part`-scoped matcher runs against.
    fn select_part(part: Part, body: &str, headers: &str) -> String {
        match part {
            Part::Body => body.to_string(),
            Part::Header => headers.to_string(),
            Part::All => format!("{body}\n{headers}"),
        }
    }

    fn matches(matcher: &Matcher, status: u16, body: &str, headers: &str) -> bool {
        match matcher {
            Matcher::Status { status: expected } => expected.contains(&status),
            Matcher::Word { words, part } => {
                let haystack = Self::select_part(*part, body, headers);
                words.iter().all(|w| haystack.contains(w.as_str()))
            }
            Matcher::Regex { regex, part } => {
                let haystack = Self::select_part(*part, body, headers);
                Regex::new(regex).map(|re| re.is_match(&haystack)).unwrap_or(false)
            }
            Matcher::Size { size } => size.contains(&body.len()),
        }
    }

    fn evaluate_matchers(request: &YamlRequest, status: u16, body: &str, headers: &str) -> bool {
        if request.matchers.is_empty() {
            return false;
        }
        let results = request
            .matchers
            .iter()
            .map(|m| Self::matches(m, status, body, headers));
        if request.matchers_condition.eq_ignore_ascii_case("or") {
            results.into_iter().any(|r| r)
        } else {
            results.into_iter().all(|r| r)
        }
    }

    fn run_extractors(request: &YamlRequest, body: &str, data: &mut BTreeMap<String, String>) {
        for extractor in &request.extractors {
            if let Ok(re) = Regex::new(&extractor.regex) {
                if let Some(captures) = re.captures(body) {
                    let value = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    data.insert(extractor.name.clone(), value);
                }
            }
        }
    }

    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        let template = Self::parse_template(&poc.script)?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))?;

        let mut result = PocResult::new(poc.id, target.clone());

        for request in &template.requests {
            let url = Self::substitute(&format!("{}{}", target.url, request.path), target);
            let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
                .unwrap_or(reqwest::Method::GET);

            let mut builder = client.request(method.clone(), &url);
            for (key, value) in &request.headers {
                builder = builder.header(key, Self::substitute(value, target));
            }
            if let Some(body) = &request.body {
                builder = builder.body(Self::substitute(body, target));
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    result.error = format!("request failed: {e}");
                    continue;
                }
            };
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("\n");

            let mut body_bytes = Vec::new();
            let mut stream = response;
            while let Some(chunk) = stream
                .chunk()
                .await
                .map_err(|e| Error::NetworkError(format!("failed reading response body: {e}")))?
            {
                if body_bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
                    let remaining = MAX_RESPONSE_BYTES.saturating_sub(body_bytes.len());
                    body_bytes.extend_from_slice(&chunk[..remaining.min(chunk.len())]);
                    break;
                }
                body_bytes.extend_from_slice(&chunk);
            }
            let body = String::from_utf8_lossy(&body_bytes).to_string();

            result.request = format!("{} {}", request.method, url);
            result.response = body.clone();

            if Self::evaluate_matchers(request, status, &body, &headers) {
                result.success = true;
                Self::run_extractors(request, &body, &mut result.data);
                return Ok(result);
            }
        }

        result.success = false;
        Ok(result)
    }
}

impl Default for YamlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PocExecutor for YamlExecutor {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn supported_dialects(&self) -> &'static [Dialect] {
        &[Dialect::YamlTemplate]
    }

    fn validate(&self, poc: &Poc) -> Result<()> {
        Self::parse_template(&poc.script).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use stellar_core::Severity;
    use uuid::Uuid;

    fn poc(script: &str) -> Poc {
        Poc {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            script: script.to_string(),
            dialect: Dialect::YamlTemplate,
            severity: Severity::Info,
            tags: Vec::new(),
            required_params: Vec::new(),
            default_params: Map::new(),
            enabled: true,
        }
    }

    const VALID_TEMPLATE: &str = r#"
requests:
  - path: "/admin"
    matchers:
      - type: status
        status: [200]
"#;

    #[test]
    fn test_parse_template_accepts_valid_template() {
        assert!(YamlExecutor::parse_template(VALID_TEMPLATE).is_ok());
    }

    #[test]
    fn test_parse_template_rejects_missing_matchers() {
        let script = r#"
requests:
  - path: "/admin"
"#;
        assert!(YamlExecutor::parse_template(script).is_err());
    }

    #[test]
    fn test_status_matcher() {
        let matcher = Matcher::Status { status: vec![200, 201] };
        assert!(YamlExecutor::matches(&matcher, 200, "", ""));
        assert!(!YamlExecutor::matches(&matcher, 404, "", ""));
    }

    #[test]
    fn test_word_matcher_requires_all_words() {
        let matcher = Matcher::Word {
            words: vec!["admin".to_string(), "panel".to_string()],
            part: Part::Body,
        };
        assert!(YamlExecutor::matches(&matcher, 200, "admin panel loaded", ""));
        assert!(!YamlExecutor::matches(&matcher, 200, "admin only", ""));
    }

    #[test]
    fn test_word_matcher_scoped_to_header_part() {
        let matcher = Matcher::Word {
            words: vec!["nginx".to_string()],
            part: Part::Header,
        };
        assert!(!YamlExecutor::matches(&matcher, 200, "nginx", "Server: nginx"));
        assert!(YamlExecutor::matches(&matcher, 200, "", "Server: nginx"));
    }

    #[test]
    fn test_regex_matcher_scoped_to_all_parts() {
        let matcher = Matcher::Regex {
            regex: "X-Token: \\w+".to_string(),
            part: Part::All,
        };
        assert!(YamlExecutor::matches(&matcher, 200, "body text", "X-Token: abc123"));
    }

    #[test]
    fn test_or_condition_passes_if_any_matcher_passes() {
        let request = YamlRequest {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: Map::new(),
            body: None,
            matchers: vec![
                Matcher::Status { status: vec![500] },
                Matcher::Word { words: vec!["ok".to_string()], part: Part::Body },
            ],
            matchers_condition: "or".to_string(),
            extractors: Vec::new(),
        };
        assert!(YamlExecutor::evaluate_matchers(&request, 200, "ok", ""));
    }

    #[test]
    fn test_substitute_replaces_known_placeholders() {
        let target = PocTarget {
            url: "http://example.com".to_string(),
            host: "example.com".to_string(),
            port: 80,
            scheme: "http".to_string(),
            path: "/".to_string(),
            query: String::new(),
            extras: Map::new(),
        };
        let result = YamlExecutor::substitute("host={{host}} port={{port}}", &target);
        assert_eq!(result, "host=example.com port=80");
    }

    #[test]
    fn test_validate_rejects_malformed_yaml() {
        let executor = YamlExecutor::new();
        assert!(executor.validate(&poc("not: [valid")).is_err());
    }
}
