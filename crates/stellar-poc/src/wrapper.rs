//! Shared wrapper-emission and result-extraction logic used by the four
//! subprocess-based executors (python/go/javascript/nuclei); the YAML
//! executor interprets templates directly and doesn't go through this path.
//!
//! Wraps the user's script in a small harness, runs it, and scrapes its
//! JSON verdict off stdout.

use serde::Deserialize;
use std::collections::BTreeMap;
use stellar_core::PocTarget;

pub const RESULT_START: &str = "STELLAR_RESULT_START";
pub const RESULT_END: &str = "STELLAR_RESULT_END";

/// Keywords a heuristic pass looks for when a script's stdout carries no
/// fenced JSON verdict. A few common localized equivalents are included
/// alongside the English set.
const SUCCESS_KEYWORDS: &[&str] = &[
    "vulnerable",
    "exploit",
    "success",
    "found",
    "detected",
    "verwundbar",
    "trouvé",
    "encontrado",
];

/// Environment variables exposing target fields to a wrapped script:
/// `TARGET_URL`/`TARGET_HOST`/`TARGET_PORT`/`TARGET_SCHEME`/`TARGET_PATH`
/// plus `CUSTOM_*` for extras.
pub fn target_env_vars(target: &PocTarget) -> Vec<(String, String)> {
    let mut vars = vec![
        ("TARGET_URL".to_string(), target.url.clone()),
        ("TARGET_HOST".to_string(), target.host.clone()),
        ("TARGET_PORT".to_string(), target.port.to_string()),
        ("TARGET_SCHEME".to_string(), target.scheme.clone()),
        ("TARGET_PATH".to_string(), target.path.clone()),
    ];
    for (key, value) in &target.extras {
        vars.push((format!("CUSTOM_{}", key.to_uppercase()), value.clone()));
    }
    vars
}

/// JSON verdict printed by a wrapped script between the fence tokens.
#[derive(Debug, Default, Deserialize)]
pub struct WrapperOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Scrape a script's stdout for its verdict: prefer the fenced JSON object;
/// fall back to the keyword heuristic when no fence is present.
pub fn extract_outcome(stdout: &str) -> WrapperOutcome {
    match extract_fenced_json(stdout) {
        Some(json) => {
            let mut outcome: WrapperOutcome = serde_json::from_str(json).unwrap_or_default();
            // A non-empty error always forces success=false.
            if !outcome.error.is_empty() {
                outcome.success = false;
            }
            outcome
        }
        None => WrapperOutcome {
            success: heuristic_success(stdout),
            output: stdout.to_string(),
            ..Default::default()
        },
    }
}

fn extract_fenced_json(stdout: &str) -> Option<&str> {
    let start = stdout.find(RESULT_START)? + RESULT_START.len();
    let end = stdout[start..].find(RESULT_END)? + start;
    Some(stdout[start..end].trim())
}

fn heuristic_success(stdout: &str) -> bool {
    let lower = stdout.to_lowercase();
    SUCCESS_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn target() -> PocTarget {
        PocTarget {
            url: "http://10.0.0.1:8080/app".to_string(),
            host: "10.0.0.1".to_string(),
            port: 8080,
            scheme: "http".to_string(),
            path: "/app".to_string(),
            query: String::new(),
            extras: BTreeMap::from([("token".to_string(), "abc".to_string())]),
        }
    }

    #[test]
    fn test_target_env_vars_includes_custom() {
        let vars = target_env_vars(&target());
        assert!(vars.contains(&("TARGET_HOST".to_string(), "10.0.0.1".to_string())));
        assert!(vars.contains(&("CUSTOM_TOKEN".to_string(), "abc".to_string())));
    }

    #[test]
    fn test_extract_fenced_json() {
        let stdout = format!(
            "some noise\n{}\n{{\"success\":true,\"payload\":\"p\"}}\n{}\nmore noise",
            RESULT_START, RESULT_END
        );
        let outcome = extract_outcome(&stdout);
        assert!(outcome.success);
        assert_eq!(outcome.payload, "p");
    }

    #[test]
    fn test_error_forces_failure() {
        let stdout = format!(
            "{}\n{{\"success\":true,\"error\":\"boom\"}}\n{}",
            RESULT_START, RESULT_END
        );
        let outcome = extract_outcome(&stdout);
        assert!(!outcome.success);
    }

    #[test]
    fn test_heuristic_fallback_on_missing_fence() {
        let outcome = extract_outcome("target appears vulnerable to injection");
        assert!(outcome.success);
    }

    #[test]
    fn test_heuristic_fallback_no_match() {
        let outcome = extract_outcome("nothing interesting here");
        assert!(!outcome.success);
    }
}
