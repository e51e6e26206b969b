//! Python dialect executor: wrapper + user script to a temp file,
//! run under `python3` with a 30s deadline.

use std::time::Duration;
use stellar_core::{Dialect, Error, Poc, PocResult, PocTarget, Result};
use tokio::process::Command;
use tokio::time::timeout;

use super::PocExecutor;
use crate::wrapper;

const DEADLINE: Duration = Duration::from_secs(30);

const BLOCKED_CALLS: &[&str] = &[
    "os.system(",
    "subprocess.",
    "eval(",
    "exec(",
    "__import__(",
    "input(",
    "raw_input(",
];

pub struct PythonExecutor;

impl PythonExecutor {
    pub fn new() -> Self {
        Self
    }

    fn check_blocklist(script: &str) -> Result<()> {
        for token in BLOCKED_CALLS {
            if script.contains(token) {
                return Err(Error::InvalidInput(format!(
                    "python poc contains blocked construct: {token}"
                )));
            }
        }

        let write_open = regex::Regex::new(r#"open\([^)]*['"]w"#)
            .expect("static regex is valid");
        if write_open.is_match(script) {
            return Err(Error::InvalidInput(
                "python poc opens a file in write mode".to_string(),
            ));
        }
        Ok(())
    }

    fn build_source(&self, poc: &Poc) -> String {
        let indented = poc
            .script
            .lines()
            .map(|line| format!("    {line}"))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"import json
import os
import sys
try:
    import requests
except ImportError:
    requests = None


class _Result:
    def __init__(self):
        self.success = False
        self.payload = ""
        self.request = ""
        self.response = ""
        self.output = ""
        self.error = ""
        self.data = {{}}

    def SetSuccess(self, value):
        self.success = bool(value)

    def SetPayload(self, value):
        self.payload = str(value)

    def SetRequest(self, value):
        self.request = str(value)

    def SetResponse(self, value):
        self.response = str(value)

    def SetOutput(self, value):
        self.output = str(value)

    def SetError(self, value):
        self.error = str(value)

    def SetData(self, key, value):
        self.data[key] = str(value)

    def Log(self, message):
        print(message, file=sys.stderr)


result = _Result()
target_url = os.environ.get("TARGET_URL", "")
target_host = os.environ.get("TARGET_HOST", "")
target_port = os.environ.get("TARGET_PORT", "")
target_scheme = os.environ.get("TARGET_SCHEME", "")
target_path = os.environ.get("TARGET_PATH", "")

try:
{indented}
except Exception as exc:
    result.SetError(str(exc))

print("{start}")
print(json.dumps({{
    "success": result.success,
    "payload": result.payload,
    "request": result.request,
    "response": result.response,
    "output": result.output,
    "error": result.error,
    "data": result.data,
}}))
print("{end}")
"#,
            indented = indented,
            start = wrapper::RESULT_START,
            end = wrapper::RESULT_END,
        )
    }

    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        Self::check_blocklist(&poc.script)?;

        let source = self.build_source(poc);
        let dir = tempfile::tempdir().map_err(|e| Error::Internal(e.to_string()))?;
        let script_path = dir.path().join("poc.py");
        tokio::fs::write(&script_path, &source)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut command = Command::new("python3");
        command.arg(&script_path);
        for (key, value) in wrapper::target_env_vars(target) {
            command.env(key, value);
        }

        let output = timeout(DEADLINE, command.output())
            .await
            .map_err(|_| Error::Timeout("python poc exceeded 30s deadline".to_string()))?
            .map_err(|e| Error::PluginError(format!("failed to spawn python3: {e}")))?;

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

impl Default for PythonExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PocExecutor for PythonExecutor {
    fn name(&self) -> &'static str {
        "python"
    }

    fn supported_dialects(&self) -> &'static [Dialect] {
        &[Dialect::Python]
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
            dialect: Dialect::Python,
            severity: Severity::Info,
            tags: Vec::new(),
            required_params: Vec::new(),
            default_params: BTreeMap::new(),
            enabled: true,
        }
    }

    #[test]
    fn test_blocklist_rejects_os_system() {
        assert!(PythonExecutor::check_blocklist("os.system('ls')").is_err());
    }

    #[test]
    fn test_blocklist_rejects_write_mode_open() {
        assert!(PythonExecutor::check_blocklist("open('/tmp/x', 'w')").is_err());
    }

    #[test]
    fn test_blocklist_allows_read_mode_open() {
        assert!(PythonExecutor::check_blocklist("open('/tmp/x', 'r')").is_ok());
    }

    #[test]
    fn test_validate_delegates_to_blocklist() {
        let executor = PythonExecutor::new();
        assert!(executor.validate(&poc("eval('1+1')")).is_err());
        assert!(executor.validate(&poc("result.SetSuccess(True)")).is_ok());
    }

    #[test]
    fn test_build_source_indents_user_script() {
        let executor = PythonExecutor::new();
        let source = executor.build_source(&poc("result.SetSuccess(True)"));
        assert!(source.contains("    result.SetSuccess(True)"));
        assert!(source.contains(wrapper::RESULT_START));
    }
}
