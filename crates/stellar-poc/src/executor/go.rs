//! Go dialect executor: synthesizes a `main` package, syntax-checks
//! it with `gofmt -l` (the AST-parser-equivalent available to a Rust
//! caller without embedding `go/parser`), compiles once per `hash(script)`
//! into a cached binary, and runs it under a 60s deadline covering both
//! compile and execution.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use stellar_core::{Dialect, Error, Poc, PocResult, PocTarget, Result};
use tokio::process::Command;
use tokio::time::timeout;

use super::PocExecutor;
use crate::wrapper;

const DEADLINE: Duration = Duration::from_secs(60);

const BLOCKED_CALLS: &[&str] = &[
    "os.Remove",
    "os.RemoveAll",
    "os.Rename",
    "os.Create",
    "os.OpenFile",
    "exec.Command",
    "exec.CommandContext",
    "ioutil.WriteFile",
    "os.WriteFile",
    "syscall.",
    "unsafe.",
];

pub struct GoExecutor {
    cache_dir: PathBuf,
}

impl GoExecutor {
    pub fn new() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("stellar-poc-go-cache"),
        }
    }

    fn check_blocklist(script: &str) -> Result<()> {
        for token in BLOCKED_CALLS {
            if script.contains(token) {
                return Err(Error::InvalidInput(format!(
                    "go poc contains blocked construct: {token}"
                )));
            }
        }
        Ok(())
    }

    fn build_source(&self, poc: &Poc) -> String {
        format!(
            r#"package main

import (
	"encoding/json"
	"fmt"
	"os"

	resty "github.com/go-resty/resty/v2"
)

type result struct {{
	Success  bool              `json:"success"`
	Payload  string            `json:"payload"`
	Request  string            `json:"request"`
	Response string            `json:"response"`
	Output   string            `json:"output"`
	Error    string            `json:"error"`
	Data     map[string]string `json:"data"`
}}

func main() {{
	client := resty.New()
	_ = client
	r := &result{{Data: map[string]string{{}}}}
	targetURL := os.Getenv("TARGET_URL")
	targetHost := os.Getenv("TARGET_HOST")
	targetPort := os.Getenv("TARGET_PORT")
	_ = targetURL
	_ = targetHost
	_ = targetPort

	func() {{
		defer func() {{
			if rec := recover(); rec != nil {{
				r.Error = fmt.Sprintf("%v", rec)
			}}
		}}()
{user_script}
	}}()

	fmt.Println("{start}")
	out, _ := json.Marshal(r)
	fmt.Println(string(out))
	fmt.Println("{end}")
}}
"#,
            user_script = indent(&poc.script, "\t\t"),
            start = wrapper::RESULT_START,
            end = wrapper::RESULT_END,
        )
    }

    fn binary_path(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(hash)
    }

    async fn compiled_binary(&self, source: &str) -> Result<PathBuf> {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let binary_path = self.binary_path(&hash);

        if tokio::fs::metadata(&binary_path).await.is_ok() {
            return Ok(binary_path);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let dir = tempfile::tempdir().map_err(|e| Error::Internal(e.to_string()))?;
        let main_path = dir.path().join("main.go");
        tokio::fs::write(&main_path, source)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let gofmt = Command::new("gofmt")
            .arg("-l")
            .arg(&main_path)
            .output()
            .await
            .map_err(|e| Error::PluginError(format!("failed to run gofmt: {e}")))?;
        if !gofmt.status.success() {
            return Err(Error::InvalidInput(format!(
                "go poc failed syntax check: {}",
                String::from_utf8_lossy(&gofmt.stderr)
            )));
        }

        let compile = Command::new("go")
            .arg("build")
            .arg("-o")
            .arg(&binary_path)
            .arg(&main_path)
            .current_dir(dir.path())
            .output()
            .await
            .map_err(|e| Error::PluginError(format!("failed to run go build: {e}")))?;
        if !compile.status.success() {
            return Err(Error::PluginError(format!(
                "go poc failed to compile: {}",
                String::from_utf8_lossy(&compile.stderr)
            )));
        }

        Ok(binary_path)
    }

    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        Self::check_blocklist(&poc.script)?;
        let source = self.build_source(poc);

        let run = async {
            let binary_path = self.compiled_binary(&source).await?;

            let mut command = Command::new(&binary_path);
            for (key, value) in wrapper::target_env_vars(target) {
                command.env(key, value);
            }

            let output = command
                .output()
                .await
                .map_err(|e| Error::PluginError(format!("failed to run compiled poc: {e}")))?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok::<_, Error>(wrapper::extract_outcome(&stdout))
        };

        let outcome = timeout(DEADLINE, run)
            .await
            .map_err(|_| Error::Timeout("go poc exceeded 60s deadline".to_string()))??;

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

impl Default for GoExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PocExecutor for GoExecutor {
    fn name(&self) -> &'static str {
        "go"
    }

    fn supported_dialects(&self) -> &'static [Dialect] {
        &[Dialect::Go]
    }

    fn validate(&self, poc: &Poc) -> Result<()> {
        Self::check_blocklist(&poc.script)
    }
}
