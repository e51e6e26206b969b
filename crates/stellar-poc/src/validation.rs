//! POC validation: script-size caps, the engine-wide dangerous-token
//! blocklist, and sensitive-path rejection.
//!
//! Fail-validate errors bypass both the cache and the sandbox, so this
//! check runs first in
//! the engine pipeline.

use stellar_core::{Dialect, Error, Poc, Result};

/// Per-executor max script size.
pub fn max_script_size(dialect: Dialect) -> usize {
    match dialect {
        Dialect::Python | Dialect::Javascript => 1024 * 1024,
        Dialect::Go => 2 * 1024 * 1024,
        Dialect::NucleiTemplate | Dialect::YamlTemplate => 512 * 1024,
    }
}

/// Tokens that mark a script as performing an operation this engine refuses
/// to run under any dialect, regardless of the per-dialect blocklists each
/// executor additionally enforces. Conservative substring match: a
/// false-positive rejection is cheaper than an escape.
const GLOBAL_BLOCKLIST: &[&str] = &[
    "eval",
    "exec",
    "system",
    "shell_exec",
    "passthru",
    "file_get_contents",
    "file_put_contents",
    "fwrite",
    "chmod",
    "chown",
    "unlink",
    "rmdir",
    "mkdir",
    "os.system",
    "subprocess",
    "commands",
];

/// Paths a script must not reference, textually.
const SENSITIVE_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/hosts",
    r"C:\Windows\System32",
    r"C:\Users",
    "../",
    "./",
    "~",
];

/// Validate a POC prior to cache lookup: non-empty script, size within the
/// engine-wide cap, and free of blocklisted tokens/paths.
pub fn validate_poc(poc: &Poc, engine_max_size: usize) -> Result<()> {
    if poc.script.trim().is_empty() {
        return Err(Error::InvalidInput("poc script is empty".to_string()));
    }

    let dialect_cap = max_script_size(poc.dialect);
    let cap = dialect_cap.min(engine_max_size);
    if poc.script.len() > cap {
        return Err(Error::InvalidInput(format!(
            "poc script exceeds max size of {cap} bytes for dialect {}",
            poc.dialect
        )));
    }

    if let Some(token) = find_blocked_token(&poc.script) {
        return Err(Error::InvalidInput(format!(
            "poc script contains blocked token: {token}"
        )));
    }

    Ok(())
}

fn find_blocked_token(script: &str) -> Option<&'static str> {
    GLOBAL_BLOCKLIST
        .iter()
        .find(|tok| script.contains(**tok))
        .or_else(|| SENSITIVE_PATHS.iter().find(|path| script.contains(**path)))
        .copied()
}
