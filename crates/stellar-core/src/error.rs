//! Error types shared across the Stellar workspace

use thiserror::Error;

/// Result type alias for Stellar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Typed error taxonomy for the scan orchestration engine.
///
/// Every fallible operation in the engine returns one of these kinds so that
/// callers (the CLI, the task supervisor, retry logic) can match on the kind
/// rather than parse error strings.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range user input (port specs, POC fields, config).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity (task, POC, asset) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation conflicts with current state (e.g. task already running).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A deadline elapsed before the operation completed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Rate limiter wait was canceled or otherwise could not grant a token.
    #[error("rate limit: {0}")]
    RateLimit(String),

    /// POC validation or execution failure.
    #[error("plugin error: {0}")]
    PluginError(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Network I/O failure.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Filesystem I/O failure.
    #[error("file error: {0}")]
    FileError(String),

    /// Configuration load/validation failure.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Anything else that doesn't fit the above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire-facing name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid-input",
            Error::NotFound(_) => "not-found",
            Error::Conflict(_) => "conflict",
            Error::Timeout(_) => "timeout",
            Error::RateLimit(_) => "rate-limit",
            Error::PluginError(_) => "plugin-error",
            Error::StorageError(_) => "storage-error",
            Error::NetworkError(_) => "network-error",
            Error::FileError(_) => "file-error",
            Error::ConfigError(_) => "config-error",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::FileError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::ConfigError(format!("TOML serialization error: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("task abc".to_string());
        assert_eq!(err.to_string(), "not found: task abc");
    }

    #[test]
    fn test_error_kind_stable_names() {
        assert_eq!(Error::InvalidInput("x".into()).kind(), "invalid-input");
        assert_eq!(Error::Conflict("x".into()).kind(), "conflict");
        assert_eq!(Error::RateLimit("x".into()).kind(), "rate-limit");
        assert_eq!(Error::PluginError("x".into()).kind(), "plugin-error");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::FileError(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<Vec<i32>>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Internal(_)));
    }
}
