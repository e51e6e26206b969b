//! Engine-wide configuration, loaded from a TOML file at startup:
//! sandbox limits, the default rate budget, and the storage path.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration, loaded from a TOML file at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scanner: ScannerDefaults,
    #[serde(default)]
    pub poc: PocEngineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scanner: ScannerDefaults::default(),
            poc: PocEngineConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("failed to read config file {path:?}: {e}")))?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigError(format!("failed to write config file {path:?}: {e}")))?;
        Ok(())
    }

    /// Validate configuration, rejecting values that would make the engine
    /// misbehave rather than just underperform.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.tcp_workers == 0 {
            return Err(Error::ConfigError("scanner.tcp_workers must be > 0".into()));
        }
        if self.scanner.udp_workers == 0 {
            return Err(Error::ConfigError("scanner.udp_workers must be > 0".into()));
        }
        if self.scanner.tcp_probe_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "scanner.tcp_probe_timeout_secs must be > 0".into(),
            ));
        }
        if self.scanner.udp_probe_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "scanner.udp_probe_timeout_secs must be > 0".into(),
            ));
        }
        if self.poc.cache_max_size == 0 {
            return Err(Error::ConfigError("poc.cache_max_size must be > 0".into()));
        }
        if self.poc.max_script_size_bytes == 0 {
            return Err(Error::ConfigError(
                "poc.max_script_size_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// SQLite-backed persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_path")]
    pub db_path: String,
    #[serde(default = "StorageConfig::default_max_connections")]
    pub max_connections: u32,
}

impl StorageConfig {
    fn default_path() -> String {
        "stellar.db".to_string()
    }
    fn default_max_connections() -> u32 {
        10
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_path(),
            max_connections: Self::default_max_connections(),
        }
    }
}

/// Defaults applied to the Port Scanner unless a task overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerDefaults {
    #[serde(default = "ScannerDefaults::default_tcp_workers")]
    pub tcp_workers: usize,
    #[serde(default = "ScannerDefaults::default_udp_workers")]
    pub udp_workers: usize,
    #[serde(default = "ScannerDefaults::default_tcp_timeout")]
    pub tcp_probe_timeout_secs: u64,
    #[serde(default = "ScannerDefaults::default_udp_timeout")]
    pub udp_probe_timeout_secs: u64,
    #[serde(default = "ScannerDefaults::default_result_buffer")]
    pub result_buffer: usize,
    #[serde(default = "ScannerDefaults::default_progress_buffer")]
    pub progress_buffer: usize,
}

impl ScannerDefaults {
    fn default_tcp_workers() -> usize {
        100
    }
    fn default_udp_workers() -> usize {
        50
    }
    fn default_tcp_timeout() -> u64 {
        3
    }
    fn default_udp_timeout() -> u64 {
        5
    }
    fn default_result_buffer() -> usize {
        1000
    }
    fn default_progress_buffer() -> usize {
        100
    }
}

impl Default for ScannerDefaults {
    fn default() -> Self {
        Self {
            tcp_workers: Self::default_tcp_workers(),
            udp_workers: Self::default_udp_workers(),
            tcp_probe_timeout_secs: Self::default_tcp_timeout(),
            udp_probe_timeout_secs: Self::default_udp_timeout(),
            result_buffer: Self::default_result_buffer(),
            progress_buffer: Self::default_progress_buffer(),
        }
    }
}

/// Defaults applied to the POC Engine (cache sizing, global rate budget,
/// validation limits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocEngineConfig {
    #[serde(default = "PocEngineConfig::default_cache_max_size")]
    pub cache_max_size: usize,
    #[serde(default = "PocEngineConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Shared global rate budget across all POC executions; `None` disables gating.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default = "PocEngineConfig::default_max_script_size_bytes")]
    pub max_script_size_bytes: usize,
    #[serde(default)]
    pub sandbox: SandboxLimits,
}

impl PocEngineConfig {
    fn default_cache_max_size() -> usize {
        10_000
    }
    fn default_cache_ttl_secs() -> u64 {
        3600
    }
    fn default_max_script_size_bytes() -> usize {
        1024 * 1024
    }
}

impl Default for PocEngineConfig {
    fn default() -> Self {
        Self {
            cache_max_size: Self::default_cache_max_size(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
            rate_limit: None,
            max_script_size_bytes: Self::default_max_script_size_bytes(),
            sandbox: SandboxLimits::default(),
        }
    }
}

/// Advisory resource limits for POC execution, not OS-enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLimits {
    #[serde(default = "SandboxLimits::default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "SandboxLimits::default_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "SandboxLimits::default_cpu_percent")]
    pub max_cpu_percent: u8,
    #[serde(default = "SandboxLimits::default_open_files")]
    pub max_open_files: u32,
}

impl SandboxLimits {
    fn default_max_duration_secs() -> u64 {
        60
    }
    fn default_memory_mb() -> u64 {
        256
    }
    fn default_cpu_percent() -> u8 {
        50
    }
    fn default_open_files() -> u32 {
        64
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_duration_secs: Self::default_max_duration_secs(),
            max_memory_mb: Self::default_memory_mb(),
            max_cpu_percent: Self::default_cpu_percent(),
            max_open_files: Self::default_open_files(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = EngineConfig::default();
        config.scanner.tcp_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_str_roundtrip() {
        let config = EngineConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let loaded = EngineConfig::load_from_str(&serialized).unwrap();
        assert_eq!(loaded.scanner.tcp_workers, config.scanner.tcp_workers);
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stellar.toml");
        let config = EngineConfig::default();
        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.poc.cache_max_size, config.poc.cache_max_size);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let loaded = EngineConfig::load_from_str("[scanner]\ntcp_workers = 5\n").unwrap();
        assert_eq!(loaded.scanner.tcp_workers, 5);
        assert_eq!(loaded.scanner.udp_workers, ScannerDefaults::default_udp_workers());
    }
}
