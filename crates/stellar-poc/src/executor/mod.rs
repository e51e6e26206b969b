//! POC executor set: one module per dialect, sharing a common
//! wrapper/validation pipeline.
//!
//! Native `async fn` in traits isn't `dyn`-compatible, so `DialectRegistry`
//! holds concrete executors rather than a `Box<dyn PocExecutor>` table, and
//! dispatches `execute` with a `match` on `Dialect`; the sync metadata
//! methods (`name`, `supported_dialects`, `validate`) still go through the
//! `PocExecutor` trait object for uniform access.

pub mod go;
pub mod javascript;
pub mod nuclei;
pub mod python;
pub mod yaml;

use stellar_core::{Dialect, Poc, PocResult, PocTarget, Result};

pub use go::GoExecutor;
pub use javascript::JavaScriptExecutor;
pub use nuclei::NucleiExecutor;
pub use python::PythonExecutor;
pub use yaml::YamlExecutor;

/// Metadata surface common to every dialect executor.
pub trait PocExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn supported_dialects(&self) -> &'static [Dialect];
    fn validate(&self, poc: &Poc) -> Result<()>;
}

/// Registry of the five dialect executors.
pub struct DialectRegistry {
    python: PythonExecutor,
    go: GoExecutor,
    javascript: JavaScriptExecutor,
    nuclei: NucleiExecutor,
    yaml: YamlExecutor,
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self {
            python: PythonExecutor::new(),
            go: GoExecutor::new(),
            javascript: JavaScriptExecutor::new(),
            nuclei: NucleiExecutor::new(),
            yaml: YamlExecutor::new(),
        }
    }

    /// Static metadata for the executor handling `dialect`.
    pub fn metadata_for(&self, dialect: Dialect) -> &dyn PocExecutor {
        match dialect {
            Dialect::Python => &self.python,
            Dialect::Go => &self.go,
            Dialect::Javascript => &self.javascript,
            Dialect::NucleiTemplate => &self.nuclei,
            Dialect::YamlTemplate => &self.yaml,
        }
    }

    /// Run `poc` against `target` with the dialect-appropriate executor.
    pub async fn execute(&self, poc: &Poc, target: &PocTarget) -> Result<PocResult> {
        match poc.dialect {
            Dialect::Python => self.python.execute(poc, target).await,
            Dialect::Go => self.go.execute(poc, target).await,
            Dialect::Javascript => self.javascript.execute(poc, target).await,
            Dialect::NucleiTemplate => self.nuclei.execute(poc, target).await,
            Dialect::YamlTemplate => self.yaml.execute(poc, target).await,
        }
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_for_matches_dialect_name() {
        let registry = DialectRegistry::new();
        assert_eq!(registry.metadata_for(Dialect::Python).name(), "python");
        assert_eq!(registry.metadata_for(Dialect::Go).name(), "go");
        assert_eq!(registry.metadata_for(Dialect::Javascript).name(), "javascript");
        assert_eq!(registry.metadata_for(Dialect::NucleiTemplate).name(), "nuclei");
        assert_eq!(registry.metadata_for(Dialect::YamlTemplate).name(), "yaml");
    }
}
