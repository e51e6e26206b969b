//! POC engine: the pipeline that ties validation, caching, rate limiting,
//! sandboxed execution, and stats together into one "validate, look up,
//! run, record" call per verification request.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use stellar_core::config::PocEngineConfig;
use stellar_core::{Poc, PocResult, PocTarget, Result};
use stellar_scanner::RateLimiter;
use tokio_util::sync::CancellationToken;

use crate::cache::PocCache;
use crate::executor::DialectRegistry;
use crate::sandbox::{self, ResourceLimits, SandboxConfig};
use crate::validation;

/// Running totals surfaced to callers/operators.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub total: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    mean_execution_ms: Mutex<f64>,
}

/// Point-in-time snapshot of [`EngineStats`].
#[derive(Debug, Clone, Copy)]
pub struct EngineStatsSnapshot {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub mean_execution_ms: f64,
}

impl EngineStats {
    fn record(&self, success: bool, cache_hit: bool, execution_ms: f64) {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let mut mean = self.mean_execution_ms.lock();
        *mean = (*mean * (total - 1) as f64 + execution_ms) / total as f64;
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            mean_execution_ms: *self.mean_execution_ms.lock(),
        }
    }
}

/// Drives a single POC execution through validate -> cache -> rate-limit ->
/// sandboxed-execute -> cache-store -> stats.
pub struct PocEngine {
    cache: PocCache,
    registry: DialectRegistry,
    rate_limiter: Option<RateLimiter>,
    max_script_size_bytes: usize,
    sandbox_config: SandboxConfig,
    pub stats: EngineStats,
}

impl PocEngine {
    pub fn new(config: &PocEngineConfig) -> Self {
        Self {
            cache: PocCache::new(config.cache_max_size, config.cache_ttl_secs),
            registry: DialectRegistry::new(),
            rate_limiter: config.rate_limit.map(RateLimiter::new),
            max_script_size_bytes: config.max_script_size_bytes,
            sandbox_config: SandboxConfig::new(
                Duration::from_secs(config.sandbox.max_duration_secs),
                ResourceLimits::new()
                    .with_max_memory_mb(config.sandbox.max_memory_mb)
                    .with_max_cpu_percent(config.sandbox.max_cpu_percent)
                    .with_max_open_files(config.sandbox.max_open_files),
            ),
            stats: EngineStats::default(),
        }
    }

    /// Run `poc` against `target`, consulting the cache first and recording
    /// the outcome in the cache and in [`EngineStats`] on the way out.
    pub async fn run(
        &self,
        poc: &Poc,
        target: &PocTarget,
        cancel: &CancellationToken,
    ) -> Result<PocResult> {
        // Step 1: validate. Failures bypass cache and sandbox entirely.
        validation::validate_poc(poc, self.max_script_size_bytes)?;

        // Step 2: cache lookup.
        let key = (poc.id, target.content_hash());
        if let Some(cached) = self.cache.get(&key) {
            self.stats.record(cached.success, true, 0.0);
            return Ok(cached);
        }

        // Step 3: rate limit.
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire(cancel).await?;
        }

        // Step 4: sandboxed dialect dispatch.
        let started = Instant::now();
        let poc_owned = poc.clone();
        let target_owned = target.clone();
        let registry = &self.registry;
        let outcome = sandbox::run_sandboxed(&self.sandbox_config, async move {
            registry.execute(&poc_owned, &target_owned).await
        })
        .await;
        let execution_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.stats.record(false, false, execution_ms);
                return Err(e);
            }
        };
        result.execution_time_ms = execution_ms as u64;

        // Step 5: cache the result.
        self.cache.set(key, result.clone());

        // Step 6: stats.
        self.stats.record(result.success, false, execution_ms);

        Ok(result)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stellar_core::{Dialect, Severity};
    use uuid::Uuid;

    fn poc(script: &str, dialect: Dialect) -> Poc {
        Poc {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            script: script.to_string(),
            dialect,
            severity: Severity::Info,
            tags: Vec::new(),
            required_params: Vec::new(),
            default_params: BTreeMap::new(),
            enabled: true,
        }
    }

    fn target() -> PocTarget {
        PocTarget {
            url: "http://127.0.0.1:1/".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            scheme: "http".to_string(),
            path: "/".to_string(),
            query: String::new(),
            extras: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_invalid_poc_is_rejected_before_cache() {
        let engine = PocEngine::new(&PocEngineConfig::default());
        let bad = poc("os.system('rm -rf /')", Dialect::Python);
        let cancel = CancellationToken::new();
        let result = engine.run(&bad, &target(), &cancel).await;
        assert!(result.is_err());
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_stats_mean_execution_cumulative() {
        let stats = EngineStats::default();
        stats.record(true, false, 100.0);
        stats.record(true, false, 200.0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 2);
        assert!((snapshot.mean_execution_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_cache() {
        let engine = PocEngine::new(&PocEngineConfig::default());
        engine.clear_cache();
        assert_eq!(engine.cache_len(), 0);
    }
}
