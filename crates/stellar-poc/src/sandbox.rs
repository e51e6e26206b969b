//! Execution sandbox: timeout + panic isolation around one POC invocation.
//!
//! `SandboxConfig` uses builder-style `with_max_*` methods to configure
//! advisory resource limits alongside the enforced wall-clock deadline.
//! This is a timeout/panic wrapper, not an access-control layer; the POC
//! engine's blocklist plays that role instead.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use stellar_core::{Error, Result};
use tokio::time::timeout;

/// Advisory-only resource limits. Not enforced via OS primitives; they
/// exist so callers can plumb operator-facing policy
/// knobs through the engine today and wire up enforcement later).
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: u8,
    pub max_open_files: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_cpu_percent: 50,
            max_open_files: 64,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn with_max_cpu_percent(mut self, percent: u8) -> Self {
        self.max_cpu_percent = percent;
        self
    }

    pub fn with_max_open_files(mut self, files: u32) -> Self {
        self.max_open_files = files;
        self
    }
}

/// Sandbox configuration: the wall-clock budget and the advisory limits
/// reported alongside it.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub max_duration: Duration,
    pub limits: ResourceLimits,
}

impl SandboxConfig {
    pub fn new(max_duration: Duration, limits: ResourceLimits) -> Self {
        Self { max_duration, limits }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(60),
            limits: ResourceLimits::default(),
        }
    }
}

/// Run `fut` under the sandbox's deadline, catching panics so a misbehaving
/// POC cannot take the engine down with it. The future runs inside a
/// dedicated `tokio::task::spawn`, so a panic unwinds that task rather than
/// the caller's.
pub async fn run_sandboxed<F, T>(config: &SandboxConfig, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn(AssertUnwindSafe(fut).catch_unwind());
    let abort_handle = handle.abort_handle();

    match timeout(config.max_duration, handle).await {
        Ok(Ok(Ok(inner))) => inner,
        Ok(Ok(Err(panic))) => {
            let message = panic_message(&panic);
            Err(Error::PluginError(format!("POC panic: {message}")))
        }
        Ok(Err(join_err)) => Err(Error::PluginError(format!(
            "POC task failed: {join_err}"
        ))),
        Err(_) => {
            abort_handle.abort();
            Err(Error::Timeout(format!(
                "POC execution exceeded {:?}",
                config.max_duration
            )))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
