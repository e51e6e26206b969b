//! Port scanner: concurrent TCP/UDP probing with bounded channels and
//! cooperative cancellation.
//!
//! TCP and UDP each get their own fixed-size `FuturesUnordered` window
//! (default 100/50), one future replaced per completion, rather than one
//! combined pool across both protocols, since their default concurrency
//! targets differ.

use crate::rate_limiter::RateLimiter;
use crate::service_detect::{self, match_signature};
use crate::tcp::probe_tcp;
use crate::udp::probe_udp;
use dashmap::DashSet;
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use stellar_core::{PortStatus, Protocol, Result, ScanConfig, ScanResult, ScanTarget, ScanTypeConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Scan progress, emitted on a best-effort (non-blocking) channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProgress {
    pub completed: usize,
    pub total: usize,
}

/// Concurrent port scanner: expands targets x ports into probes, dedupes
/// them, and runs them across per-protocol worker pools.
pub struct PortScanner {
    rate_limiter: RateLimiter,
}

impl PortScanner {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self { rate_limiter }
    }

    /// Run a scan for `task_id`/`project_id` against `targets` using `config`.
    /// Results are pushed to `result_tx` as they complete; `progress_tx`
    /// receives best-effort progress ticks. Both channels are written with
    /// `try_send` so a slow consumer cannot stall the scan: a full channel
    /// drops the tick rather than blocking probes.
    pub async fn run(
        &self,
        task_id: Uuid,
        project_id: &str,
        targets: &[ScanTarget],
        config: &ScanConfig,
        result_tx: mpsc::Sender<ScanResult>,
        progress_tx: mpsc::Sender<ScanProgress>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let ports = stellar_core::parse_port_spec(&config.ports)?;
        let probes = expand_probes(targets, &ports, config.scan_type, &config.exclude_hosts);
        let total = probes.len();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        debug!(task = %task_id, total, "port scan expanded");

        let (tcp_probes, udp_probes): (Vec<_>, Vec<_>) =
            probes.into_iter().partition(|(_, _, proto)| *proto == Protocol::Tcp);

        let timeout = Duration::from_secs(config.timeout_secs);
        let tcp_workers = config.concurrency.max(1);
        let udp_workers = (config.concurrency / 2).max(1);

        tokio::try_join!(
            self.run_pool(
                task_id,
                project_id,
                tcp_probes,
                tcp_workers,
                timeout,
                config.service_detection,
                &result_tx,
                &progress_tx,
                &completed,
                total,
                &cancel,
            ),
            self.run_pool(
                task_id,
                project_id,
                udp_probes,
                udp_workers,
                timeout,
                config.service_detection,
                &result_tx,
                &progress_tx,
                &completed,
                total,
                &cancel,
            ),
        )?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pool(
        &self,
        task_id: Uuid,
        project_id: &str,
        probes: Vec<(String, u16, Protocol)>,
        workers: usize,
        timeout: Duration,
        service_detection: bool,
        result_tx: &mpsc::Sender<ScanResult>,
        progress_tx: &mpsc::Sender<ScanProgress>,
        completed: &Arc<std::sync::atomic::AtomicUsize>,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut queue = probes.into_iter();
        let mut in_flight = FuturesUnordered::new();

        while in_flight.len() < workers {
            match queue.next() {
                Some(probe) => in_flight.push(self.probe_one(
                    task_id,
                    project_id,
                    probe,
                    timeout,
                    service_detection,
                    cancel.clone(),
                )),
                None => break,
            }
        }

        while let Some(outcome) = in_flight.next().await {
            if let Some(result) = outcome {
                let _ = result_tx.try_send(result);
            }

            let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            let _ = progress_tx.try_send(ScanProgress { completed: done, total });

            if cancel.is_cancelled() {
                trace!(task = %task_id, "scan canceled, stopping before remaining probes");
                break;
            }

            if let Some(probe) = queue.next() {
                in_flight.push(self.probe_one(
                    task_id,
                    project_id,
                    probe,
                    timeout,
                    service_detection,
                    cancel.clone(),
                ));
            }
        }

        Ok(())
    }

    async fn probe_one(
        &self,
        task_id: Uuid,
        project_id: &str,
        probe: (String, u16, Protocol),
        timeout: Duration,
        service_detection: bool,
        cancel: CancellationToken,
    ) -> Option<ScanResult> {
        let (host, port, protocol) = probe;

        if self.rate_limiter.acquire(&cancel).await.is_err() {
            trace!(%host, port, "probe skipped: rate limit wait canceled");
            return None;
        }

        let addr = resolve(&host, port)?;

        let (status, stream) = match protocol {
            Protocol::Tcp => probe_tcp(addr, timeout).await?,
            Protocol::Udp => (probe_udp(addr, timeout).await?, None),
        };

        let mut result = ScanResult::new(task_id, project_id, host.clone(), port, protocol, status);

        if service_detection && status == PortStatus::Open {
            if let Some(mut stream) = stream {
                if let Some(banner) = service_detect::grab_banner(&mut stream, port, timeout).await {
                    let m = match_signature(&banner);
                    result.service = m.service;
                    result.product = m.product;
                    result.version = m.version;
                    result.banner = m.banner;
                }
            }
        }

        Some(result)
    }
}

/// Resolve `host:port` to a `SocketAddr`. Hostnames are resolved via the
/// blocking stdlib resolver (acceptable: resolution is a one-shot per probe,
/// not a hot loop).
fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    (host, port).to_socket_addrs().ok()?.next()
}

/// Expand targets x ports into deduplicated probes, applying the exclude
/// list. SYN is requested but unsupported without raw sockets, so it is
/// silently treated as Connect; this expansion step doesn't need to
/// distinguish the two since both produce TCP probes.
fn expand_probes(
    targets: &[ScanTarget],
    ports: &[u16],
    scan_type: ScanTypeConfig,
    exclude_hosts: &[String],
) -> Vec<(String, u16, Protocol)> {
    let seen: DashSet<(String, u16, Protocol)> = DashSet::new();
    let mut probes = Vec::new();

    let protocols: &[Protocol] = match scan_type {
        ScanTypeConfig::Tcp => &[Protocol::Tcp],
        ScanTypeConfig::Udp => &[Protocol::Udp],
        ScanTypeConfig::Both => &[Protocol::Tcp, Protocol::Udp],
    };

    for target in targets {
        if exclude_hosts.iter().any(|h| h == &target.host) {
            warn!(host = %target.host, "target excluded from scan");
            continue;
        }
        for &port in ports {
            for &protocol in protocols {
                let key = (target.host.clone(), port, protocol);
                if seen.insert(key.clone()) {
                    probes.push(key);
                }
            }
        }
    }

    probes
}
