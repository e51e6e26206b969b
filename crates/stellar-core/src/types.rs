//! Core data model shared by the scanner, POC engine, and task store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Probed transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Open,
    Closed,
    OpenFiltered,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => write!(f, "open"),
            PortStatus::Closed => write!(f, "closed"),
            PortStatus::OpenFiltered => write!(f, "open|filtered"),
        }
    }
}

/// Kind of scan a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Port,
    Vuln,
}

/// Scan method requested for TCP probing. `Syn` is accepted for wire
/// compatibility but aliased to `Connect` by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    Connect,
    Syn,
}

/// Which protocol families a task scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTypeConfig {
    Tcp,
    Udp,
    Both,
}

/// Stable, wire-facing task status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    Paused,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sticky: once reached, a task cannot resume.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Paused => "paused",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-task scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Port spec string, e.g. `"22,80,443,1000-2000"`.
    #[serde(default)]
    pub ports: String,
    #[serde(default = "ScanConfig::default_scan_type")]
    pub scan_type: ScanTypeConfig,
    #[serde(default = "ScanConfig::default_scan_method")]
    pub scan_method: ScanMethod,
    #[serde(default = "ScanConfig::default_concurrency")]
    pub concurrency: usize,
    /// Probes per second; `None` disables rate gating.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default = "ScanConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub exclude_hosts: Vec<String>,
    #[serde(default = "ScanConfig::default_service_detection")]
    pub service_detection: bool,
}

impl ScanConfig {
    fn default_scan_type() -> ScanTypeConfig {
        ScanTypeConfig::Tcp
    }
    fn default_scan_method() -> ScanMethod {
        ScanMethod::Connect
    }
    fn default_concurrency() -> usize {
        100
    }
    fn default_timeout_secs() -> u64 {
        3
    }
    fn default_service_detection() -> bool {
        true
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: String::new(),
            scan_type: Self::default_scan_type(),
            scan_method: Self::default_scan_method(),
            concurrency: Self::default_concurrency(),
            rate_limit: None,
            timeout_secs: Self::default_timeout_secs(),
            exclude_hosts: Vec::new(),
            service_detection: Self::default_service_detection(),
        }
    }
}

/// A scan job: port discovery or vulnerability-POC evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: String,
    pub kind: TaskKind,
    pub targets: Vec<String>,
    pub config: ScanConfig,
    pub status: TaskStatus,
    /// 0..=100, monotonically non-decreasing while running.
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_summary: Option<Aggregate>,
}

impl Task {
    /// Build a new pending task with a fresh id and timestamp.
    pub fn new(project_id: impl Into<String>, kind: TaskKind, targets: Vec<String>, config: ScanConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            kind,
            targets,
            config,
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result_summary: None,
        }
    }
}

/// A host identifier, expanded upstream from hostname/dotted-quad/CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    pub host: String,
}

impl ScanTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// Dedup key for a single probe: at most one probe per task executes for a
/// given (host, port, protocol) triple, regardless of duplicate enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortProbe {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Outcome of a probe, ready to persist and/or publish on the result stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub task_id: Uuid,
    pub project_id: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub status: PortStatus,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    /// Set once the Result Handler upserts the corresponding `PortAsset`.
    pub asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn new(task_id: Uuid, project_id: impl Into<String>, host: impl Into<String>, port: u16, protocol: Protocol, status: PortStatus) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            project_id: project_id.into(),
            host: host.into(),
            port,
            protocol,
            status,
            service: None,
            product: None,
            version: None,
            banner: None,
            asset_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derived, per-project upsert of an observed open port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAsset {
    pub id: Uuid,
    pub project_id: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub service: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Script dialect recognized by the POC executor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Python,
    Go,
    Javascript,
    YamlTemplate,
    NucleiTemplate,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dialect::Python => "python",
            Dialect::Go => "go",
            Dialect::Javascript => "javascript",
            Dialect::YamlTemplate => "yaml-template",
            Dialect::NucleiTemplate => "nuclei-template",
        };
        write!(f, "{s}")
    }
}

/// Finding severity, shared by POCs and persisted vulnerabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

/// A stored proof-of-concept script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poc {
    pub id: Uuid,
    pub name: String,
    pub script: String,
    pub dialect: Dialect,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub required_params: Vec<String>,
    pub default_params: BTreeMap<String, String>,
    pub enabled: bool,
}

/// Content-addressed probe target for POC evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocTarget {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub path: String,
    pub query: String,
    pub extras: BTreeMap<String, String>,
}

impl PocTarget {
    /// Digest over the fields that can affect executor behavior, used as the
    /// cache key's target component. `BTreeMap` keeps `extras` ordering
    /// stable across calls so the digest is deterministic.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.host.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.port.to_be_bytes());
        hasher.update(b"\0");
        hasher.update(self.scheme.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.query.as_bytes());
        for (k, v) in &self.extras {
            hasher.update(b"\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Verdict of one POC invocation against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocResult {
    pub poc_id: Uuid,
    pub target: PocTarget,
    pub success: bool,
    pub payload: String,
    pub request: String,
    pub response: String,
    pub output: String,
    pub error: String,
    pub execution_time_ms: u64,
    pub params: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl PocResult {
    pub fn new(poc_id: Uuid, target: PocTarget) -> Self {
        Self {
            poc_id,
            target,
            success: false,
            payload: String::new(),
            request: String::new(),
            response: String::new(),
            output: String::new(),
            error: String::new(),
            execution_time_ms: 0,
            params: BTreeMap::new(),
            data: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of a persisted vulnerability finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VulnStatus {
    New,
    Confirmed,
    Fixed,
    Verified,
    Ignored,
    FalsePositive,
}

impl Default for VulnStatus {
    fn default() -> Self {
        VulnStatus::New
    }
}

/// A persistent finding, merged by (project, asset, title, affectedUrl, affectedHost).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: Uuid,
    pub project_id: String,
    pub asset_id: Option<Uuid>,
    pub task_id: Uuid,
    pub title: String,
    pub description: String,
    pub affected_host: String,
    pub affected_port: Option<u16>,
    pub affected_url: Option<String>,
    pub severity: Severity,
    pub status: VulnStatus,
    pub payload: String,
    pub request: String,
    pub response: String,
    pub references: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

/// Per-task derived counters, recomputed on every result as a one-shot
/// aggregation query, not a mutating state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub by_severity: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub unique_affected_hosts: u64,
    pub open_ports: u64,
    pub service_histogram: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_task_status_display_is_wire_stable() {
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("proj1", TaskKind::Port, vec!["10.0.0.1".into()], ScanConfig::default());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_poc_target_content_hash_stable() {
        let t1 = PocTarget {
            url: "http://a/b".into(),
            host: "a".into(),
            port: 80,
            scheme: "http".into(),
            path: "/b".into(),
            query: String::new(),
            extras: BTreeMap::new(),
        };
        let t2 = t1.clone();
        assert_eq!(t1.content_hash(), t2.content_hash());
    }

    #[test]
    fn test_poc_target_content_hash_differs_on_query() {
        let mut t1 = PocTarget {
            url: "http://a/b".into(),
            host: "a".into(),
            port: 80,
            scheme: "http".into(),
            path: "/b".into(),
            query: "x=1".into(),
            extras: BTreeMap::new(),
        };
        let t2 = {
            t1.query = "x=2".into();
            t1.clone()
        };
        t1.query = "x=1".into();
        assert_ne!(t1.content_hash(), t2.content_hash());
    }

    #[test]
    fn test_scan_result_serde_roundtrip() {
        let id = Uuid::new_v4();
        let result = ScanResult::new(id, "proj", "10.0.0.1", 80, Protocol::Tcp, PortStatus::Open);
        let json = serde_json::to_string(&result).unwrap();
        let back: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, id);
        assert_eq!(back.port, 80);
    }
}
