//! Core types, error handling, configuration, and the target/port parser
//! shared across the Stellar scan orchestration engine.
//!
//! # Examples
//!
//! ```
//! use stellar_core::ports::parse_port_spec;
//!
//! let ports = parse_port_spec("22,80,443,1000-1002").unwrap();
//! assert_eq!(ports, vec![22, 80, 443, 1000, 1001, 1002]);
//! ```

pub mod config;
pub mod error;
pub mod ports;
pub mod retry;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ports::{parse_port_spec, parse_target_list};
pub use types::{
    Aggregate, Dialect, PocResult, PocTarget, Poc, PortAsset, PortProbe, PortStatus, Protocol,
    ScanConfig, ScanMethod, ScanResult, ScanTarget, ScanTypeConfig, Severity, Task, TaskKind,
    TaskStatus, VulnStatus, Vulnerability,
};
