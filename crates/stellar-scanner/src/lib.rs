//! Stellar Port Scanner
//!
//! Concurrent TCP/UDP port probing with a token-bucket rate limiter and
//! narrow service-signature matching.
//!
//! # Architecture
//!
//! - [`rate_limiter`]: token-bucket gate shared by the scanner and the POC engine
//! - [`tcp`]: TCP connect-scan probe
//! - [`udp`]: UDP zero-length-datagram probe
//! - [`service_detect`]: Apache/Nginx/IIS/OpenSSH/vsFTPd/FileZilla signature matching
//! - [`scanner`]: orchestration tying the above into per-task worker pools

pub mod rate_limiter;
pub mod scanner;
pub mod service_detect;
pub mod tcp;
pub mod udp;

pub use rate_limiter::RateLimiter;
pub use scanner::{PortScanner, ScanProgress};
pub use service_detect::{grab_banner, match_signature, ServiceMatch};
