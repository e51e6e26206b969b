//! TCP connect-scan probe: let the OS complete the 3-way handshake via
//! `TcpStream::connect`, wrapped in `tokio::time::timeout`. Closed and
//! unreachable probes are discarded by the caller; only `Open` and
//! `OpenFiltered` results are emitted, since closed ports are not reported.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use stellar_core::PortStatus;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Attempt a TCP connect-scan probe against `addr`. Returns `None` when the
/// port should be treated as closed and dropped from the result stream.
pub async fn probe_tcp(addr: SocketAddr, connect_timeout: Duration) -> Option<(PortStatus, Option<TcpStream>)> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            trace!("tcp connect succeeded for {addr}");
            Some((PortStatus::Open, Some(stream)))
        }
        Ok(Err(e)) => match e.kind() {
            io::ErrorKind::ConnectionRefused => {
                trace!("tcp connect refused for {addr}");
                None
            }
            _ => {
                trace!("tcp connect failed for {addr}: {e}");
                Some((PortStatus::OpenFiltered, None))
            }
        },
        Err(_) => {
            trace!("tcp connect timed out for {addr}");
            Some((PortStatus::OpenFiltered, None))
        }
    }
}
