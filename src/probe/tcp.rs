//! TCP connect probe implementation.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::{host_port, ProbeError};

/// Open a TCP connection to the target's host and port.
///
/// Returns the connect latency. Reachability is binary: any failure is an error.
pub async fn run_tcp_probe(target: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let (host, port) = host_port(target)?;

    let start = Instant::now();
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("connect to {}:{} failed: {}", host, port, e)))?;
    let elapsed = start.elapsed();

    drop(stream);
    Ok(elapsed)
}
