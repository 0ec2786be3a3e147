//! DNS probe implementation.
//!
//! With a resolver address configured, an A-record query for the target
//! host is sent over raw UDP so the answer's RCODE can be inspected.
//! Otherwise the system resolver is used.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use super::ProbeError;

const HEADER_LEN: usize = 12;

/// Resolve `host` and return the lookup latency.
pub async fn run_dns_probe(
    host: &str,
    resolver: Option<SocketAddr>,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    if host.parse::<IpAddr>().is_ok() {
        return Err(ProbeError::Target(format!("{} is an IP address, not a hostname", host)));
    }

    match resolver {
        Some(server) => query_resolver(host, server, timeout).await,
        None => system_lookup(host, timeout).await,
    }
}

async fn system_lookup(host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let start = Instant::now();
    let addrs: Vec<SocketAddr> = tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", host, e)))?
        .collect();
    let elapsed = start.elapsed();

    if addrs.is_empty() {
        return Err(ProbeError::Resolve(format!("no addresses found for {}", host)));
    }
    Ok(elapsed)
}

async fn query_resolver(host: &str, server: SocketAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let packet = build_dns_query(host)?;
    let tx_id = u16::from_be_bytes([packet[0], packet[1]]);

    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(server)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let start = Instant::now();

    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let mut response = [0u8; 512];
    let n = tokio::time::timeout(timeout, socket.recv(&mut response))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;

    let elapsed = start.elapsed();
    check_dns_response(&response[..n], tx_id, host)?;
    Ok(elapsed)
}

/// Build a DNS query packet for the A record of `host`.
fn build_dns_query(host: &str) -> Result<Vec<u8>, ProbeError> {
    let name = host.trim_end_matches('.');
    if name.is_empty() || name.len() > 253 {
        return Err(ProbeError::Target(format!("invalid hostname: {:?}", host)));
    }

    let tx_id: u16 = rand::random();
    let flags: u16 = 0x0100; // Standard query, recursion desired

    // Header (12 bytes): id, flags, qdcount=1, ancount, nscount, arcount
    let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

    // Question name as length-prefixed labels
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ProbeError::Target(format!("invalid hostname: {:?}", host)));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    // QTYPE A, QCLASS IN
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());

    Ok(packet)
}

fn check_dns_response(response: &[u8], tx_id: u16, host: &str) -> Result<(), ProbeError> {
    if response.len() < HEADER_LEN {
        return Err(ProbeError::Network(format!("response too short: {} bytes", response.len())));
    }

    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    if response[2] & 0x80 == 0 {
        return Err(ProbeError::Network("reply is not a DNS response".to_string()));
    }

    // RCODE is the lower 4 bits of byte 3
    let rcode = response[3] & 0x0F;
    if rcode != 0 {
        return Err(ProbeError::Resolve(format!("{}: RCODE {}", host, rcode)));
    }

    let an_count = u16::from_be_bytes([response[6], response[7]]);
    if an_count == 0 {
        return Err(ProbeError::Resolve(format!("no records for {}", host)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answer every query with the given RCODE and answer count.
    async fn fake_resolver(rcode: u8, an_count: u16) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let mut reply = buf[..n].to_vec();
                reply[2] |= 0x80;
                reply[3] = (reply[3] & 0xF0) | rcode;
                reply[6..8].copy_from_slice(&an_count.to_be_bytes());
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }

    #[test]
    fn test_build_dns_query() {
        let packet = build_dns_query("example.com").unwrap();
        // 12 (header) + 13 (question name) + 4 (type/class)
        assert_eq!(packet.len(), 29);
        assert_eq!(&packet[12..25], b"\x07example\x03com\x00");
    }

    #[test]
    fn test_build_dns_query_rejects_bad_names() {
        assert!(build_dns_query("").is_err());
        assert!(build_dns_query("a..b").is_err());
        assert!(build_dns_query(&"x".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn test_dns_probe_via_resolver() {
        let resolver = fake_resolver(0, 1).await;
        let result = run_dns_probe("example.com", Some(resolver), Duration::from_secs(2)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dns_probe_nxdomain() {
        let resolver = fake_resolver(3, 0).await;
        let result = run_dns_probe("missing.example", Some(resolver), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ProbeError::Resolve(_))));
    }

    #[tokio::test]
    async fn test_dns_probe_empty_answer() {
        let resolver = fake_resolver(0, 0).await;
        let result = run_dns_probe("example.com", Some(resolver), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ProbeError::Resolve(_))));
    }

    #[tokio::test]
    async fn test_dns_probe_rejects_ip_literal() {
        let result = run_dns_probe("10.0.0.1", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::Target(_))));
    }

    #[tokio::test]
    async fn test_dns_probe_system_resolver_localhost() {
        let result = run_dns_probe("localhost", None, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }
}
