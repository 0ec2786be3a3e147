//! HTTP probe implementation.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use super::{ProbeError, ProbeType};
use crate::db::CheckStatus;

const USER_AGENT: &str = concat!("pulsecheck/", env!("CARGO_PKG_VERSION"));

/// Status line of a completed HTTP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub latency: Duration,
}

/// Build the client shared by all HTTP probes.
pub fn build_http_client() -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        // Probes measure direct reachability
        .no_proxy()
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))
}

/// Turn a target into a request URL, adding a scheme when it has none.
pub fn http_url(target: &str, probe_type: ProbeType) -> String {
    let target = target.trim();
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return target.to_string();
    }

    match probe_type {
        ProbeType::Https | ProbeType::HttpsSsl => format!("https://{}", target),
        _ => format!("http://{}", target),
    }
}

/// `healthy` when the code is an accepted one, otherwise `degraded`.
///
/// A response was received, so the endpoint is never `down` here.
pub fn classify_http_status(status_code: u16, success_codes: &BTreeSet<u16>) -> CheckStatus {
    if success_codes.contains(&status_code) {
        CheckStatus::Healthy
    } else {
        CheckStatus::Degraded
    }
}

/// Run an HTTP GET against the given URL.
///
/// Latency is measured up to the response headers.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<HttpResponse, ProbeError> {
    let start = Instant::now();

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_request_error(e, timeout))?;

    Ok(HttpResponse {
        status_code: response.status().as_u16(),
        latency: start.elapsed(),
    })
}

fn classify_request_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    // reqwest hides the TLS layer, so look through the source chain
    let mut detail = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = inner.source();
    }

    let lower = detail.to_ascii_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        ProbeError::Tls(detail)
    } else {
        ProbeError::Network(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::parse_success_codes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response per connection on a local port.
    async fn serve(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_http_url_adds_scheme() {
        assert_eq!(http_url("example.com", ProbeType::Http), "http://example.com");
        assert_eq!(http_url("example.com", ProbeType::HttpsSsl), "https://example.com");
        assert_eq!(http_url("http://example.com", ProbeType::Https), "http://example.com");
    }

    #[test]
    fn test_http_url_scheme_is_case_insensitive() {
        assert_eq!(http_url("HTTPS://example.com", ProbeType::Http), "HTTPS://example.com");
        assert_eq!(http_url("Http://example.com/x", ProbeType::Https), "Http://example.com/x");
    }

    #[test]
    fn test_classify_http_status() {
        let codes = parse_success_codes("200,201,204");
        assert_eq!(classify_http_status(201, &codes), CheckStatus::Healthy);
        assert_eq!(classify_http_status(500, &codes), CheckStatus::Degraded);
        assert_eq!(classify_http_status(301, &codes), CheckStatus::Degraded);
        assert_eq!(classify_http_status(200, &BTreeSet::new()), CheckStatus::Degraded);
    }

    #[tokio::test]
    async fn test_http_probe_reports_status_code() {
        let url = serve("201 Created").await;
        let client = build_http_client().unwrap();
        let response = run_http_probe(&client, &url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.status_code, 201);

        let url = serve("500 Internal Server Error").await;
        let response = run_http_probe(&client, &url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_http_probe_times_out() {
        // Accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = build_http_client().unwrap();
        let result = run_http_probe(&client, &format!("http://{}/", addr), Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ProbeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let client = build_http_client().unwrap();
        let result = run_http_probe(&client, "http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
