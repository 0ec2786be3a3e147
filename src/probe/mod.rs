//! Probe module for endpoint health checks.
//!
//! Supports HTTP-family, TCP, DNS, and Ping probes. Every strategy reports
//! failures as a `down` outcome rather than an error.

mod dns;
mod http;
mod ping;
mod target;
mod tcp;

pub use dns::*;
pub use http::*;
pub use ping::*;
pub use target::*;
pub use tcp::*;

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{CheckStatus, Endpoint};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("DNS resolution failed: {0}")]
    Resolve(String),
    #[error("invalid target: {0}")]
    Target(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Protocol used to check an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProbeType {
    Http,
    Https,
    HttpsSsl,
    ApiHealth,
    Tcp,
    Ping,
    Dns,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Http => "http",
            ProbeType::Https => "https",
            ProbeType::HttpsSsl => "https-ssl",
            ProbeType::ApiHealth => "api-health",
            ProbeType::Tcp => "tcp",
            ProbeType::Ping => "ping",
            ProbeType::Dns => "dns",
        }
    }

    /// Parse a stored type name. Unknown names fall back to HTTP.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "https" => ProbeType::Https,
            "https-ssl" => ProbeType::HttpsSsl,
            "api-health" => ProbeType::ApiHealth,
            "tcp" => ProbeType::Tcp,
            "ping" => ProbeType::Ping,
            "dns" => ProbeType::Dns,
            _ => ProbeType::Http,
        }
    }

    pub fn is_http_family(&self) -> bool {
        matches!(
            self,
            ProbeType::Http | ProbeType::Https | ProbeType::HttpsSsl | ProbeType::ApiHealth
        )
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ProbeType {
    fn from(s: String) -> Self {
        ProbeType::parse_lenient(&s)
    }
}

impl From<ProbeType> for String {
    fn from(t: ProbeType) -> Self {
        t.as_str().to_string()
    }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: CheckStatus,
    pub latency: Duration,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            status: CheckStatus::Healthy,
            latency,
            status_code: None,
            error: None,
        }
    }

    pub fn down(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Down,
            latency,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

/// A strategy that checks one endpoint once.
///
/// Implementations must not fail: every error is folded into a `down`
/// outcome. Callers enforce the endpoint timeout on top.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome;
}

/// Probes endpoints over the network, picking the strategy by probe type.
#[derive(Clone)]
pub struct NetworkProber {
    client: reqwest::Client,
    dns_resolver: Option<SocketAddr>,
    jitter: bool,
}

impl NetworkProber {
    pub fn new(dns_resolver: Option<SocketAddr>) -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_http_client()?,
            dns_resolver,
            jitter: true,
        })
    }

    /// Disable the random start delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    async fn run(&self, endpoint: &Endpoint) -> Result<ProbeOutcome, ProbeError> {
        let timeout = endpoint.timeout_duration();

        match endpoint.probe_type {
            ProbeType::Tcp => {
                let latency = run_tcp_probe(&endpoint.target, timeout).await?;
                Ok(ProbeOutcome::healthy(latency))
            }
            ProbeType::Ping => {
                let host = hostname(&endpoint.target)?;
                let latency = run_ping_probe(&host, timeout).await?;
                Ok(ProbeOutcome::healthy(latency))
            }
            ProbeType::Dns => {
                let host = hostname(&endpoint.target)?;
                let latency = run_dns_probe(&host, self.dns_resolver, timeout).await?;
                Ok(ProbeOutcome::healthy(latency))
            }
            ProbeType::Http | ProbeType::Https | ProbeType::HttpsSsl | ProbeType::ApiHealth => {
                let url = http_url(&endpoint.target, endpoint.probe_type);
                let response = run_http_probe(&self.client, &url, timeout).await?;
                let status = classify_http_status(response.status_code, &endpoint.success_codes());
                Ok(ProbeOutcome {
                    status,
                    latency: response.latency,
                    status_code: Some(response.status_code),
                    error: None,
                })
            }
        }
    }
}

#[async_trait]
impl Probe for NetworkProber {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome {
        // Add jitter to avoid thundering herd
        if self.jitter {
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let start = Instant::now();
        match self.run(endpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Probe of {} ({}) failed: {}", endpoint.name, endpoint.probe_type, e);
                ProbeOutcome::down(start.elapsed(), e.to_string())
            }
        }
    }
}
