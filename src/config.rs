//! Configuration module for pulsecheck.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file (default: "pulsecheck.db")
    pub db_path: String,
    /// Subject whose endpoints are monitored
    pub subject_id: Option<String>,
    pub monitor: MonitorConfig,
    /// Resolver queried directly by DNS probes; the system resolver when unset
    pub dns_resolver: Option<SocketAddr>,
}

/// Timer and concurrency settings of a monitoring session.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Period of the check timer (default: 5 minutes)
    pub check_interval: Duration,
    /// Period of the resync timer (default: 30 minutes)
    pub resync_interval: Duration,
    /// Upper bound on checks running at once (default: 8)
    pub max_concurrent_checks: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5 * 60),
            resync_interval: Duration::from_secs(30 * 60),
            max_concurrent_checks: 8,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "pulsecheck.db".to_string(),
            subject_id: None,
            monitor: MonitorConfig::default(),
            dns_resolver: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSECHECK_DB_PATH`: Database file path (default: "pulsecheck.db")
    /// - `PULSECHECK_SUBJECT`: Subject (account) id to monitor
    /// - `PULSECHECK_CHECK_INTERVAL_SECS`: Check timer period (default: 300)
    /// - `PULSECHECK_RESYNC_INTERVAL_SECS`: Resync timer period (default: 1800)
    /// - `PULSECHECK_MAX_CONCURRENT_CHECKS`: Concurrent check limit (default: 8)
    /// - `PULSECHECK_DNS_RESOLVER`: `ip:port` of a resolver for DNS probes
    ///
    /// Values that fail to parse keep their default.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(db_path) = lookup("PULSECHECK_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg.subject_id = lookup("PULSECHECK_SUBJECT").filter(|s| !s.trim().is_empty());

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PULSECHECK_CHECK_INTERVAL_SECS").filter(|s| *s > 0) {
            cfg.monitor.check_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "PULSECHECK_RESYNC_INTERVAL_SECS").filter(|s| *s > 0) {
            cfg.monitor.resync_interval = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<usize, _>(&lookup, "PULSECHECK_MAX_CONCURRENT_CHECKS").filter(|n| *n > 0) {
            cfg.monitor.max_concurrent_checks = n;
        }

        cfg.dns_resolver = parse_var(&lookup, "PULSECHECK_DNS_RESOLVER");

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}
