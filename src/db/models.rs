//! Database model types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::ProbeType;

pub const MIN_CHECK_FREQUENCY: u32 = 1;
pub const MAX_CHECK_FREQUENCY: u32 = 60;
pub const MIN_TIMEOUT_SECS: u32 = 5;
pub const MAX_TIMEOUT_SECS: u32 = 120;
pub const MAX_RETRY_COUNT: u32 = 10;

/// Classification of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    /// Reachable, but answered with an unexpected status code.
    Degraded,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Healthy => "healthy",
            CheckStatus::Degraded => "degraded",
            CheckStatus::Down => "down",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, CheckStatus::Healthy)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(CheckStatus::Healthy),
            "degraded" => Ok(CheckStatus::Degraded),
            "down" => Ok(CheckStatus::Down),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// Latest known state of an endpoint, derived from its newest check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: CheckStatus,
    pub last_checked: DateTime<Utc>,
    pub last_response_time: Duration,
}

impl StatusSnapshot {
    pub fn from_result(result: &CheckResult) -> Self {
        Self {
            status: result.status,
            last_checked: result.checked_at,
            last_response_time: result.latency,
        }
    }
}

/// A monitored endpoint and its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub target: String,
    pub probe_type: ProbeType,
    pub enabled: bool,
    /// Minutes between checks.
    pub check_frequency: u32,
    /// Seconds allowed per probe attempt.
    pub timeout: u32,
    pub retry_count: u32,
    /// Raw comma-separated list, e.g. "200,201,204".
    pub success_codes: String,
    pub notify_on_failure: bool,
    /// Current status, if the endpoint has been checked.
    #[serde(default)]
    pub snapshot: Option<StatusSnapshot>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            id: 0,
            owner_id: String::new(),
            name: String::new(),
            target: String::new(),
            probe_type: ProbeType::Http,
            enabled: true,
            check_frequency: 5,
            timeout: 30,
            retry_count: 3,
            success_codes: "200,201,204".to_string(),
            notify_on_failure: true,
            snapshot: None,
        }
    }
}

impl Endpoint {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    /// Parsed success codes. Entries that are not status codes are dropped.
    pub fn success_codes(&self) -> BTreeSet<u16> {
        parse_success_codes(&self.success_codes)
    }

    /// Check the user-editable settings against their allowed ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.target.trim().is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        if !(MIN_CHECK_FREQUENCY..=MAX_CHECK_FREQUENCY).contains(&self.check_frequency) {
            return Err(ValidationError::CheckFrequency(self.check_frequency));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout) {
            return Err(ValidationError::Timeout(self.timeout));
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(ValidationError::RetryCount(self.retry_count));
        }
        Ok(())
    }
}

/// Rejected endpoint settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("target must not be empty")]
    EmptyTarget,
    #[error("check frequency must be {}-{} minutes, got {0}", MIN_CHECK_FREQUENCY, MAX_CHECK_FREQUENCY)]
    CheckFrequency(u32),
    #[error("timeout must be {}-{} seconds, got {0}", MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)]
    Timeout(u32),
    #[error("retry count must be at most {}, got {0}", MAX_RETRY_COUNT)]
    RetryCount(u32),
}

/// Parse a comma-separated success code list, dropping anything unparsable.
pub fn parse_success_codes(raw: &str) -> BTreeSet<u16> {
    raw.split(',')
        .filter_map(|code| code.trim().parse::<u16>().ok())
        .collect()
}

/// The immutable record of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub endpoint_id: i64,
    pub status: CheckStatus,
    pub latency: Duration,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}
