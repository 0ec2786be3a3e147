//! Uptime statistics over a rolling window of check history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::db::{CheckResult, CheckStatus, ResultStore, StoreError};

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Derived statistics for one endpoint over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeSummary {
    pub window_days: u32,
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub degraded_checks: usize,
    pub down_checks: usize,
    /// Healthy share in percent, two decimals. 100 when there is no data.
    pub uptime_percent: f64,
    pub avg_response_time: Option<Duration>,
    /// Runs of consecutive non-healthy checks.
    pub incidents: usize,
}

impl UptimeSummary {
    pub fn from_results(window_days: u32, results: &[CheckResult]) -> Self {
        let mut ordered: Vec<&CheckResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.checked_at);

        let count = |status: CheckStatus| ordered.iter().filter(|r| r.status == status).count();
        let healthy_checks = count(CheckStatus::Healthy);
        let degraded_checks = count(CheckStatus::Degraded);
        let down_checks = count(CheckStatus::Down);

        let avg_response_time = if ordered.is_empty() {
            None
        } else {
            let total: Duration = ordered.iter().map(|r| r.latency).sum();
            Some(total / ordered.len() as u32)
        };

        let mut incidents = 0;
        let mut failing = false;
        for r in &ordered {
            if !r.status.is_healthy() && !failing {
                incidents += 1;
            }
            failing = !r.status.is_healthy();
        }

        Self {
            window_days,
            total_checks: ordered.len(),
            healthy_checks,
            degraded_checks,
            down_checks,
            uptime_percent: uptime_percent(healthy_checks, ordered.len()),
            avg_response_time,
            incidents,
        }
    }
}

/// `healthy / total` as a percentage rounded to two decimals.
pub fn uptime_percent(healthy: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let ratio = healthy as f64 / total as f64;
    (ratio * 100.0 * 100.0).round() / 100.0
}

/// Computes uptime from stored history. Read-only.
#[derive(Clone)]
pub struct UptimeAggregator {
    store: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
}

impl UptimeAggregator {
    pub fn new(store: Arc<dyn ResultStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Statistics over `[now - window_days, now]`.
    pub async fn summarize(&self, endpoint_id: i64, window_days: u32) -> Result<UptimeSummary, StoreError> {
        let now = self.clock.now();
        // Windows reaching past the representable range cover all history
        let since = now
            .checked_sub_signed(ChronoDuration::days(i64::from(window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let results: Vec<CheckResult> = self
            .store
            .list_check_results(endpoint_id, since)
            .await?
            .into_iter()
            .filter(|r| r.checked_at <= now)
            .collect();

        Ok(UptimeSummary::from_results(window_days, &results))
    }

    /// Uptime percentage for the window. An unreadable history counts as
    /// no history, i.e. 100%.
    pub async fn compute_uptime(&self, endpoint_id: i64, window_days: u32) -> f64 {
        match self.summarize(endpoint_id, window_days).await {
            Ok(summary) => summary.uptime_percent,
            Err(e) => {
                tracing::warn!("Uptime: failed to read history for endpoint {}: {}", endpoint_id, e);
                100.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Endpoint, MemoryStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn result(status: CheckStatus, minutes_ago: i64, latency_ms: u64) -> CheckResult {
        CheckResult {
            endpoint_id: 1,
            status,
            latency: Duration::from_millis(latency_ms),
            status_code: None,
            error: None,
            checked_at: now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    fn setup(history: Vec<CheckResult>) -> (Arc<MemoryStore>, UptimeAggregator) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_endpoint(Endpoint { id: 1, owner_id: "u".into(), ..Default::default() })
            .unwrap();
        for r in history {
            store.push_history(r).unwrap();
        }
        let aggregator = UptimeAggregator::new(store.clone(), Arc::new(ManualClock::new(now())));
        (store, aggregator)
    }

    #[tokio::test]
    async fn test_seven_of_ten_healthy_is_seventy_percent() {
        let mut history: Vec<CheckResult> = (0..7).map(|i| result(CheckStatus::Healthy, i * 5, 10)).collect();
        history.push(result(CheckStatus::Degraded, 100, 10));
        history.push(result(CheckStatus::Degraded, 105, 10));
        history.push(result(CheckStatus::Down, 110, 10));
        let (_store, aggregator) = setup(history);

        assert_eq!(aggregator.compute_uptime(1, 30).await, 70.0);
        // Same data, same window, same answer
        assert_eq!(aggregator.compute_uptime(1, 30).await, 70.0);
    }

    #[tokio::test]
    async fn test_empty_window_is_full_uptime() {
        let (_store, aggregator) = setup(vec![result(CheckStatus::Down, 60 * 24 * 31, 10)]);
        assert_eq!(aggregator.compute_uptime(1, 30).await, 100.0);
        assert_eq!(aggregator.compute_uptime(42, 30).await, 100.0);
    }

    #[tokio::test]
    async fn test_window_bounds() {
        let history = vec![
            result(CheckStatus::Healthy, 60, 10),
            // Outside a one-day window
            result(CheckStatus::Down, 60 * 25, 10),
            // Stamped in the future
            result(CheckStatus::Down, -10, 10),
        ];
        let (_store, aggregator) = setup(history);

        let summary = aggregator.summarize(1, 1).await.unwrap();
        assert_eq!(summary.total_checks, 1);
        assert_eq!(summary.uptime_percent, 100.0);

        let summary = aggregator.summarize(1, 30).await.unwrap();
        assert_eq!(summary.total_checks, 2);
        assert_eq!(summary.uptime_percent, 50.0);
    }

    #[tokio::test]
    async fn test_oversized_window_covers_all_history() {
        let history = vec![
            result(CheckStatus::Healthy, 5, 10),
            result(CheckStatus::Down, 60 * 24 * 365 * 10, 10),
        ];
        let (_store, aggregator) = setup(history);

        assert_eq!(aggregator.compute_uptime(1, u32::MAX).await, 50.0);
        let summary = aggregator.summarize(1, u32::MAX).await.unwrap();
        assert_eq!(summary.total_checks, 2);
        assert_eq!(summary.window_days, u32::MAX);
    }

    #[tokio::test]
    async fn test_store_failure_yields_full_uptime() {
        let (store, aggregator) = setup(vec![result(CheckStatus::Down, 5, 10)]);
        store.set_failing(true);
        assert_eq!(aggregator.compute_uptime(1, 30).await, 100.0);
        assert!(aggregator.summarize(1, 30).await.is_err());
    }

    #[test]
    fn test_summary_statistics() {
        // Oldest first: healthy, down, degraded, healthy, down
        let history = vec![
            result(CheckStatus::Down, 0, 50),
            result(CheckStatus::Healthy, 5, 10),
            result(CheckStatus::Degraded, 15, 40),
            result(CheckStatus::Down, 20, 30),
            result(CheckStatus::Healthy, 25, 20),
        ];
        let summary = UptimeSummary::from_results(30, &history);

        assert_eq!(summary.total_checks, 5);
        assert_eq!(summary.healthy_checks, 2);
        assert_eq!(summary.degraded_checks, 1);
        assert_eq!(summary.down_checks, 2);
        assert_eq!(summary.uptime_percent, 40.0);
        assert_eq!(summary.avg_response_time, Some(Duration::from_millis(30)));
        assert_eq!(summary.incidents, 2);
    }

    #[test]
    fn test_uptime_percent_rounding() {
        assert_eq!(uptime_percent(2, 3), 66.67);
        assert_eq!(uptime_percent(1, 3), 33.33);
        assert_eq!(uptime_percent(0, 4), 0.0);
        assert_eq!(uptime_percent(0, 0), 100.0);
    }
}
