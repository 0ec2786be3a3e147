//! Check execution: one probe run under a timeout, with retries.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::db::{CheckResult, CheckStatus, Endpoint, MAX_RETRY_COUNT};
use crate::probe::{Probe, ProbeError, ProbeOutcome};

/// Pause between a failed attempt and its retry.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Error recorded for endpoints that are switched off.
pub const DISABLED_ERROR: &str = "disabled";

/// Runs probes for endpoints and normalizes their outcome into a [`CheckResult`].
pub struct CheckExecutor {
    probe: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    retry_backoff: Duration,
}

impl CheckExecutor {
    pub fn new(probe: Arc<dyn Probe>, clock: Arc<dyn Clock>) -> Self {
        Self {
            probe,
            clock,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Check an endpoint. Never fails; problems end up in `error`.
    ///
    /// A `down` attempt is retried up to `retry_count` times. The first
    /// attempt that is not `down` ends the sequence, and the last attempt
    /// made is what gets returned.
    pub async fn execute(&self, endpoint: &Endpoint) -> CheckResult {
        if !endpoint.enabled {
            return CheckResult {
                endpoint_id: endpoint.id,
                status: CheckStatus::Down,
                latency: Duration::ZERO,
                status_code: None,
                error: Some(DISABLED_ERROR.to_string()),
                checked_at: self.clock.now(),
            };
        }

        let retries = endpoint.retry_count.min(MAX_RETRY_COUNT);
        let mut result = self.attempt(endpoint).await;
        let mut retried = 0;

        while result.status == CheckStatus::Down && retried < retries {
            retried += 1;
            tokio::time::sleep(self.retry_backoff).await;
            tracing::debug!(
                "Retrying {} ({}/{}) after: {}",
                endpoint.name,
                retried,
                retries,
                result.error.as_deref().unwrap_or("down")
            );
            result = self.attempt(endpoint).await;
        }

        result
    }

    async fn attempt(&self, endpoint: &Endpoint) -> CheckResult {
        let checked_at = self.clock.now();
        let timeout = endpoint.timeout_duration();

        // Dropping the probe future on expiry aborts its in-flight I/O
        let outcome = match tokio::time::timeout(timeout, self.probe.probe(endpoint)).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::down(timeout, ProbeError::Timeout(timeout).to_string()),
        };

        CheckResult {
            endpoint_id: endpoint.id,
            status: outcome.status,
            latency: outcome.latency,
            status_code: outcome.status_code,
            error: outcome.error,
            checked_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::probe::{NetworkProber, ProbeType};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Plays back a fixed sequence of outcomes, repeating the last one.
    pub(crate) struct ScriptedProbe {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub(crate) fn new(outcomes: Vec<ProbeOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, _endpoint: &Endpoint) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap()
            }
        }
    }

    pub(crate) fn down() -> ProbeOutcome {
        ProbeOutcome::down(Duration::from_millis(5), "connection refused")
    }

    pub(crate) fn healthy() -> ProbeOutcome {
        ProbeOutcome::healthy(Duration::from_millis(20))
    }

    fn executor(probe: Arc<ScriptedProbe>) -> CheckExecutor {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        CheckExecutor::new(probe, clock)
    }

    fn endpoint(retry_count: u32) -> Endpoint {
        Endpoint {
            id: 7,
            name: "API".to_string(),
            target: "https://example.com".to_string(),
            retry_count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_endpoint_is_not_probed() {
        let probe = Arc::new(ScriptedProbe::new(vec![healthy()]));
        let exec = executor(probe.clone());
        let ep = Endpoint { enabled: false, ..endpoint(3) };

        let result = exec.execute(&ep).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.error.as_deref(), Some("disabled"));
        assert_eq!(result.latency, Duration::ZERO);
        assert_eq!(result.endpoint_id, 7);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_third_attempt() {
        let probe = Arc::new(ScriptedProbe::new(vec![down(), down(), healthy()]));
        let exec = executor(probe.clone());

        let started = tokio::time::Instant::now();
        let result = exec.execute(&endpoint(2)).await;
        assert_eq!(result.status, CheckStatus::Healthy);
        assert_eq!(probe.calls(), 3);
        // Two backoffs between three attempts
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_count() {
        let probe = Arc::new(ScriptedProbe::new(vec![down()]));
        let exec = executor(probe.clone());

        let result = exec.execute(&endpoint(4)).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(probe.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_stops_retrying() {
        let degraded = ProbeOutcome {
            status: CheckStatus::Degraded,
            latency: Duration::from_millis(30),
            status_code: Some(500),
            error: None,
        };
        let probe = Arc::new(ScriptedProbe::new(vec![down(), degraded, healthy()]));
        let exec = executor(probe.clone());

        let result = exec.execute(&endpoint(5)).await;
        assert_eq!(result.status, CheckStatus::Degraded);
        assert_eq!(result.status_code, Some(500));
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_when_retry_count_zero() {
        let probe = Arc::new(ScriptedProbe::new(vec![down(), healthy()]));
        let exec = executor(probe.clone());

        let result = exec.execute(&endpoint(0)).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_cut_off_at_timeout() {
        let probe = Arc::new(ScriptedProbe::new(vec![healthy()]).with_delay(Duration::from_secs(60)));
        let exec = executor(probe.clone());
        let ep = Endpoint { timeout: 5, ..endpoint(0) };

        let result = exec.execute(&ep).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.latency, Duration::from_secs(5));
        assert!(result.error.unwrap().contains("timed out"));
    }

    async fn serve_status(status_line: &'static str) -> String {
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

    #[tokio::test]
    async fn test_http_success_codes_end_to_end() {
        let prober = Arc::new(NetworkProber::new(None).unwrap().without_jitter());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        let exec = CheckExecutor::new(prober, clock);

        let created = Endpoint {
            target: serve_status("201 Created").await,
            probe_type: ProbeType::Http,
            success_codes: "200,201,204".to_string(),
            retry_count: 0,
            ..endpoint(0)
        };
        let result = exec.execute(&created).await;
        assert_eq!(result.status, CheckStatus::Healthy);
        assert_eq!(result.status_code, Some(201));

        let failing = Endpoint {
            target: serve_status("500 Internal Server Error").await,
            ..created.clone()
        };
        let result = exec.execute(&failing).await;
        assert_eq!(result.status, CheckStatus::Degraded);
        assert_eq!(result.status_code, Some(500));

        // Accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let silent = Endpoint {
            target: format!("http://{}/", addr),
            timeout: 1,
            ..created
        };
        let result = exec.execute(&silent).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert!(result.status_code.is_none());
    }
}
