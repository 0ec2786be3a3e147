//! Scheduler module: one monitoring session per subject.

mod session;

pub use session::{EndpointStatus, StatusChange};

use session::{Merge, Session};

use crate::checker::CheckExecutor;
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::db::{CheckResult, CheckStatus, ResultStore, StoreError};
use crate::uptime::{UptimeAggregator, DEFAULT_WINDOW_DAYS};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle of a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Loading,
    Active,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyActive,
    #[error("monitor is not running")]
    NotActive,
}

/// Notifications published while a session runs.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A result was merged into the in-memory state.
    Checked(CheckResult),
    StatusChanged {
        endpoint_id: i64,
        from: Option<CheckStatus>,
        to: CheckStatus,
        /// Set for transitions into a failing state on endpoints that asked
        /// to be notified.
        notify: bool,
    },
}

impl From<StatusChange> for MonitorEvent {
    fn from(change: StatusChange) -> Self {
        MonitorEvent::StatusChanged {
            endpoint_id: change.endpoint_id,
            from: change.from,
            to: change.to,
            notify: change.notify,
        }
    }
}

/// Next event of a subscription, or `None` once the monitor is gone.
///
/// A subscriber that fell behind skips what it missed and keeps going.
pub async fn next_event(events: &mut broadcast::Receiver<MonitorEvent>) -> Option<MonitorEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("Event subscriber fell behind, missed {} events", missed);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// State shared between the monitor handle, its timer task and in-flight cycles.
struct Shared {
    subject_id: String,
    store: Arc<dyn ResultStore>,
    executor: Arc<CheckExecutor>,
    aggregator: UptimeAggregator,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    session: RwLock<Session>,
    /// Held for the whole of a check cycle.
    cycle: Arc<Mutex<()>>,
    events: broadcast::Sender<MonitorEvent>,
}

#[derive(Default)]
struct Control {
    stop_tx: Option<broadcast::Sender<()>>,
    timers: Option<JoinHandle<()>>,
}

/// Periodically checks every enabled endpoint of one subject.
pub struct Monitor {
    shared: Arc<Shared>,
    phase: watch::Sender<MonitorPhase>,
    control: Mutex<Control>,
}

impl Monitor {
    pub fn new(
        subject_id: impl Into<String>,
        store: Arc<dyn ResultStore>,
        executor: Arc<CheckExecutor>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase, _) = watch::channel(MonitorPhase::Idle);
        let aggregator = UptimeAggregator::new(store.clone(), clock.clone());

        Self {
            shared: Arc::new(Shared {
                subject_id: subject_id.into(),
                store,
                executor,
                aggregator,
                clock,
                config,
                session: RwLock::new(Session::default()),
                cycle: Arc::new(Mutex::new(())),
                events,
            }),
            phase,
            control: Mutex::new(Control::default()),
        }
    }

    /// Load the subject's endpoints and start the check and resync timers.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut control = self.control.lock().await;
        if *self.phase.borrow() != MonitorPhase::Idle {
            return Err(MonitorError::AlreadyActive);
        }

        self.phase.send_replace(MonitorPhase::Loading);
        let loaded = self.shared.resync().await.unwrap_or(0);

        tracing::info!(
            "Monitor: Starting for {} with {} endpoints",
            self.shared.subject_id,
            loaded
        );

        // Dropping the sender also ends the timer task
        let (stop_tx, stop_rx) = broadcast::channel(1);
        control.timers = Some(tokio::spawn(run_timers(self.shared.clone(), stop_rx)));
        control.stop_tx = Some(stop_tx);

        self.phase.send_replace(MonitorPhase::Active);
        Ok(())
    }

    /// Cancel the timers. Checks already dispatched still finish and are
    /// persisted.
    pub async fn stop(&self) {
        let _ = self.halt().await;
    }

    /// Stop, then wait until every check already dispatched has finished
    /// and been stored.
    pub async fn shutdown(&self) {
        if let Some(timers) = self.halt().await {
            if let Err(e) = timers.await {
                tracing::error!("Monitor: Timer task failed: {}", e);
            }
        }
        let _idle = self.shared.cycle.lock().await;
        tracing::debug!("Monitor: Drained checks for {}", self.shared.subject_id);
    }

    async fn halt(&self) -> Option<JoinHandle<()>> {
        let mut control = self.control.lock().await;
        if let Some(stop_tx) = control.stop_tx.take() {
            let _ = stop_tx.send(());
            tracing::info!("Monitor: Stopped for {}", self.shared.subject_id);
        }
        self.phase.send_replace(MonitorPhase::Idle);
        control.timers.take()
    }

    /// Resync, then run one check cycle and wait for it.
    pub async fn refresh_now(&self) -> Result<Vec<CheckResult>, MonitorError> {
        if *self.phase.borrow() != MonitorPhase::Active {
            return Err(MonitorError::NotActive);
        }

        let _ = self.shared.resync().await;
        let _guard = self.shared.cycle.lock().await;
        Ok(self.shared.check_cycle().await)
    }

    /// Reload the subject's endpoints from storage.
    pub async fn resync(&self) -> Result<usize, StoreError> {
        self.shared.resync().await
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<MonitorPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    pub fn subject_id(&self) -> &str {
        &self.shared.subject_id
    }

    pub fn aggregator(&self) -> &UptimeAggregator {
        &self.shared.aggregator
    }

    pub async fn statuses(&self) -> Vec<EndpointStatus> {
        self.shared.session.read().await.statuses()
    }

    pub async fn status(&self, endpoint_id: i64) -> Option<EndpointStatus> {
        self.shared.session.read().await.status(endpoint_id)
    }

    /// Completion time of the last check cycle.
    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        self.shared.session.read().await.last_update()
    }
}

impl Shared {
    async fn resync(&self) -> Result<usize, StoreError> {
        let endpoints = match self.store.list_enabled_endpoints(&self.subject_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!("Monitor: Failed to load endpoints for {}: {}", self.subject_id, e);
                return Err(e);
            }
        };

        let mut loaded = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let uptime = self.aggregator.compute_uptime(endpoint.id, DEFAULT_WINDOW_DAYS).await;
            loaded.push((endpoint, uptime));
        }

        let count = loaded.len();
        self.session.write().await.replace_endpoints(loaded);
        tracing::debug!("Monitor: Loaded {} endpoints for {}", count, self.subject_id);
        Ok(count)
    }

    /// Check every loaded endpoint. Callers hold the `cycle` lock.
    async fn check_cycle(self: &Arc<Self>) -> Vec<CheckResult> {
        let endpoints = self.session.read().await.endpoints();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1)));
        let mut tasks = JoinSet::new();

        for endpoint in endpoints {
            let shared = self.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                // Held until the result is stored
                let _permit = semaphore.acquire_owned().await.ok();

                let result = shared.executor.execute(&endpoint).await;
                if let Err(e) = shared.store.append_check_result(&result).await {
                    tracing::error!("Monitor: Failed to store result for {}: {}", endpoint.name, e);
                }
                result
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    self.merge(&result).await;
                    results.push(result);
                }
                Err(e) => tracing::error!("Monitor: Check task failed: {}", e),
            }
        }

        self.session.write().await.mark_updated(self.clock.now());
        results
    }

    async fn merge(&self, result: &CheckResult) {
        let merged = self.session.write().await.merge_result(result);

        match merged {
            Merge::Applied(change) => {
                let _ = self.events.send(MonitorEvent::Checked(result.clone()));
                if let Some(change) = change {
                    let _ = self.events.send(change.into());
                }
            }
            Merge::Unknown => {
                tracing::debug!("Dropping result for unloaded endpoint {}", result.endpoint_id);
            }
            Merge::Stale => {
                tracing::debug!("Dropping stale result for endpoint {}", result.endpoint_id);
            }
        }
    }
}

/// Drive the check and resync timers until stopped.
async fn run_timers(shared: Arc<Shared>, mut stop_rx: broadcast::Receiver<()>) {
    let check_every = shared.config.check_interval;
    let resync_every = shared.config.resync_interval;
    let now = Instant::now();

    let mut check = interval_at(now + check_every, check_every);
    check.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut resync = interval_at(now + resync_every, resync_every);
    resync.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = resync.tick() => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _ = shared.resync().await;
                });
            }
            _ = check.tick() => {
                // Taken before spawning so a drain always sees dispatched cycles
                let guard = match shared.cycle.clone().try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        tracing::warn!("Skipping check cycle for {} due to overlap", shared.subject_id);
                        continue;
                    }
                };

                let shared = shared.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    shared.check_cycle().await;
                });
            }
        }
    }

    tracing::debug!("Monitor: Timers stopped for {}", shared.subject_id);
}
