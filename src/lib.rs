//! Pulsecheck - endpoint uptime monitoring.
//!
//! Probes HTTP(S), TCP, ICMP and DNS endpoints on a schedule, records
//! every check, and keeps a per-endpoint status and uptime view.

pub mod checker;
pub mod clock;
pub mod config;
pub mod db;
pub mod probe;
pub mod scheduler;
pub mod uptime;

pub use checker::CheckExecutor;
pub use clock::{Clock, SystemClock};
pub use config::{Config, MonitorConfig};
pub use db::{CheckResult, CheckStatus, Endpoint, Plan, ResultStore, SqliteStore, StoreError};
pub use probe::{NetworkProber, Probe, ProbeType};
pub use scheduler::{EndpointStatus, Monitor, MonitorError, MonitorEvent, MonitorPhase};
pub use uptime::{UptimeAggregator, UptimeSummary};
