//! Pulsecheck - runs a monitoring session for one subject until Ctrl-C.

use pulsecheck::scheduler::next_event;
use pulsecheck::{CheckExecutor, Config, Monitor, MonitorEvent, NetworkProber, SqliteStore, SystemClock};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsecheck=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load();
    let subject_id = cfg
        .subject_id
        .clone()
        .ok_or("PULSECHECK_SUBJECT must name the subject to monitor")?;
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if store.list_endpoints(&subject_id)?.is_empty() {
        tracing::warn!("No endpoints registered for {}", subject_id);
    }

    let clock = Arc::new(SystemClock);
    let prober = Arc::new(NetworkProber::new(cfg.dns_resolver)?);
    let executor = Arc::new(CheckExecutor::new(prober, clock.clone()));
    let monitor = Monitor::new(subject_id, store, executor, clock, cfg.monitor.clone());

    let mut events = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            if let MonitorEvent::StatusChanged { endpoint_id, from, to, notify } = event {
                if notify {
                    tracing::warn!("Endpoint {} is now {}", endpoint_id, to);
                } else {
                    tracing::info!(
                        "Endpoint {} changed from {} to {}",
                        endpoint_id,
                        from.map_or("unknown".to_string(), |s| s.to_string()),
                        to
                    );
                }
            }
        }
    });

    monitor.start().await?;
    tracing::info!(
        "Checking every {:?}, reloading endpoints every {:?}",
        cfg.monitor.check_interval,
        cfg.monitor.resync_interval
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    // Let the last cycle's results reach the store before the runtime goes away
    monitor.shutdown().await;

    Ok(())
}
