use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use seatd::auth::UserDirectory;
use seatd::clock::SystemClock;
use seatd::config::Config;
use seatd::engine::Engine;
use seatd::notify::NotifyHub;
use seatd::scheduler::{self, LifecycleScheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    seatd::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let users = Arc::new(UserDirectory::new());
    let engine = Arc::new(
        Engine::new(
            config.wal_path(),
            Arc::new(NotifyHub::new()),
            users,
            Arc::new(SystemClock),
        )?
        .with_lock_timeout(config.lock_timeout),
    );

    info!("seatd started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  events: {}", engine.event_count());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(LifecycleScheduler::new(engine.clone()).run(config.sweep_interval));
    let compactor = tokio::spawn(scheduler::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();

    match engine.compact_wal().await {
        Ok(written) => info!("final compaction: {written} records"),
        Err(e) => tracing::warn!("final compaction failed: {e}"),
    }

    info!("seatd stopped");
    Ok(())
}
