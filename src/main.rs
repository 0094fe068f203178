use std::sync::Arc;

use tracing::info;

use roombook::clock::{Clock, SystemClock};
use roombook::config::Config;
use roombook::engine::{Engine, ReservationValidator};
use roombook::notify::{LogNotifier, Notifier, NotifyHub};
use roombook::reminder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let validator = ReservationValidator::from_config(&config);
    let engine = Arc::new(Engine::new(config.wal_path(), notify, validator)?);

    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  open hours: {} - {} (UTC{})",
        config.open_hours.open.format("%H:%M"),
        config.open_hours.close.format("%H:%M"),
        config.site_offset
    );
    info!("  reminder lead: {} min", config.reminder_lead.num_minutes());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.site_offset));
    let sweep = tokio::spawn(reminder::run_reminder_sweep(
        engine.clone(),
        notifier,
        clock,
        config.sweep_interval,
        config.reminder_lead,
    ));
    let compactor = tokio::spawn(reminder::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    sweep.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}
