use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::info;

use crate::clock::Clock;
use crate::engine::Engine;
use crate::notify::Notifier;

/// Send due reminders once. Returns how many notices were delivered.
pub async fn sweep_reminders(
    engine: &Engine,
    notifier: &dyn Notifier,
    clock: &dyn Clock,
    lead: TimeDelta,
) -> usize {
    let mut sent = 0;
    for notice in engine.collect_due_reminders(&clock.now(), lead).await {
        if engine.deliver(notifier, &notice).await {
            metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
            sent += 1;
        }
    }
    sent
}

/// Background task that reminds teams of meetings starting soon.
pub async fn run_reminder_sweep(
    engine: Arc<Engine>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    every: Duration,
    lead: TimeDelta,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let sent = sweep_reminders(&engine, notifier.as_ref(), clock.as_ref(), lead).await;
        if sent > 0 {
            info!("sent {sent} meeting reminders");
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
