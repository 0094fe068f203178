use std::net::SocketAddr;

use crate::engine::RejectReason;

// ── Reservation flow ────────────────────────────────────────────

/// Counter: reservations admitted and committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: proposals rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "roombook_reservations_rejected_total";

/// Counter: reservations removed through cancellation.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "roombook_reservations_cancelled_total";

/// Histogram: time spent holding a room's write lock during create, in seconds.
pub const CREATE_LOCK_SECONDS: &str = "roombook_create_lock_seconds";

// ── Notices ─────────────────────────────────────────────────────

/// Counter: notices the notifier failed to deliver. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "roombook_notifications_failed_total";

/// Counter: reminder notices handed to the notifier.
pub const REMINDERS_SENT_TOTAL: &str = "roombook_reminders_sent_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: rooms currently loaded.
pub const RESOURCES_ACTIVE: &str = "roombook_resources";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a rejection reason.
pub fn reason_label(reason: &RejectReason) -> &'static str {
    match reason {
        RejectReason::InvalidRange(_) => "invalid_range",
        RejectReason::OutOfHours { .. } => "out_of_hours",
        RejectReason::Expired => "expired",
        RejectReason::PermissionDenied => "permission_denied",
        RejectReason::ResourceInactive(_) => "resource_inactive",
        RejectReason::Conflict(_) => "conflict",
        RejectReason::NotFound(_) => "not_found",
        RejectReason::LimitExceeded(_) => "limit_exceeded",
    }
}
