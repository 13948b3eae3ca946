use std::net::SocketAddr;

// ── Allocation ──────────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "seatd_reservations_created_total";

/// Counter: reservation requests refused. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "seatd_reservations_rejected_total";

/// Counter: reservation status transitions. Labels: status.
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "seatd_reservation_transitions_total";

/// Counter: draws that hit an already-used reservation code.
pub const CODE_COLLISIONS_TOTAL: &str = "seatd_code_collisions_total";

// ── Catalog ─────────────────────────────────────────────────────

/// Gauge: events currently held by the engine.
pub const EVENTS_ACTIVE: &str = "seatd_events_active";

/// Counter: event status transitions. Labels: status.
pub const EVENT_TRANSITIONS_TOTAL: &str = "seatd_event_transitions_total";

/// Counter: events that failed to complete during a sweep.
pub const SWEEP_FAILURES_TOTAL: &str = "seatd_sweep_failures_total";

// ── Locks and WAL ───────────────────────────────────────────────

/// Counter: lock acquisitions abandoned after the bounded wait.
pub const LOCK_TIMEOUTS_TOTAL: &str = "seatd_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (changes per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
