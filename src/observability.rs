use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: booking rows created (a semester booking counts every week).
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: bookings moved to CANCELLED.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "roombook_bookings_cancelled_total";

/// Counter: rejected booking writes. Labels: reason.
pub const BOOKING_REJECTIONS_TOTAL: &str = "roombook_booking_rejections_total";

/// Counter: transactions whose writes were undone.
pub const TXN_ROLLBACKS_TOTAL: &str = "roombook_txn_rollbacks_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "roombook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertSemesterBooking { .. } => "insert_semester_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectHistory { .. } => "select_history",
        Command::SelectRooms { .. } => "select_rooms",
    }
}
