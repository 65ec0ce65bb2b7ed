use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomrate_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomrate_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomrate_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomrate_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomrate_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomrate_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomrate_wal_flush_batch_size";

// ── Pricing ─────────────────────────────────────────────────────

/// Gauge: aggregate demand across all slots after the latest change.
pub const AGGREGATE_DEMAND: &str = "roomrate_aggregate_demand";

/// Counter: bookings confirmed.
pub const BOOKINGS_TOTAL: &str = "roomrate_bookings_total";

/// Counter: bookings cancelled.
pub const CANCELLATIONS_TOTAL: &str = "roomrate_cancellations_total";

/// Histogram: price stored on each confirmed booking.
pub const QUOTED_PRICE: &str = "roomrate_quoted_price";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRooms { .. } => "insert_rooms",
        Command::SetupRooms => "setup_rooms",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectRooms => "select_rooms",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectDemand { .. } => "select_demand",
        Command::SelectQuote { .. } => "select_quote",
    }
}
