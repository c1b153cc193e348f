use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookhub_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookhub_query_duration_seconds";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: booking lifecycle outcomes. Labels: outcome
/// (requested, conflict, approved, rejected, canceled).
pub const BOOKINGS_TOTAL: &str = "bookhub_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookhub_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookhub_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookhub_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookhub_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookhub_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label per command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "register",
        Command::InsertProfile { .. } => "update_profile",
        Command::InsertPasswordChange { .. } => "change_password",
        Command::InsertCategory { .. } => "create_category",
        Command::InsertCategoryRename { .. } => "rename_category",
        Command::InsertResource { .. } => "create_resource",
        Command::InsertBooking { .. } => "create_booking",
        Command::InsertDecision { .. } => "decide_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::DeleteCategory { .. } => "delete_category",
        Command::DeleteUser { .. } => "delete_account",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectResources { .. } => "select_resources",
        Command::SelectCategories => "select_categories",
        Command::SelectUser { .. } => "select_user",
        Command::SelectLogin { .. } => "login",
        Command::SelectSession { .. } => "resolve_session",
    }
}
