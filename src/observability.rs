use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations executed. Labels: op, status.
pub const OPS_TOTAL: &str = "posada_ops_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "posada_op_duration_seconds";

/// Counter: reservations committed (create + update).
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "posada_reservations_committed_total";

/// Counter: proposals rejected because the room was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "posada_reservation_conflicts_total";

/// Counter: client-index writes that failed after a reservation commit.
pub const CLIENT_LINK_FAILURES_TOTAL: &str = "posada_client_link_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "posada_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "posada_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "posada_connections_rejected_total";

/// Gauge: contacts queued for client-index repair.
pub const CLIENT_REPAIRS_PENDING: &str = "posada_client_repairs_pending";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "posada_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "posada_wal_flush_batch_size";

/// Counter: snapshot change markers dropped on publish-queue overflow.
pub const PUBLISH_DROPPED_TOTAL: &str = "posada_publish_dropped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CreateReservation { .. } => "create_reservation",
        Request::UpdateReservation { .. } => "update_reservation",
        Request::DeleteReservation { .. } => "delete_reservation",
        Request::SetPrice { .. } => "set_price",
        Request::AddAddon { .. } => "add_addon",
        Request::RemoveAddon { .. } => "remove_addon",
        Request::AddHoliday { .. } => "add_holiday",
        Request::RemoveHoliday { .. } => "remove_holiday",
        Request::ListRooms => "list_rooms",
        Request::ListPrices => "list_prices",
        Request::ListAddons => "list_addons",
        Request::ListHolidays => "list_holidays",
        Request::ListClients => "list_clients",
        Request::ListReservations => "list_reservations",
        Request::GetReservation { .. } => "get_reservation",
        Request::IsOccupied { .. } => "is_occupied",
        Request::MonthOccupancy { .. } => "month_occupancy",
        Request::BusinessSummary => "business_summary",
        Request::MonthSummary { .. } => "month_summary",
        Request::Ingest { .. } => "ingest",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe { .. } => "unsubscribe",
    }
}
