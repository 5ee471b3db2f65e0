use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations successfully booked.
pub const RESERVATIONS_TOTAL: &str = "cadenza_reservations_total";

/// Counter: booking attempts rejected on conflict.
pub const CONFLICTS_TOTAL: &str = "cadenza_conflicts_total";

/// Counter: cancellations processed. Labels: tier.
pub const CANCELLATIONS_TOTAL: &str = "cadenza_cancellations_total";

/// Counter: fee computations where more than one tier condition matched.
pub const POLICY_AMBIGUITY_TOTAL: &str = "cadenza_policy_ambiguity_total";

/// Histogram: request handling latency in seconds. Labels: request.
pub const REQUEST_DURATION_SECONDS: &str = "cadenza_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "cadenza_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "cadenza_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "cadenza_connections_rejected_total";

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
