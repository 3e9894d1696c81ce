// observability/metrics.rs - Prometheus Metrics

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Handle to the Prometheus recorder
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Session lifecycle metrics
pub struct SessionMetrics;

impl SessionMetrics {
    pub const CREATED_TOTAL: &'static str = "rpc_sessions_created_total";
    pub const CLOSED_TOTAL: &'static str = "rpc_sessions_closed_total";
    pub const ACTIVE: &'static str = "rpc_sessions_active";
}

/// Conformance check metrics
pub struct ConformanceMetrics;

impl ConformanceMetrics {
    pub const ACCEPTED_TOTAL: &'static str = "rpc_messages_accepted_total";
    pub const VIOLATIONS_TOTAL: &'static str = "rpc_protocol_violations_total";
}

/// Install the global Prometheus recorder
///
/// No HTTP endpoint is started; callers render the handle wherever they
/// expose metrics.
pub fn init_metrics() -> Result<MetricsHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        SessionMetrics::CREATED_TOTAL,
        "Total number of sessions created"
    );
    describe_counter!(
        SessionMetrics::CLOSED_TOTAL,
        "Total number of sessions completed or aborted"
    );
    describe_gauge!(
        SessionMetrics::ACTIVE,
        "Current number of live sessions"
    );
    describe_counter!(
        ConformanceMetrics::ACCEPTED_TOTAL,
        "Total number of messages accepted by the conformance engine"
    );
    describe_counter!(
        ConformanceMetrics::VIOLATIONS_TOTAL,
        "Total number of rejected message attempts"
    );

    tracing::info!("Metrics recorder installed");
    Ok(MetricsHandle { handle })
}

// Recording functions

/// Record a session being created
pub fn record_session_created(protocol: &str) {
    counter!(SessionMetrics::CREATED_TOTAL, "protocol" => protocol.to_string()).increment(1);
    gauge!(SessionMetrics::ACTIVE, "protocol" => protocol.to_string()).increment(1.0);
}

/// Record a session leaving the live table
pub fn record_session_closed(protocol: &str, outcome: &str) {
    counter!(
        SessionMetrics::CLOSED_TOTAL,
        "protocol" => protocol.to_string(),
        "outcome" => outcome.to_string()
    ).increment(1);
    gauge!(SessionMetrics::ACTIVE, "protocol" => protocol.to_string()).decrement(1.0);
}

/// Record an accepted message
pub fn record_attempt(protocol: &str, label: &str) {
    counter!(
        ConformanceMetrics::ACCEPTED_TOTAL,
        "protocol" => protocol.to_string(),
        "label" => label.to_string()
    ).increment(1);
}

/// Record a rejected message attempt
pub fn record_violation(protocol: &str, kind: &str) {
    counter!(
        ConformanceMetrics::VIOLATIONS_TOTAL,
        "protocol" => protocol.to_string(),
        "kind" => kind.to_string()
    ).increment(1);
}
