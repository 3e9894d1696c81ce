// observability/mod.rs - Tracing and Metrics

//! Observability module providing structured logging and Prometheus metrics.
//!
//! # Features
//!
//! - **Tracing**: Structured logging of session lifecycle and violations
//! - **Metrics**: Prometheus-compatible counters for sessions and attempts
//!
//! # Example
//!
//! ```ignore
//! use rpc_conformance::observability::{init_metrics, init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::default())?;
//! let handle = init_metrics()?;
//! println!("{}", handle.render());
//! ```

mod metrics;
mod tracing_setup;

pub use metrics::{
    init_metrics, record_attempt, record_session_closed, record_session_created,
    record_violation, ConformanceMetrics, MetricsHandle, SessionMetrics,
};

pub use tracing_setup::{init_tracing, TracingConfig, TracingFormat};
