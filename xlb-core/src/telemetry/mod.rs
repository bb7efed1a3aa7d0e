//! Metrics and structured logging. Neither module serves HTTP: the admin
//! surface that scrapes `/metrics` is an external collaborator (§1) that
//! consumes the [`prometheus::Registry`] `init_metrics` returns.

pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, Metrics};
pub use tracing::{init_tracing_with_otel, shutdown_tracing};
