//! Prometheus-backed metrics for the control plane. Serving `/metrics` is
//! the admin HTTP surface's job (an external collaborator); this module
//! only owns the [`prometheus::Registry`] an external server would scrape.

use crate::error::{Result, XlbError};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,
    pub bytes_forwarded_total: Counter<u64>,
    pub packets_forwarded_total: Counter<u64>,

    pub weight_pushes_total: Counter<u64>,
    pub health_transitions_total: Counter<u64>,
    pub reload_outcomes_total: Counter<u64>,
    pub drain_events_total: Counter<u64>,
    pub circuit_transitions_total: Counter<u64>,
    pub conntrack_cleanup_deletions_total: Counter<u64>,

    pub errors_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("xlb_connections_total")
                .with_description("Total number of connections tracked")
                .build(),
            connections_active: meter
                .i64_up_down_counter("xlb_connections_active")
                .with_description("Number of connections currently tracked")
                .build(),
            bytes_forwarded_total: meter
                .u64_counter("xlb_bytes_forwarded_total")
                .with_description("Total bytes forwarded, summed across both directions")
                .build(),
            packets_forwarded_total: meter
                .u64_counter("xlb_packets_forwarded_total")
                .with_description("Total packets forwarded, summed across both directions")
                .build(),

            weight_pushes_total: meter
                .u64_counter("xlb_weight_pushes_total")
                .with_description("Total number of weight vectors pushed to maps")
                .build(),
            health_transitions_total: meter
                .u64_counter("xlb_health_transitions_total")
                .with_description("Total number of target health state transitions")
                .build(),
            reload_outcomes_total: meter
                .u64_counter("xlb_reload_outcomes_total")
                .with_description("Total number of config reload attempts, by outcome")
                .build(),
            drain_events_total: meter
                .u64_counter("xlb_drain_events_total")
                .with_description("Total number of drain lifecycle events")
                .build(),
            circuit_transitions_total: meter
                .u64_counter("xlb_circuit_transitions_total")
                .with_description("Total number of circuit breaker state transitions")
                .build(),
            conntrack_cleanup_deletions_total: meter
                .u64_counter("xlb_conntrack_cleanup_deletions_total")
                .with_description("Total number of stale conntrack entries deleted by the cleanup loop")
                .build(),

            errors_total: meter
                .u64_counter("xlb_errors_total")
                .with_description("Total number of background task errors")
                .build(),
        }
    }
}

/// Builds the OpenTelemetry meter provider with a Prometheus exporter bridge
/// and returns both the typed [`Metrics`] handle and the registry an
/// external admin-HTTP server scrapes.
pub fn init_metrics() -> Result<(Arc<Metrics>, Registry)> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| XlbError::Metrics(e.to_string()))?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider);

    let meter = global::meter("xlb");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}
