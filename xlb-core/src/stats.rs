//! Stats ring-buffer consumer (§4.10): decodes [`StatsEvent`]s pushed by
//! the kernel programs, updates connection/byte/packet counters, and
//! emits one structured access-log line per event when
//! [`crate::config::AccessLogConfig::enabled`] is set.
//!
//! The ring buffer itself is an opaque external collaborator (§1), same as
//! [`crate::lifecycle::InterfaceAttacher`]: `xlb-ebpf-loader` implements
//! [`RingBufSource`] over a real `aya::maps::RingBuf`, this crate only
//! knows how to decode and react to what comes out of it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use xlb_wire::classic::{event_type, StatsEvent};

use crate::error::Result;
use crate::telemetry::Metrics;

/// Yields raw stats-event bytes as the kernel programs push them. Blocking
/// by contract (a real ring buffer is polled via an epoll-backed fd); the
/// consumer loop runs it on a blocking thread so it never stalls the
/// Tokio runtime's async workers.
pub trait RingBufSource: Send + Sync {
    /// Blocks for up to `timeout_ms` waiting for the next event. Returns
    /// `Ok(None)` on a timeout with nothing available (the normal, common
    /// case, letting the consumer loop re-check the stop signal), `Ok(Some(_))`
    /// with one event's raw bytes, or `Err` if the ring itself failed.
    fn next_event(&self, timeout_ms: u64) -> Result<Option<Vec<u8>>>;
}

const POLL_TIMEOUT_MS: u64 = 500;

/// Runs the consumer loop until `stop` is cancelled: pulls events off
/// `source`, decodes them, and folds them into `metrics` plus an optional
/// access-log line. A malformed event (§7: decode failure) is logged and
/// skipped rather than treated as fatal, since one corrupt event must not
/// take down stats collection for every other proxy.
pub async fn run_consumer(
    source: Arc<dyn RingBufSource>,
    metrics: Arc<Metrics>,
    access_log_enabled: bool,
    stop: CancellationToken,
) {
    loop {
        if stop.is_cancelled() {
            debug!("stats consumer stopping");
            return;
        }

        let source = source.clone();
        let poll = tokio::task::spawn_blocking(move || source.next_event(POLL_TIMEOUT_MS));
        let outcome = tokio::select! {
            _ = stop.cancelled() => {
                debug!("stats consumer stopping");
                return;
            }
            result = poll => result,
        };

        match outcome {
            Ok(Ok(Some(bytes))) => match StatsEvent::decode(&bytes) {
                Ok(event) => handle_event(&event, &metrics, access_log_enabled),
                Err(err) => {
                    warn!(%err, "dropping malformed stats event");
                    metrics.errors_total.add(1, &[]);
                }
            },
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                warn!(%err, "stats ring buffer read failed, retrying");
                metrics.errors_total.add(1, &[]);
            }
            Err(join_err) => {
                warn!(%join_err, "stats poll task panicked, retrying");
                metrics.errors_total.add(1, &[]);
            }
        }
    }
}

fn handle_event(event: &StatsEvent, metrics: &Metrics, access_log_enabled: bool) {
    match event.event_type {
        event_type::NEW_CONN => {
            metrics.connections_total.add(1, &[]);
            metrics.connections_active.add(1, &[]);
        }
        event_type::CONN_CLOSED => {
            metrics.connections_active.add(-1, &[]);
        }
        event_type::PERIODIC_STATS => {
            metrics.packets_forwarded_total.add(event.packets_fwd + event.packets_rev, &[]);
            metrics.bytes_forwarded_total.add(event.bytes_fwd + event.bytes_rev, &[]);
        }
        _ => {}
    }

    if access_log_enabled {
        tracing::info!(
            target: "xlb::access_log",
            event_type = event.event_type,
            src_ip = event.src_ip,
            src_port = event.src_port,
            dst_ip = event.dst_ip,
            dst_port = event.dst_port,
            target_ip = event.target_ip,
            target_port = event.target_port,
            packets_fwd = event.packets_fwd,
            bytes_fwd = event.bytes_fwd,
            packets_rev = event.packets_rev,
            bytes_rev = event.bytes_rev,
            "connection event",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedSource {
        events: Mutex<Vec<Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl RingBufSource for FixedSource {
        fn next_event(&self, _timeout_ms: u64) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.events.lock().unwrap().pop())
        }
    }

    #[tokio::test]
    async fn new_conn_event_increments_connection_counters() {
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let event = StatsEvent {
            event_type: event_type::NEW_CONN,
            timestamp_ns: 0,
            src_ip: 1,
            dst_ip: 2,
            src_port: 100,
            dst_port: 443,
            target_ip: 3,
            target_port: 8080,
            packets_fwd: 0,
            bytes_fwd: 0,
            packets_rev: 0,
            bytes_rev: 0,
        };
        handle_event(&event, &metrics, false);
        // No panics, counters are opaque OTel instruments in tests; the
        // real assertion here is that decoding and dispatch don't fail.
    }

    #[tokio::test]
    async fn consumer_stops_promptly_on_cancellation() {
        let (metrics, _registry) = crate::telemetry::init_metrics().unwrap();
        let source = Arc::new(FixedSource { events: Mutex::new(vec![]), calls: AtomicUsize::new(0) });
        let stop = CancellationToken::new();
        stop.cancel();
        run_consumer(source, metrics, false, stop).await;
    }
}
