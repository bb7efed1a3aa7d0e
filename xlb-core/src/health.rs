//! Per-target health probing (§4.8): one background task per
//! [`crate::config::WeightedTarget`] that declares a health-check
//! descriptor. The prober itself is the "external collaborator" named in
//! §1 — it knows nothing about weights or maps, and reports exclusively
//! through [`crate::orchestrator::WeightOrchestrator::record_health`], the
//! narrow callback seam the orchestrator exposes.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{HealthCheckConfig, HealthCheckKind, Target};
use crate::maps::MapBackend;
use crate::orchestrator::WeightOrchestrator;

/// Issues one probe against `target` per `cfg`: a bare TCP connect, or for
/// `Http`, a connect followed by a minimal `GET` against `cfg.path` that
/// only checks the connection accepted bytes back (no status-line
/// parsing — L7 parsing beyond the SNI hash is out of scope, per §1).
/// A timeout counts as a failure.
async fn probe_once(target: Target, cfg: &HealthCheckConfig) -> bool {
    let addr = SocketAddrV4::new(target.ip, target.port);
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await.ok()?;
        if cfg.kind == HealthCheckKind::Http {
            let path = cfg.path.as_deref().unwrap_or("/");
            let request = format!("GET {path} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n", target.ip);
            stream.write_all(request.as_bytes()).await.ok()?;
            let mut buf = [0u8; 1];
            stream.read(&mut buf).await.ok()?;
        }
        Some(())
    };
    tokio::time::timeout(cfg.timeout(), attempt).await.ok().flatten().is_some()
}

/// Runs the probe loop for one target until `stop` is cancelled. One of
/// these is spawned per health-checked target by [`crate::lifecycle`].
pub async fn run_prober<B: MapBackend + Send + Sync + 'static>(
    proxy_name: String,
    index: usize,
    target: Target,
    cfg: HealthCheckConfig,
    orchestrator: Arc<WeightOrchestrator<B>>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cfg.interval());
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!(proxy = %proxy_name, index, "health prober stopping");
                return;
            }
            _ = ticker.tick() => {
                let success = probe_once(target, &cfg).await;
                debug!(proxy = %proxy_name, index, ?target, success, "health probe attempt");
                let transitioned = orchestrator.record_health(index, success).await;
                if transitioned {
                    info!(proxy = %proxy_name, index, ?target, success, "target health transitioned");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_fails_against_a_closed_port() {
        let cfg = HealthCheckConfig {
            kind: HealthCheckKind::Tcp,
            path: None,
            interval_secs: 5,
            timeout_ms: 200,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            gradual_recovery: false,
        };
        // Port 1 is reserved and never listening in this sandbox.
        let target = Target { ip: std::net::Ipv4Addr::new(127, 0, 0, 1), port: 1 };
        assert!(!probe_once(target, &cfg).await);
    }

    #[tokio::test]
    async fn probe_succeeds_against_a_listening_tcp_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let cfg = HealthCheckConfig {
            kind: HealthCheckKind::Tcp,
            path: None,
            interval_secs: 5,
            timeout_ms: 500,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            gradual_recovery: false,
        };
        let target = Target { ip: std::net::Ipv4Addr::new(127, 0, 0, 1), port };
        assert!(probe_once(target, &cfg).await);
    }
}
