//! Connection-tracking views over the per-CPU conntrack map (§4.6):
//! aggregated read models keyed by source, target, and protocol, plus a
//! background cleanup loop that evicts entries the packet path has gone
//! quiet on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use xlb_wire::classic::ConntrackKey;

use crate::error::Result;
use crate::maps::{MapBackend, PerCpuMapFacade};
use crate::telemetry::Metrics;

pub type ConntrackFacade<B> = PerCpuMapFacade<B, ConntrackKey, xlb_wire::classic::ConntrackValue>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceAggregate {
    pub connections: u64,
    pub packets_fwd: u64,
    pub packets_rev: u64,
    pub bytes_fwd: u64,
    pub bytes_rev: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetAggregate {
    pub connections: u64,
    pub packets_fwd: u64,
    pub packets_rev: u64,
    pub bytes_fwd: u64,
    pub bytes_rev: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolAggregate {
    pub connections: u64,
    pub packets_fwd: u64,
    pub packets_rev: u64,
}

/// Owns the aggregated read models for one proxy's conntrack entries and
/// the stale-entry cleanup loop.
pub struct ConntrackManager<B: MapBackend> {
    facade: Arc<ConntrackFacade<B>>,
    cleanup_interval: Duration,
    entry_timeout: Duration,
}

impl<B: MapBackend + Send + Sync + 'static> ConntrackManager<B> {
    pub fn new(facade: Arc<ConntrackFacade<B>>, cleanup_interval: Duration, entry_timeout: Duration) -> Self {
        Self { facade, cleanup_interval, entry_timeout }
    }

    /// Snapshot of every live entry, grouped by source IP.
    pub fn by_source(&self) -> Result<HashMap<u32, SourceAggregate>> {
        let mut out: HashMap<u32, SourceAggregate> = HashMap::new();
        for (key, value) in self.facade.list()? {
            let entry = out.entry(key.src_ip).or_default();
            entry.connections += 1;
            entry.packets_fwd += value.packets_fwd;
            entry.packets_rev += value.packets_rev;
            entry.bytes_fwd += value.bytes_fwd;
            entry.bytes_rev += value.bytes_rev;
        }
        Ok(out)
    }

    /// Snapshot grouped by the NAT destination (the real target IP:port),
    /// falling back to the raw `dst_ip` if no NAT rewrite was recorded.
    pub fn by_target(&self) -> Result<HashMap<(u32, u16), TargetAggregate>> {
        let mut out: HashMap<(u32, u16), TargetAggregate> = HashMap::new();
        for (key, value) in self.facade.list()? {
            let target_key = if value.nat_dst_ip != 0 {
                (value.nat_dst_ip, value.nat_dst_port)
            } else {
                (key.dst_ip, key.dst_port)
            };
            let entry = out.entry(target_key).or_default();
            entry.connections += 1;
            entry.packets_fwd += value.packets_fwd;
            entry.packets_rev += value.packets_rev;
            entry.bytes_fwd += value.bytes_fwd;
            entry.bytes_rev += value.bytes_rev;
        }
        Ok(out)
    }

    /// Snapshot grouped by IP protocol number (6 = TCP, 17 = UDP, ...).
    pub fn by_protocol(&self) -> Result<HashMap<u8, ProtocolAggregate>> {
        let mut out: HashMap<u8, ProtocolAggregate> = HashMap::new();
        for (key, value) in self.facade.list()? {
            let entry = out.entry(key.protocol).or_default();
            entry.connections += 1;
            entry.packets_fwd += value.packets_fwd;
            entry.packets_rev += value.packets_rev;
        }
        Ok(out)
    }

    /// Deletes every entry whose `last_seen_ns` is older than
    /// `entry_timeout` relative to `now_ns`. Returns the number deleted.
    pub fn cleanup_once(&self, now_ns: u64) -> Result<usize> {
        let timeout_ns = self.entry_timeout.as_nanos() as u64;
        let mut deleted = 0;
        for (key, value) in self.facade.list()? {
            if now_ns.saturating_sub(value.last_seen_ns) > timeout_ns {
                self.facade.remove(&key)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Runs [`cleanup_once`](Self::cleanup_once) on `cleanup_interval` until
    /// `stop` is cancelled.
    pub async fn run_cleanup_loop(self: Arc<Self>, stop: CancellationToken, metrics: Arc<Metrics>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("conntrack cleanup loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let now_ns = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_nanos() as u64;
                    match self.cleanup_once(now_ns) {
                        Ok(deleted) if deleted > 0 => {
                            info!(deleted, "conntrack cleanup deleted stale entries");
                            metrics.conntrack_cleanup_deletions_total.add(deleted as u64, &[]);
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(%err, "conntrack cleanup failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::backend::MapKind;
    use crate::maps::mock::MockMapBackend;
    use crate::maps::codec::{AsKeyBytes, AsValueBytes};
    use xlb_wire::classic::ConntrackValue;

    fn facade(cpus: usize) -> Arc<ConntrackFacade<MockMapBackend>> {
        let backend = Arc::new(MockMapBackend::new(cpus));
        Arc::new(ConntrackFacade::new(backend, "conntrack", MapKind::PerCpuHash, 16, 128, 4096).unwrap())
    }

    #[test]
    fn by_source_sums_across_keys_sharing_a_source_ip() {
        let facade = facade(1);
        let key_a = ConntrackKey { src_ip: 1, dst_ip: 10, src_port: 100, dst_port: 80, protocol: 6 };
        let key_b = ConntrackKey { src_ip: 1, dst_ip: 20, src_port: 101, dst_port: 80, protocol: 6 };
        facade.put(&key_a, &ConntrackValue { packets_fwd: 2, ..Default::default() }).unwrap();
        facade.put(&key_b, &ConntrackValue { packets_fwd: 3, ..Default::default() }).unwrap();

        let manager = ConntrackManager::new(facade, Duration::from_secs(60), Duration::from_secs(120));
        let by_source = manager.by_source().unwrap();
        assert_eq!(by_source[&1].connections, 2);
        assert_eq!(by_source[&1].packets_fwd, 5);
    }

    #[test]
    fn cleanup_deletes_only_stale_entries() {
        let facade = facade(1);
        let fresh = ConntrackKey { src_ip: 1, dst_ip: 10, src_port: 100, dst_port: 80, protocol: 6 };
        let stale = ConntrackKey { src_ip: 2, dst_ip: 10, src_port: 101, dst_port: 80, protocol: 6 };
        facade.put(&fresh, &ConntrackValue { last_seen_ns: 1_000_000_000, ..Default::default() }).unwrap();
        facade.put(&stale, &ConntrackValue { last_seen_ns: 0, ..Default::default() }).unwrap();

        let manager = ConntrackManager::new(facade.clone(), Duration::from_secs(60), Duration::from_secs(60));
        let deleted = manager.cleanup_once(1_000_000_000 + 60_000_000_001).unwrap();
        assert_eq!(deleted, 1);
        assert!(facade.list().unwrap().iter().all(|(k, _)| *k == fresh));
    }
}
