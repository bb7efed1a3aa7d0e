use std::marker::PhantomData;
use std::sync::Arc;

use super::backend::{MapBackend, MapKind};
use super::codec::{AsKeyBytes, AsValueBytes, FromKeyBytes};
use crate::error::Result;

/// Typed CRUD over a single named map. `K`/`V` are the `xlb-wire` entities;
/// this is the only place their byte layout is touched.
pub struct MapFacade<B, K, V> {
    backend: Arc<B>,
    name: &'static str,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<B: MapBackend, K: AsKeyBytes + FromKeyBytes, V: AsValueBytes> MapFacade<B, K, V> {
    pub fn new(backend: Arc<B>, name: &'static str, kind: MapKind, key_size: u32, value_size: u32, max_entries: u32) -> Result<Self> {
        backend.create(name, kind, key_size, value_size, max_entries)?;
        Ok(Self {
            backend,
            name,
            _kv: PhantomData,
        })
    }

    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        self.backend
            .update(self.name, &key.as_key_bytes(), &value.as_value_bytes())
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        match self.backend.lookup(self.name, &key.as_key_bytes())? {
            Some(bytes) => Ok(Some(V::from_value_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, key: &K) -> Result<()> {
        self.backend.delete(self.name, &key.as_key_bytes())
    }

    pub fn list(&self) -> Result<Vec<(K, V)>> {
        self.backend
            .iterate(self.name)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_key_bytes(&k)?, V::from_value_bytes(&v)?)))
            .collect()
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close(self.name)
    }
}

/// How a per-CPU value aggregates into a single logical reading. The
/// packet path writes independently per CPU to avoid cross-CPU locking;
/// user space sums counters and takes the maximum timestamp to get a
/// consistent whole-connection view.
pub trait PerCpuAggregate: Sized {
    fn aggregate(per_cpu: &[Self]) -> Self;
}

/// A map whose values are read per-CPU and folded into one logical value:
/// conntrack and rate-limit-bucket maps.
pub struct PerCpuMapFacade<B, K, V> {
    backend: Arc<B>,
    name: &'static str,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<B: MapBackend, K: AsKeyBytes + FromKeyBytes, V: AsValueBytes + PerCpuAggregate> PerCpuMapFacade<B, K, V> {
    pub fn new(backend: Arc<B>, name: &'static str, kind: MapKind, key_size: u32, value_size: u32, max_entries: u32) -> Result<Self> {
        debug_assert!(kind.is_per_cpu());
        backend.create(name, kind, key_size, value_size, max_entries)?;
        Ok(Self {
            backend,
            name,
            _kv: PhantomData,
        })
    }

    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        self.backend
            .update(self.name, &key.as_key_bytes(), &value.as_value_bytes())
    }

    /// Reads every CPU slot for `key` and folds them with [`PerCpuAggregate`].
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let slots = self.backend.lookup_per_cpu(self.name, &key.as_key_bytes())?;
        match slots {
            Some(slots) if !slots.is_empty() => {
                let decoded = slots
                    .iter()
                    .map(|b| V::from_value_bytes(b))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(V::aggregate(&decoded)))
            }
            _ => Ok(None),
        }
    }

    pub fn remove(&self, key: &K) -> Result<()> {
        self.backend.delete(self.name, &key.as_key_bytes())
    }

    pub fn list(&self) -> Result<Vec<(K, V)>> {
        self.backend
            .iterate_per_cpu(self.name)?
            .into_iter()
            .map(|(k, per_cpu)| {
                let key = K::from_key_bytes(&k)?;
                let decoded = per_cpu
                    .iter()
                    .map(|b| V::from_value_bytes(b))
                    .collect::<Result<Vec<_>>>()?;
                Ok((key, V::aggregate(&decoded)))
            })
            .collect()
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close(self.name)
    }
}

impl PerCpuAggregate for xlb_wire::classic::ConntrackValue {
    /// Sums forward/reverse packet and byte counters, takes the maximum
    /// `last_seen_ns`, and takes the first non-zero NAT/original
    /// destination (writes are idempotent but may be zero on unused CPUs).
    fn aggregate(per_cpu: &[Self]) -> Self {
        let mut out = Self::default();
        for (i, v) in per_cpu.iter().enumerate() {
            if i == 0 {
                out.created_ns = v.created_ns;
                out.proxy_protocol = v.proxy_protocol;
            }
            if out.orig_dst_ip == 0 && v.orig_dst_ip != 0 {
                out.orig_dst_ip = v.orig_dst_ip;
                out.orig_dst_port = v.orig_dst_port;
            }
            if out.nat_dst_ip == 0 && v.nat_dst_ip != 0 {
                out.nat_dst_ip = v.nat_dst_ip;
                out.nat_dst_port = v.nat_dst_port;
            }
            out.packets_fwd += v.packets_fwd;
            out.packets_rev += v.packets_rev;
            out.bytes_fwd += v.bytes_fwd;
            out.bytes_rev += v.bytes_rev;
            out.last_seen_ns = out.last_seen_ns.max(v.last_seen_ns);
            out.created_ns = if out.created_ns == 0 {
                v.created_ns
            } else {
                out.created_ns.min(if v.created_ns == 0 { u64::MAX } else { v.created_ns })
            };
        }
        out
    }
}

impl PerCpuAggregate for xlb_wire::classic::RateLimitBucketValue {
    fn aggregate(per_cpu: &[Self]) -> Self {
        let mut out = Self::default();
        for v in per_cpu {
            out.tokens_scaled += v.tokens_scaled;
            out.last_update_ns = out.last_update_ns.max(v.last_update_ns);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::mock::MockMapBackend;
    use xlb_wire::classic::{ConntrackKey, ConntrackValue, LpmKey, WeightedRouteValue, RouteTargetSlot};

    #[test]
    fn put_get_remove_round_trip() {
        let backend = Arc::new(MockMapBackend::new(1));
        let facade: MapFacade<_, LpmKey, WeightedRouteValue> =
            MapFacade::new(backend, "routes", MapKind::LpmTrie, 8, 72, 1024).unwrap();

        let key = LpmKey { prefix_len: 24, ip: 0x0a000000 };
        let mut targets = [RouteTargetSlot::default(); 8];
        targets[0] = RouteTargetSlot { ip: 0x0a000001, port: 80, cumulative_weight: 100 };
        let value = WeightedRouteValue::new(1, 0, targets).unwrap();

        assert!(facade.get(&key).unwrap().is_none());
        facade.put(&key, &value).unwrap();
        assert_eq!(facade.get(&key).unwrap().unwrap(), value);
        facade.remove(&key).unwrap();
        assert!(facade.get(&key).unwrap().is_none());
    }

    #[test]
    fn per_cpu_conntrack_sums_counters_and_takes_max_timestamp() {
        let backend = Arc::new(MockMapBackend::new(4));
        let facade: PerCpuMapFacade<_, ConntrackKey, ConntrackValue> =
            PerCpuMapFacade::new(backend.clone(), "conntrack", MapKind::PerCpuHash, 16, 128, 4096).unwrap();

        let key = ConntrackKey { src_ip: 1, dst_ip: 2, src_port: 3, dst_port: 4, protocol: 6 };
        for cpu in 0..4 {
            let value = ConntrackValue {
                nat_dst_ip: 9,
                nat_dst_port: 80,
                packets_fwd: 1,
                bytes_fwd: 100,
                last_seen_ns: 1000 + cpu as u64,
                ..Default::default()
            };
            backend.put_on_cpu(cpu, "conntrack", &key.as_key_bytes(), &value.as_value_bytes());
        }

        let aggregated = facade.get(&key).unwrap().unwrap();
        assert_eq!(aggregated.packets_fwd, 4);
        assert_eq!(aggregated.bytes_fwd, 400);
        assert_eq!(aggregated.last_seen_ns, 1003);
        assert_eq!(aggregated.nat_dst_ip, 9);
    }
}
