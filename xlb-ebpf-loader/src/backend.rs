//! [`AyaMapBackend`]: the `aya`-backed [`xlb_core::maps::MapBackend`].
//!
//! The kernel packet programs are compiled and shipped separately (§1); the
//! object this crate loads already declares every map named in §6 with the
//! kind and sizes the control plane expects. `create()` therefore doesn't
//! create anything from scratch — it validates that the declared map
//! exists and remembers its geometry so later calls know which typed aya
//! map wrapper to reach for. A geometry mismatch surfaces as an error from
//! the first real access rather than from `create()` itself, since aya only
//! checks key/value sizes when a typed wrapper is actually constructed.

use std::sync::Mutex;

use aya::maps::{Array, HashMap as AyaHashMap, MapData, PerCpuHashMap};
use dashmap::DashMap;

use xlb_core::error::{Result, XlbError};
use xlb_core::maps::{MapBackend, MapKind};
use xlb_wire::pod::Bytes;

use crate::EbpfError;

fn backend_err(context: &str, err: impl std::fmt::Display) -> XlbError {
    XlbError::MapBackend(format!("{context}: {err}"))
}

#[derive(Clone, Copy)]
struct Geometry {
    kind: MapKind,
    key_size: u32,
    value_size: u32,
}

/// Shares a loaded `Ebpf` instance between the [`MapBackend`], the
/// interface attacher, and the ring-buffer source, since all three need to
/// see the same set of maps.
pub struct AyaMapBackend {
    pub(crate) ebpf: std::sync::Arc<Mutex<aya::Ebpf>>,
    geometries: DashMap<String, Geometry>,
}

impl AyaMapBackend {
    pub(crate) fn new(ebpf: std::sync::Arc<Mutex<aya::Ebpf>>) -> Self {
        Self { ebpf, geometries: DashMap::new() }
    }

    fn geometry(&self, name: &str) -> Result<Geometry> {
        self.geometries
            .get(name)
            .map(|g| *g)
            .ok_or_else(|| backend_err(name, "map was never created"))
    }
}

impl MapBackend for AyaMapBackend {
    fn create(&self, name: &str, kind: MapKind, key_size: u32, value_size: u32, _max_entries: u32) -> Result<()> {
        let ebpf = self.ebpf.lock().unwrap();
        if ebpf.map(name).is_none() {
            return Err(backend_err(name, EbpfError::MapNotFound(name.to_string())));
        }
        self.geometries.insert(name.to_string(), Geometry { kind, key_size, value_size });
        Ok(())
    }

    fn update(&self, name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let geometry = self.geometry(name)?;
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;

        match geometry.kind {
            MapKind::Hash => dispatch_hash_update(name, map_data, geometry, key, value),
            MapKind::LpmTrie => lpm_update(name, map_data, geometry, key, value),
            MapKind::PerCpuHash | MapKind::LruPerCpuHash => {
                dispatch_per_cpu_update(name, map_data, geometry, key, value)
            }
            MapKind::Array => array_update(name, map_data, geometry, key, value),
            MapKind::RingBuf => Err(backend_err(name, "ring buffers are not updated through MapBackend")),
        }
    }

    fn lookup(&self, name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let geometry = self.geometry(name)?;
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;

        match geometry.kind {
            MapKind::Hash => dispatch_hash_lookup(name, map_data, geometry, key),
            MapKind::LpmTrie => lpm_lookup(name, map_data, geometry, key),
            MapKind::Array => array_lookup(name, map_data, geometry, key),
            MapKind::PerCpuHash | MapKind::LruPerCpuHash => {
                Err(backend_err(name, "use lookup_per_cpu for per-CPU maps"))
            }
            MapKind::RingBuf => Err(backend_err(name, "ring buffers are not read through MapBackend")),
        }
    }

    fn lookup_per_cpu(&self, name: &str, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>> {
        let geometry = self.geometry(name)?;
        if !geometry.kind.is_per_cpu() {
            return Err(backend_err(name, "not a per-CPU map"));
        }
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;
        dispatch_per_cpu_lookup(name, map_data, geometry, key)
    }

    fn delete(&self, name: &str, key: &[u8]) -> Result<()> {
        let geometry = self.geometry(name)?;
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;
        match geometry.kind {
            MapKind::Hash => dispatch_hash_delete(name, map_data, geometry, key),
            MapKind::LpmTrie => lpm_delete(name, map_data, geometry, key),
            MapKind::PerCpuHash | MapKind::LruPerCpuHash => {
                dispatch_per_cpu_delete(name, map_data, geometry, key)
            }
            MapKind::Array => Err(backend_err(name, "array entries cannot be deleted, only overwritten")),
            MapKind::RingBuf => Err(backend_err(name, "ring buffers have no keyed entries")),
        }
    }

    fn iterate(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let geometry = self.geometry(name)?;
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;
        match geometry.kind {
            MapKind::Hash => dispatch_hash_iterate(name, map_data, geometry),
            MapKind::LpmTrie => lpm_iterate(name, map_data, geometry),
            MapKind::Array => array_iterate(name, map_data, geometry),
            MapKind::PerCpuHash | MapKind::LruPerCpuHash => {
                Err(backend_err(name, "use iterate_per_cpu for per-CPU maps"))
            }
            MapKind::RingBuf => Err(backend_err(name, "ring buffers are not iterated through MapBackend")),
        }
    }

    fn iterate_per_cpu(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<Vec<u8>>)>> {
        let geometry = self.geometry(name)?;
        if !geometry.kind.is_per_cpu() {
            return Err(backend_err(name, "not a per-CPU map"));
        }
        let mut ebpf = self.ebpf.lock().unwrap();
        let map_data = ebpf
            .map_mut(name)
            .ok_or_else(|| backend_err(name, EbpfError::MapNotFound(name.to_string())))?;
        dispatch_per_cpu_iterate(name, map_data, geometry)
    }

    fn close(&self, name: &str) -> Result<()> {
        self.geometries.remove(name);
        Ok(())
    }
}

/// Dispatches a `(key_size, value_size)` pair to one of the fixed
/// `Bytes<K>`/`Bytes<V>` instantiations this system actually uses. Every map
/// in §6 falls into one of these geometries; a new one is a deliberate
/// schema change that should add a match arm here.
macro_rules! with_geometry {
    ($name:expr, $geometry:expr, $key:ident, $value:ident, $body:expr) => {
        match ($geometry.key_size, $geometry.value_size) {
            (8, 72) => {
                const $key: usize = 8;
                const $value: usize = 72;
                $body
            }
            (8, 16) => {
                const $key: usize = 8;
                const $value: usize = 16;
                $body
            }
            (16, 128) => {
                const $key: usize = 16;
                const $value: usize = 128;
                $body
            }
            (16, 16) => {
                const $key: usize = 16;
                const $value: usize = 16;
                $body
            }
            _ => Err(backend_err(
                $name,
                EbpfError::UnsupportedGeometry {
                    name: $name.to_string(),
                    kind: $geometry.kind,
                    key_size: $geometry.key_size,
                    value_size: $geometry.value_size,
                },
            )),
        }
    };
}

fn dispatch_hash_update(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8], value: &[u8]) -> Result<()> {
    with_geometry!(name, geometry, K, V, {
        let mut map: AyaHashMap<&mut MapData, Bytes<K>, Bytes<V>> =
            AyaHashMap::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        let value = Bytes::<V>::from_slice(value).ok_or_else(|| backend_err(name, "value length mismatch"))?;
        map.insert(key, value, 0).map_err(|e| backend_err(name, e))
    })
}

fn dispatch_hash_lookup(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<Option<Vec<u8>>> {
    with_geometry!(name, geometry, K, V, {
        let map: AyaHashMap<&mut MapData, Bytes<K>, Bytes<V>> =
            AyaHashMap::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        match map.get(&key, 0) {
            Ok(value) => Ok(Some(value.as_slice().to_vec())),
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(backend_err(name, e)),
        }
    })
}

fn dispatch_hash_delete(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<()> {
    with_geometry!(name, geometry, K, V, {
        let mut map: AyaHashMap<&mut MapData, Bytes<K>, Bytes<V>> =
            AyaHashMap::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        match map.remove(&key) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(backend_err(name, e)),
        }
    })
}

fn dispatch_hash_iterate(name: &str, map: &mut aya::maps::Map, geometry: Geometry) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    with_geometry!(name, geometry, K, V, {
        let map: AyaHashMap<&mut MapData, Bytes<K>, Bytes<V>> =
            AyaHashMap::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let mut out = Vec::new();
        for entry in map.iter() {
            let (k, v) = entry.map_err(|e| backend_err(name, e))?;
            out.push((k.as_slice().to_vec(), v.as_slice().to_vec()));
        }
        Ok(out)
    })
}

fn dispatch_per_cpu_update(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8], value: &[u8]) -> Result<()> {
    with_geometry!(name, geometry, K, V, {
        let mut map: PerCpuHashMap<&mut MapData, Bytes<K>, Bytes<V>> = PerCpuHashMap::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        let value = Bytes::<V>::from_slice(value).ok_or_else(|| backend_err(name, "value length mismatch"))?;
        let per_cpu: aya::maps::PerCpuValues<Bytes<V>> = vec![value; num_possible_cpus()].into();
        map.insert(key, per_cpu, 0).map_err(|e| backend_err(name, e))
    })
}

fn dispatch_per_cpu_lookup(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>> {
    with_geometry!(name, geometry, K, V, {
        let map: PerCpuHashMap<&mut MapData, Bytes<K>, Bytes<V>> = PerCpuHashMap::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        match map.get(&key, 0) {
            Ok(values) => Ok(Some(values.iter().map(|v| v.as_slice().to_vec()).collect())),
            Err(aya::maps::MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(backend_err(name, e)),
        }
    })
}

fn dispatch_per_cpu_delete(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<()> {
    with_geometry!(name, geometry, K, V, {
        let mut map: PerCpuHashMap<&mut MapData, Bytes<K>, Bytes<V>> = PerCpuHashMap::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let key = Bytes::<K>::from_slice(key).ok_or_else(|| backend_err(name, "key length mismatch"))?;
        match map.remove(&key) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(backend_err(name, e)),
        }
    })
}

fn dispatch_per_cpu_iterate(name: &str, map: &mut aya::maps::Map, geometry: Geometry) -> Result<Vec<(Vec<u8>, Vec<Vec<u8>>)>> {
    with_geometry!(name, geometry, K, V, {
        let map: PerCpuHashMap<&mut MapData, Bytes<K>, Bytes<V>> = PerCpuHashMap::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
        let mut out = Vec::new();
        for entry in map.iter() {
            let (k, values) = entry.map_err(|e| backend_err(name, e))?;
            out.push((k.as_slice().to_vec(), values.iter().map(|v| v.as_slice().to_vec()).collect()));
        }
        Ok(out)
    })
}

fn num_possible_cpus() -> usize {
    aya::util::nr_cpus().unwrap_or(1)
}

/// The LPM-trie key is our flat wire `prefix_len: u32 (BE) | ip: u32 (BE)`
/// pair; aya's [`aya::maps::lpm_trie::Key`] wants a native-endian bit count
/// plus the raw prefix bytes. Source routes are always IPv4 /0..=32, so the
/// wire IP's 4 bytes become the trie's prefix data unchanged (already
/// network byte order, which is also big-endian-first — exactly the byte
/// order LPM-trie comparisons need).
fn decode_lpm_key(key: &[u8]) -> Result<aya::maps::lpm_trie::Key<[u8; 4]>> {
    let wire = xlb_wire::classic::LpmKey::decode(key)?;
    let mut data = [0u8; 4];
    data.copy_from_slice(&wire.ip.to_be_bytes());
    Ok(aya::maps::lpm_trie::Key::new(wire.prefix_len, data))
}

fn lpm_update(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8], value: &[u8]) -> Result<()> {
    if geometry.value_size != 72 {
        return Err(backend_err(name, "unsupported LPM value geometry"));
    }
    let mut map: aya::maps::lpm_trie::LpmTrie<&mut MapData, [u8; 4], Bytes<72>> =
        aya::maps::lpm_trie::LpmTrie::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let trie_key = decode_lpm_key(key)?;
    let value = Bytes::<72>::from_slice(value).ok_or_else(|| backend_err(name, "value length mismatch"))?;
    map.insert(&trie_key, value, 0).map_err(|e| backend_err(name, e))
}

fn lpm_lookup(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<Option<Vec<u8>>> {
    if geometry.value_size != 72 {
        return Err(backend_err(name, "unsupported LPM value geometry"));
    }
    let map: aya::maps::lpm_trie::LpmTrie<&mut MapData, [u8; 4], Bytes<72>> =
        aya::maps::lpm_trie::LpmTrie::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let trie_key = decode_lpm_key(key)?;
    match map.get(&trie_key, 0) {
        Ok(value) => Ok(Some(value.as_slice().to_vec())),
        Err(aya::maps::MapError::KeyNotFound) => Ok(None),
        Err(e) => Err(backend_err(name, e)),
    }
}

fn lpm_delete(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<()> {
    if geometry.value_size != 72 {
        return Err(backend_err(name, "unsupported LPM value geometry"));
    }
    let mut map: aya::maps::lpm_trie::LpmTrie<&mut MapData, [u8; 4], Bytes<72>> =
        aya::maps::lpm_trie::LpmTrie::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let trie_key = decode_lpm_key(key)?;
    match map.remove(&trie_key) {
        Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
        Err(e) => Err(backend_err(name, e)),
    }
}

fn lpm_iterate(name: &str, map: &mut aya::maps::Map, geometry: Geometry) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if geometry.value_size != 72 {
        return Err(backend_err(name, "unsupported LPM value geometry"));
    }
    let map: aya::maps::lpm_trie::LpmTrie<&mut MapData, [u8; 4], Bytes<72>> =
        aya::maps::lpm_trie::LpmTrie::try_from(map)
            .map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let mut out = Vec::new();
    for entry in map.iter() {
        let (trie_key, value) = entry.map_err(|e| backend_err(name, e))?;
        let wire = xlb_wire::classic::LpmKey {
            prefix_len: trie_key.prefix_len,
            ip: u32::from_be_bytes(trie_key.data),
        };
        out.push((wire.encode().to_vec(), value.as_slice().to_vec()));
    }
    Ok(out)
}

fn array_update(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8], value: &[u8]) -> Result<()> {
    if geometry.key_size != 4 || geometry.value_size != 4 {
        return Err(backend_err(name, "unsupported array geometry"));
    }
    let mut map: Array<&mut MapData, Bytes<4>> =
        Array::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let index = u32::from_ne_bytes(key.try_into().map_err(|_| backend_err(name, "key length mismatch"))?);
    let value = Bytes::<4>::from_slice(value).ok_or_else(|| backend_err(name, "value length mismatch"))?;
    map.set(index, value, 0).map_err(|e| backend_err(name, e))
}

fn array_lookup(name: &str, map: &mut aya::maps::Map, geometry: Geometry, key: &[u8]) -> Result<Option<Vec<u8>>> {
    if geometry.key_size != 4 || geometry.value_size != 4 {
        return Err(backend_err(name, "unsupported array geometry"));
    }
    let map: Array<&mut MapData, Bytes<4>> =
        Array::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let index = u32::from_ne_bytes(key.try_into().map_err(|_| backend_err(name, "key length mismatch"))?);
    match map.get(&index, 0) {
        Ok(value) => Ok(Some(value.as_slice().to_vec())),
        Err(e) => Err(backend_err(name, e)),
    }
}

fn array_iterate(name: &str, map: &mut aya::maps::Map, geometry: Geometry) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if geometry.key_size != 4 || geometry.value_size != 4 {
        return Err(backend_err(name, "unsupported array geometry"));
    }
    let map: Array<&mut MapData, Bytes<4>> =
        Array::try_from(map).map_err(|e| backend_err(name, EbpfError::MapConvert(name.to_string(), e)))?;
    let mut out = Vec::new();
    for (index, entry) in map.iter().enumerate() {
        let value = entry.map_err(|e| backend_err(name, e))?;
        out.push(((index as u32).to_ne_bytes().to_vec(), value.as_slice().to_vec()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_lpm_key_preserves_prefix_len_and_ip() {
        let wire = xlb_wire::classic::LpmKey { prefix_len: 24, ip: 0xc0a8_0100 };
        let trie_key = decode_lpm_key(&wire.encode()).unwrap();
        assert_eq!(trie_key.prefix_len, 24);
        assert_eq!(u32::from_be_bytes(trie_key.data), 0xc0a8_0100);
    }

    #[test]
    fn decode_lpm_key_rejects_short_buffer() {
        assert!(decode_lpm_key(&[0u8; 4]).is_err());
    }
}
