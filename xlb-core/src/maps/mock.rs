//! In-memory stand-in for the aya-backed map backend, used in unit tests
//! that exercise the façade without the Rust toolchain or a kernel.

use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::{backend_err, MapBackend, MapKind};
use crate::error::Result;

struct MockMap {
    kind: MapKind,
    entries: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

pub struct MockMapBackend {
    num_cpus: usize,
    maps: Mutex<HashMap<String, MockMap>>,
}

impl MockMapBackend {
    pub fn new(num_cpus: usize) -> Self {
        Self {
            num_cpus: num_cpus.max(1),
            maps: Mutex::new(HashMap::new()),
        }
    }

    /// Test-only: write directly into a single CPU's slot, bypassing the
    /// "writes go to slot 0" convention [`MapBackend::update`] uses, so
    /// per-CPU aggregation can be exercised with more than one distinct
    /// reading.
    pub fn put_on_cpu(&self, cpu: usize, name: &str, key: &[u8], value: &[u8]) {
        let mut maps = self.maps.lock().unwrap();
        let map = maps.get_mut(name).expect("map must be created first");
        let slots = map
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| vec![Vec::new(); self.num_cpus]);
        if slots.len() <= cpu {
            slots.resize(cpu + 1, Vec::new());
        }
        slots[cpu] = value.to_vec();
    }
}

impl MapBackend for MockMapBackend {
    fn create(&self, name: &str, kind: MapKind, _key_size: u32, _value_size: u32, _max_entries: u32) -> Result<()> {
        let mut maps = self.maps.lock().unwrap();
        maps.entry(name.to_string()).or_insert_with(|| MockMap {
            kind,
            entries: HashMap::new(),
        });
        Ok(())
    }

    fn update(&self, name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let mut maps = self.maps.lock().unwrap();
        let map = maps
            .get_mut(name)
            .ok_or_else(|| backend_err("update", format!("no such map: {name}")))?;
        if map.kind.is_per_cpu() {
            let slots = map
                .entries
                .entry(key.to_vec())
                .or_insert_with(|| vec![Vec::new(); self.num_cpus]);
            slots[0] = value.to_vec();
        } else {
            map.entries.insert(key.to_vec(), vec![value.to_vec()]);
        }
        Ok(())
    }

    fn lookup(&self, name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let maps = self.maps.lock().unwrap();
        let map = maps
            .get(name)
            .ok_or_else(|| backend_err("lookup", format!("no such map: {name}")))?;
        Ok(map.entries.get(key).and_then(|slots| slots.first().cloned()))
    }

    fn lookup_per_cpu(&self, name: &str, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>> {
        let maps = self.maps.lock().unwrap();
        let map = maps
            .get(name)
            .ok_or_else(|| backend_err("lookup_per_cpu", format!("no such map: {name}")))?;
        Ok(map.entries.get(key).map(|slots| {
            slots
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect::<Vec<_>>()
        }))
    }

    fn delete(&self, name: &str, key: &[u8]) -> Result<()> {
        let mut maps = self.maps.lock().unwrap();
        let map = maps
            .get_mut(name)
            .ok_or_else(|| backend_err("delete", format!("no such map: {name}")))?;
        map.entries.remove(key);
        Ok(())
    }

    fn iterate(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let maps = self.maps.lock().unwrap();
        let map = maps
            .get(name)
            .ok_or_else(|| backend_err("iterate", format!("no such map: {name}")))?;
        Ok(map
            .entries
            .iter()
            .filter_map(|(k, slots)| slots.first().map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn iterate_per_cpu(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<Vec<u8>>)>> {
        let maps = self.maps.lock().unwrap();
        let map = maps
            .get(name)
            .ok_or_else(|| backend_err("iterate_per_cpu", format!("no such map: {name}")))?;
        Ok(map
            .entries
            .iter()
            .map(|(k, slots)| {
                (
                    k.clone(),
                    slots.iter().filter(|s| !s.is_empty()).cloned().collect(),
                )
            })
            .collect())
    }

    fn close(&self, name: &str) -> Result<()> {
        let mut maps = self.maps.lock().unwrap();
        maps.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let backend = MockMapBackend::new(1);
        backend.create("m", MapKind::Hash, 8, 8, 16).unwrap();
        backend.create("m", MapKind::Hash, 8, 8, 16).unwrap();
        backend.update("m", b"k", b"v").unwrap();
        assert_eq!(backend.lookup("m", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn missing_map_is_an_error() {
        let backend = MockMapBackend::new(1);
        assert!(backend.lookup("missing", b"k").is_err());
    }
}
