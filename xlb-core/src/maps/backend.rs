use crate::error::{Result, XlbError};

/// The BPF map types this system provisions. Each kind carries its own
/// creation policy: LPM-trie maps require the "no preallocation" flag so
/// a trie with a wide prefix distribution doesn't pin memory up front; all
/// other kinds preallocate for predictable packet-path latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Hash,
    LpmTrie,
    PerCpuHash,
    LruPerCpuHash,
    Array,
    RingBuf,
}

impl MapKind {
    pub fn requires_no_prealloc(self) -> bool {
        matches!(self, MapKind::LpmTrie)
    }

    pub fn is_per_cpu(self) -> bool {
        matches!(self, MapKind::PerCpuHash | MapKind::LruPerCpuHash)
    }
}

/// Opaque handle to a map backend. Implementations are expected to be the
/// suspension point for every operation here: callers run them off the
/// async executor (e.g. via `spawn_blocking`) rather than await directly.
///
/// The façade does not serialize calls across keys; callers are responsible
/// for never racing two writers on the same key, per the concurrency model.
pub trait MapBackend: Send + Sync {
    fn create(&self, name: &str, kind: MapKind, key_size: u32, value_size: u32, max_entries: u32) -> Result<()>;

    fn update(&self, name: &str, key: &[u8], value: &[u8]) -> Result<()>;

    fn lookup(&self, name: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// For per-CPU maps, returns one value per CPU slot in the order the
    /// backend enumerates them. Non-per-CPU maps return a single-element
    /// vector.
    fn lookup_per_cpu(&self, name: &str, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>>;

    fn delete(&self, name: &str, key: &[u8]) -> Result<()>;

    fn iterate(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn iterate_per_cpu(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<Vec<u8>>)>>;

    fn close(&self, name: &str) -> Result<()>;
}

pub(crate) fn backend_err(context: &str, err: impl std::fmt::Display) -> XlbError {
    XlbError::MapBackend(format!("{context}: {err}"))
}
