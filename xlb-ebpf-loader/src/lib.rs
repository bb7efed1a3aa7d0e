//! aya-backed implementations of the three traits `xlb-core` defines at its
//! boundary with the kernel packet programs (§1's "opaque external
//! collaborator"): [`xlb_core::maps::MapBackend`],
//! [`xlb_core::lifecycle::InterfaceAttacher`], and
//! [`xlb_core::stats::RingBufSource`].
//!
//! This crate does not compile or embed any kernel-side program. The XDP
//! ingress and TC egress programs are built and shipped separately; this
//! crate loads the compiled object at a path given by the CLI
//! ([`attacher::AyaLoader::load`]) and hands out views over it implementing
//! each of the three traits above.
#![cfg(target_os = "linux")]

pub mod attacher;
pub mod backend;

pub use attacher::{AyaAttacher, AyaLoader, AyaRingBufSource};
pub use backend::AyaMapBackend;

#[derive(Debug, thiserror::Error)]
pub enum EbpfError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("failed to read BPF object file: {0}")]
    Io(#[from] std::io::Error),

    #[error("map '{0}' not declared in the loaded BPF object")]
    MapNotFound(String),

    #[error(
        "map '{name}' has geometry (kind={kind:?}, key={key_size}, value={value_size}) with no backend support"
    )]
    UnsupportedGeometry { name: String, kind: xlb_core::maps::MapKind, key_size: u32, value_size: u32 },

    #[error("map '{0}' conversion failed: {1}")]
    MapConvert(String, #[source] aya::maps::MapError),

    #[error("program '{0}' not found in the loaded BPF object")]
    ProgramNotFound(String),

    #[error("program '{name}' is not the expected type: {source}")]
    ProgramType { name: String, #[source] source: aya::programs::ProgramError },

    #[error("failed to load program '{name}' into the kernel: {source}")]
    ProgramLoad { name: String, #[source] source: aya::programs::ProgramError },

    #[error("failed to attach program '{name}' to interface '{interface}': {source}")]
    Attach { name: String, interface: String, #[source] source: aya::programs::ProgramError },
}
