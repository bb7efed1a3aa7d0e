//! Bit-exact key/value layouts for the maps shared between the user-space
//! control plane and the in-kernel XDP/TC packet programs.
//!
//! This crate is `no_std` so it can, in principle, be compiled for both
//! targets:
//! - the host target (control plane, enables the `aya-pod` feature)
//! - a `bpfel-unknown-none` kernel program target
//!
//! Every multi-byte field carries an explicit byte-order contract: IPs and
//! ports are network byte order because the kernel reads/writes them
//! directly from packet headers; counters the kernel updates with
//! single-CPU atomics are native byte order. Confusing the two silently
//! corrupts live connections.
#![no_std]

pub mod classic;
pub mod error;
pub mod fnv;
pub mod pod;
pub mod proxy_protocol;
pub mod unified;

pub use error::CodecError;
pub use fnv::fnv1a64_lowercase;
