//! A generic fixed-size byte array newtype, `aya::Pod` for any `N`.
//!
//! The map façade (in `xlb-core`) deals exclusively in key/value byte
//! slices, per the map backend contract. [`Bytes`] lets the aya-backed
//! implementation hand those slices straight to `aya::maps::HashMap` and
//! friends, which require a `Pod` type parameter, without introducing a
//! distinct Rust type per map.

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bytes<const N: usize>(pub [u8; N]);

impl<const N: usize> Bytes<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let arr: [u8; N] = buf.try_into().ok()?;
        Some(Self(arr))
    }
}

/// SAFETY: `Bytes<N>` is `#[repr(C)]`, `Copy`, and a plain byte array with
/// no padding or invalid bit patterns for any `N`.
#[cfg(feature = "aya-pod")]
#[allow(unsafe_code)]
unsafe impl<const N: usize> aya::Pod for Bytes<N> {}
