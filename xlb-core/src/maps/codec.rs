//! Bridges the fixed-size arrays `xlb-wire` produces to the `Vec<u8>` the
//! [`super::MapBackend`] trait deals in, and back.

use crate::error::Result;
use xlb_wire::classic::{
    ConntrackKey, ConntrackValue, LpmKey, ListenKey, RateLimitBucketValue, RateLimitConfigValue,
    SniKey, StatsEvent, WeightedRouteValue,
};

pub trait AsKeyBytes {
    fn as_key_bytes(&self) -> Vec<u8>;
}

pub trait FromKeyBytes: Sized {
    fn from_key_bytes(buf: &[u8]) -> Result<Self>;
}

pub trait AsValueBytes: Sized {
    fn as_value_bytes(&self) -> Vec<u8>;
    fn from_value_bytes(buf: &[u8]) -> Result<Self>;
}

macro_rules! impl_key_codec {
    ($ty:ty) => {
        impl AsKeyBytes for $ty {
            fn as_key_bytes(&self) -> Vec<u8> {
                self.encode().to_vec()
            }
        }
        impl FromKeyBytes for $ty {
            fn from_key_bytes(buf: &[u8]) -> Result<Self> {
                Ok(<$ty>::decode(buf)?)
            }
        }
    };
}

macro_rules! impl_value_codec {
    ($ty:ty) => {
        impl AsValueBytes for $ty {
            fn as_value_bytes(&self) -> Vec<u8> {
                self.encode().to_vec()
            }
            fn from_value_bytes(buf: &[u8]) -> Result<Self> {
                Ok(<$ty>::decode(buf)?)
            }
        }
    };
}

impl_key_codec!(LpmKey);
impl_key_codec!(ListenKey);
impl_key_codec!(SniKey);
impl_key_codec!(ConntrackKey);

impl_value_codec!(WeightedRouteValue);
impl_value_codec!(ConntrackValue);
impl_value_codec!(RateLimitConfigValue);
impl_value_codec!(RateLimitBucketValue);
impl_value_codec!(StatsEvent);

/// Index into the settings array map (§6's "Settings array").
impl AsKeyBytes for u32 {
    fn as_key_bytes(&self) -> Vec<u8> {
        self.to_ne_bytes().to_vec()
    }
}

impl FromKeyBytes for u32 {
    fn from_key_bytes(buf: &[u8]) -> Result<Self> {
        let arr: [u8; 4] = buf
            .try_into()
            .map_err(|_| xlb_wire::CodecError::ShortBuffer { expected: 4, got: buf.len() })?;
        Ok(u32::from_ne_bytes(arr))
    }
}

impl AsValueBytes for u32 {
    fn as_value_bytes(&self) -> Vec<u8> {
        xlb_wire::classic::encode_settings_entry(*self).to_vec()
    }
    fn from_value_bytes(buf: &[u8]) -> Result<Self> {
        Ok(xlb_wire::classic::decode_settings_entry(buf)?)
    }
}
