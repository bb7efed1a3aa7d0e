//! The optional unified (IPv4/IPv6) map family: parallel maps whose keys
//! embed a 16-byte IP address (IPv4 addresses occupy bytes 12..15, the
//! first 12 bytes zero). Implementations SHOULD pick either this family or
//! [`crate::classic`] process-wide, not both; this crate implements both so
//! a deployment can make that choice at startup.

use crate::error::CodecError;

fn require_len(buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() < expected {
        Err(CodecError::ShortBuffer {
            expected,
            got: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Embed an IPv4 address into the low 4 bytes of a 16-byte field, per the
/// unified family's convention (first 12 bytes zero).
pub fn embed_ipv4(ip: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[12..16].copy_from_slice(&ip.to_be_bytes());
    out
}

/// Inverse of [`embed_ipv4`]; returns `None` if the high 12 bytes are
/// non-zero (a real IPv6 address, not an embedded IPv4 one).
pub fn extract_ipv4(addr: &[u8; 16]) -> Option<u32> {
    if addr[0..12].iter().any(|&b| b != 0) {
        return None;
    }
    Some(u32::from_be_bytes(addr[12..16].try_into().unwrap()))
}

/// `prefix_len: u32 (network) | ip: [u8; 16] (network)`.
pub const LPM_KEY_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpmKey {
    pub prefix_len: u32,
    pub ip: [u8; 16],
}

impl LpmKey {
    pub fn encode(&self) -> [u8; LPM_KEY_LEN] {
        let mut out = [0u8; LPM_KEY_LEN];
        out[0..4].copy_from_slice(&self.prefix_len.to_be_bytes());
        out[4..20].copy_from_slice(&self.ip);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, LPM_KEY_LEN)?;
        Ok(Self {
            prefix_len: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            ip: buf[4..20].try_into().unwrap(),
        })
    }
}

/// `ifindex: u32 (native) | port: u16 (network) | address_family: u8 | pad: u8`.
pub const LISTEN_KEY_LEN: usize = 8;

pub mod address_family {
    pub const INET: u8 = 4;
    pub const INET6: u8 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenKey {
    pub ifindex: u32,
    pub port: u16,
    pub address_family: u8,
}

impl ListenKey {
    pub fn encode(&self) -> [u8; LISTEN_KEY_LEN] {
        let mut out = [0u8; LISTEN_KEY_LEN];
        out[0..4].copy_from_slice(&self.ifindex.to_ne_bytes());
        out[4..6].copy_from_slice(&self.port.to_be_bytes());
        out[6] = self.address_family;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, LISTEN_KEY_LEN)?;
        Ok(Self {
            ifindex: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            port: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
            address_family: buf[6],
        })
    }
}

/// `src_ip: [u8;16] | dst_ip: [u8;16] | src_port: u16 | dst_port: u16 |
/// protocol: u8 | pad: 3*u8`.
pub const CONNTRACK_KEY_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConntrackKey {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl ConntrackKey {
    pub fn encode(&self) -> [u8; CONNTRACK_KEY_LEN] {
        let mut out = [0u8; CONNTRACK_KEY_LEN];
        out[0..16].copy_from_slice(&self.src_ip);
        out[16..32].copy_from_slice(&self.dst_ip);
        out[32..34].copy_from_slice(&self.src_port.to_be_bytes());
        out[34..36].copy_from_slice(&self.dst_port.to_be_bytes());
        out[36] = self.protocol;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, CONNTRACK_KEY_LEN)?;
        Ok(Self {
            src_ip: buf[0..16].try_into().unwrap(),
            dst_ip: buf[16..32].try_into().unwrap(),
            src_port: u16::from_be_bytes(buf[32..34].try_into().unwrap()),
            dst_port: u16::from_be_bytes(buf[34..36].try_into().unwrap()),
            protocol: buf[36],
        })
    }
}

pub const MAX_TARGETS: usize = 8;
const TARGET_SLOT_LEN: usize = 20;
const ROUTE_HEADER_LEN: usize = 8;
/// `header(8) + 8 * target_slot(20)`.
pub const WEIGHTED_ROUTE_VALUE_LEN: usize = ROUTE_HEADER_LEN + MAX_TARGETS * TARGET_SLOT_LEN;

/// A 20-byte unified target slot: `ip: [u8;16] (network) | port: u16
/// (network) | cumulative_weight: u16 (network, 1..100)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteTargetSlot {
    pub ip: [u8; 16],
    pub port: u16,
    pub cumulative_weight: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedRouteValue {
    pub target_count: u8,
    pub flags: u16,
    pub targets: [RouteTargetSlot; MAX_TARGETS],
}

impl WeightedRouteValue {
    pub fn new(
        target_count: u8,
        flags: u16,
        targets: [RouteTargetSlot; MAX_TARGETS],
    ) -> Result<Self, CodecError> {
        if target_count == 0 || target_count as usize > MAX_TARGETS {
            return Err(CodecError::InvalidField("target_count"));
        }
        Ok(Self {
            target_count,
            flags,
            targets,
        })
    }

    pub fn encode(&self) -> [u8; WEIGHTED_ROUTE_VALUE_LEN] {
        let mut out = [0u8; WEIGHTED_ROUTE_VALUE_LEN];
        out[0] = self.target_count;
        out[4..6].copy_from_slice(&self.flags.to_ne_bytes());
        for i in 0..self.target_count as usize {
            let slot = &self.targets[i];
            let base = ROUTE_HEADER_LEN + i * TARGET_SLOT_LEN;
            out[base..base + 16].copy_from_slice(&slot.ip);
            out[base + 16..base + 18].copy_from_slice(&slot.port.to_be_bytes());
            out[base + 18..base + 20].copy_from_slice(&slot.cumulative_weight.to_be_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, WEIGHTED_ROUTE_VALUE_LEN)?;
        let target_count = buf[0];
        if target_count == 0 || target_count as usize > MAX_TARGETS {
            return Err(CodecError::InvalidField("target_count"));
        }
        let flags = u16::from_ne_bytes(buf[4..6].try_into().unwrap());
        let mut targets = [RouteTargetSlot::default(); MAX_TARGETS];
        for i in 0..target_count as usize {
            let base = ROUTE_HEADER_LEN + i * TARGET_SLOT_LEN;
            targets[i] = RouteTargetSlot {
                ip: buf[base..base + 16].try_into().unwrap(),
                port: u16::from_be_bytes(buf[base + 16..base + 18].try_into().unwrap()),
                cumulative_weight: u16::from_be_bytes(buf[base + 18..base + 20].try_into().unwrap()),
            };
        }
        Ok(Self {
            target_count,
            flags,
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_and_extract_ipv4_round_trip() {
        let embedded = embed_ipv4(0x0a00_0001);
        assert_eq!(extract_ipv4(&embedded), Some(0x0a00_0001));
    }

    #[test]
    fn real_ipv6_is_not_extracted_as_v4() {
        let mut addr = [0u8; 16];
        addr[0] = 0xfe;
        assert_eq!(extract_ipv4(&addr), None);
    }

    #[test]
    fn weighted_route_value_is_168_bytes() {
        assert_eq!(WEIGHTED_ROUTE_VALUE_LEN, 168);
    }

    #[test]
    fn lpm_key_round_trip() {
        let key = LpmKey {
            prefix_len: 64,
            ip: embed_ipv4(0x0a01_0203),
        };
        assert_eq!(LpmKey::decode(&key.encode()).unwrap(), key);
    }
}
