//! The IPv4-only ("classic") map family: 8-byte LPM and listen keys, a
//! 72-byte weighted-route value with 8-byte target slots, and a 16-byte
//! conntrack key. See [`crate::unified`] for the parallel dual-stack family.
//!
//! Every `encode`/`decode` pair here is pure and allocation-free: encoding
//! writes into a fixed-size stack buffer, decoding reads from a byte slice
//! and never borrows past its declared length.

use crate::error::CodecError;
use crate::fnv::fnv1a64_lowercase;

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

/// `prefix_len: u32 | ip: u32`, both network byte order.
pub const LPM_KEY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpmKey {
    pub prefix_len: u32,
    pub ip: u32,
}

impl LpmKey {
    pub fn encode(&self) -> [u8; LPM_KEY_LEN] {
        let mut out = [0u8; LPM_KEY_LEN];
        out[0..4].copy_from_slice(&self.prefix_len.to_be_bytes());
        out[4..8].copy_from_slice(&self.ip.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, LPM_KEY_LEN)?;
        Ok(Self {
            prefix_len: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            ip: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        })
    }
}

/// `ifindex: u32 (native) | port: u16 (network) | pad: u16 (native, zero)`.
pub const LISTEN_KEY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenKey {
    pub ifindex: u32,
    pub port: u16,
}

impl ListenKey {
    pub fn encode(&self) -> [u8; LISTEN_KEY_LEN] {
        let mut out = [0u8; LISTEN_KEY_LEN];
        out[0..4].copy_from_slice(&self.ifindex.to_ne_bytes());
        out[4..6].copy_from_slice(&self.port.to_be_bytes());
        // out[6..8] pad stays zero
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, LISTEN_KEY_LEN)?;
        Ok(Self {
            ifindex: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            port: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
        })
    }
}

/// Flag bits of [`WeightedRouteValue::flags`].
pub mod route_flags {
    pub const STATS_ENABLED: u16 = 1 << 0;
    pub const SESSION_PERSISTENCE: u16 = 1 << 1;
    pub const PROXY_PROTOCOL_V2: u16 = 1 << 2;
}

pub const MAX_TARGETS: usize = 8;
const TARGET_SLOT_LEN: usize = 8;
const ROUTE_HEADER_LEN: usize = 8;
/// `header(8) + 8 * target_slot(8)`.
pub const WEIGHTED_ROUTE_VALUE_LEN: usize = ROUTE_HEADER_LEN + MAX_TARGETS * TARGET_SLOT_LEN;

/// One 8-byte target slot: `ip: u32 (network) | port: u16 (network) |
/// cumulative_weight: u16 (network, 1..100)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteTargetSlot {
    pub ip: u32,
    pub port: u16,
    pub cumulative_weight: u16,
}

/// The fixed 72-byte weighted-route value written to the listen / SNI /
/// source-route maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedRouteValue {
    pub target_count: u8,
    pub flags: u16,
    pub targets: [RouteTargetSlot; MAX_TARGETS],
}

impl WeightedRouteValue {
    /// Build a value from the targets actually in use; unused slots are
    /// zeroed in the encoded output regardless of what `targets` holds past
    /// `target_count`.
    pub fn new(target_count: u8, flags: u16, targets: [RouteTargetSlot; MAX_TARGETS]) -> Result<Self, CodecError> {
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
        // out[1..4] reserved, zero
        out[4..6].copy_from_slice(&self.flags.to_ne_bytes());
        // out[6..8] reserved, zero
        for i in 0..self.target_count as usize {
            let slot = &self.targets[i];
            let base = ROUTE_HEADER_LEN + i * TARGET_SLOT_LEN;
            out[base..base + 4].copy_from_slice(&slot.ip.to_be_bytes());
            out[base + 4..base + 6].copy_from_slice(&slot.port.to_be_bytes());
            out[base + 6..base + 8].copy_from_slice(&slot.cumulative_weight.to_be_bytes());
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
                ip: u32::from_be_bytes(buf[base..base + 4].try_into().unwrap()),
                port: u16::from_be_bytes(buf[base + 4..base + 6].try_into().unwrap()),
                cumulative_weight: u16::from_be_bytes(buf[base + 6..base + 8].try_into().unwrap()),
            };
        }
        Ok(Self {
            target_count,
            flags,
            targets,
        })
    }
}

/// SNI route key: FNV-1a-64 of the lowercased hostname, native byte order.
pub const SNI_KEY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniKey(pub u64);

impl SniKey {
    pub fn for_hostname(hostname: &[u8]) -> Self {
        Self(fnv1a64_lowercase(hostname))
    }

    pub fn encode(&self) -> [u8; SNI_KEY_LEN] {
        self.0.to_ne_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, SNI_KEY_LEN)?;
        Ok(Self(u64::from_ne_bytes(buf[0..8].try_into().unwrap())))
    }
}

/// `src_ip | dst_ip | src_port | dst_port | protocol | pad[3]`, IPs/ports
/// network byte order.
pub const CONNTRACK_KEY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConntrackKey {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl ConntrackKey {
    pub fn encode(&self) -> [u8; CONNTRACK_KEY_LEN] {
        let mut out = [0u8; CONNTRACK_KEY_LEN];
        out[0..4].copy_from_slice(&self.src_ip.to_be_bytes());
        out[4..8].copy_from_slice(&self.dst_ip.to_be_bytes());
        out[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        out[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        out[12] = self.protocol;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, CONNTRACK_KEY_LEN)?;
        Ok(Self {
            src_ip: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            dst_ip: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            src_port: u16::from_be_bytes(buf[8..10].try_into().unwrap()),
            dst_port: u16::from_be_bytes(buf[10..12].try_into().unwrap()),
            protocol: buf[12],
        })
    }
}

/// PROXY-protocol-v2 state block carried in bytes 96..127 of the conntrack
/// value. Always present structurally; zeroed when unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyProtocolState {
    pub conn_state: u8,
    pub proxy_flags: u8,
    pub seq_offset: u32,
    pub orig_client_ip: [u8; 16],
    pub orig_client_port: u16,
}

/// This spec chooses the 128-byte conntrack value system-wide (the
/// PROXY-protocol state block is always allocated, even for connections
/// that never emit it) rather than the 64-byte variant, since the route
/// value's `PROXY_PROTOCOL_V2` flag is a per-route toggle that can turn on
/// after a connection is already tracked.
pub const CONNTRACK_VALUE_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConntrackValue {
    pub orig_dst_ip: u32,
    pub orig_dst_port: u16,
    pub nat_dst_ip: u32,
    pub nat_dst_port: u16,
    pub created_ns: u64,
    pub last_seen_ns: u64,
    pub packets_fwd: u64,
    pub packets_rev: u64,
    pub bytes_fwd: u64,
    pub bytes_rev: u64,
    pub proxy_protocol: ProxyProtocolState,
}

impl ConntrackValue {
    pub fn encode(&self) -> [u8; CONNTRACK_VALUE_LEN] {
        let mut out = [0u8; CONNTRACK_VALUE_LEN];
        out[0..4].copy_from_slice(&self.orig_dst_ip.to_be_bytes());
        out[4..6].copy_from_slice(&self.orig_dst_port.to_be_bytes());
        out[8..12].copy_from_slice(&self.nat_dst_ip.to_be_bytes());
        out[12..14].copy_from_slice(&self.nat_dst_port.to_be_bytes());
        out[16..24].copy_from_slice(&self.created_ns.to_ne_bytes());
        out[24..32].copy_from_slice(&self.last_seen_ns.to_ne_bytes());
        out[32..40].copy_from_slice(&self.packets_fwd.to_ne_bytes());
        out[40..48].copy_from_slice(&self.packets_rev.to_ne_bytes());
        out[48..56].copy_from_slice(&self.bytes_fwd.to_ne_bytes());
        out[56..64].copy_from_slice(&self.bytes_rev.to_ne_bytes());
        // 64..95 reserved, zero
        out[96] = self.proxy_protocol.conn_state;
        out[97] = self.proxy_protocol.proxy_flags;
        out[100..104].copy_from_slice(&self.proxy_protocol.seq_offset.to_ne_bytes());
        out[104..120].copy_from_slice(&self.proxy_protocol.orig_client_ip);
        out[120..122].copy_from_slice(&self.proxy_protocol.orig_client_port.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, CONNTRACK_VALUE_LEN)?;
        Ok(Self {
            orig_dst_ip: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            orig_dst_port: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
            nat_dst_ip: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            nat_dst_port: u16::from_be_bytes(buf[12..14].try_into().unwrap()),
            created_ns: u64::from_ne_bytes(buf[16..24].try_into().unwrap()),
            last_seen_ns: u64::from_ne_bytes(buf[24..32].try_into().unwrap()),
            packets_fwd: u64::from_ne_bytes(buf[32..40].try_into().unwrap()),
            packets_rev: u64::from_ne_bytes(buf[40..48].try_into().unwrap()),
            bytes_fwd: u64::from_ne_bytes(buf[48..56].try_into().unwrap()),
            bytes_rev: u64::from_ne_bytes(buf[56..64].try_into().unwrap()),
            proxy_protocol: ProxyProtocolState {
                conn_state: buf[96],
                proxy_flags: buf[97],
                seq_offset: u32::from_ne_bytes(buf[100..104].try_into().unwrap()),
                orig_client_ip: buf[104..120].try_into().unwrap(),
                orig_client_port: u16::from_be_bytes(buf[120..122].try_into().unwrap()),
            },
        })
    }
}

/// Discriminator bytes for [`StatsEvent::event_type`].
pub mod event_type {
    pub const NEW_CONN: u8 = 1;
    pub const CONN_CLOSED: u8 = 2;
    pub const PERIODIC_STATS: u8 = 3;

    pub(crate) fn is_known(tag: u8) -> bool {
        matches!(tag, NEW_CONN | CONN_CLOSED | PERIODIC_STATS)
    }
}

pub const STATS_EVENT_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsEvent {
    pub event_type: u8,
    pub timestamp_ns: u64,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub target_ip: u32,
    pub target_port: u16,
    pub packets_fwd: u64,
    pub bytes_fwd: u64,
    pub packets_rev: u64,
    pub bytes_rev: u64,
}

impl StatsEvent {
    pub fn encode(&self) -> [u8; STATS_EVENT_LEN] {
        let mut out = [0u8; STATS_EVENT_LEN];
        out[0] = self.event_type;
        out[4..12].copy_from_slice(&self.timestamp_ns.to_ne_bytes());
        out[12..16].copy_from_slice(&self.src_ip.to_be_bytes());
        out[16..20].copy_from_slice(&self.dst_ip.to_be_bytes());
        out[20..22].copy_from_slice(&self.src_port.to_be_bytes());
        out[22..24].copy_from_slice(&self.dst_port.to_be_bytes());
        out[24..28].copy_from_slice(&self.target_ip.to_be_bytes());
        out[28..30].copy_from_slice(&self.target_port.to_be_bytes());
        out[32..40].copy_from_slice(&self.packets_fwd.to_ne_bytes());
        out[40..48].copy_from_slice(&self.bytes_fwd.to_ne_bytes());
        out[48..56].copy_from_slice(&self.packets_rev.to_ne_bytes());
        out[56..64].copy_from_slice(&self.bytes_rev.to_ne_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, STATS_EVENT_LEN)?;
        let tag = buf[0];
        if !event_type::is_known(tag) {
            return Err(CodecError::UnknownEvent(tag));
        }
        Ok(Self {
            event_type: tag,
            timestamp_ns: u64::from_ne_bytes(buf[4..12].try_into().unwrap()),
            src_ip: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            dst_ip: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            src_port: u16::from_be_bytes(buf[20..22].try_into().unwrap()),
            dst_port: u16::from_be_bytes(buf[22..24].try_into().unwrap()),
            target_ip: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            target_port: u16::from_be_bytes(buf[28..30].try_into().unwrap()),
            packets_fwd: u64::from_ne_bytes(buf[32..40].try_into().unwrap()),
            bytes_fwd: u64::from_ne_bytes(buf[40..48].try_into().unwrap()),
            packets_rev: u64::from_ne_bytes(buf[48..56].try_into().unwrap()),
            bytes_rev: u64::from_ne_bytes(buf[56..64].try_into().unwrap()),
        })
    }
}

/// `rate_scaled: u64 | burst_scaled: u64`, stored value is requests/second
/// scaled by 1000 for sub-token precision.
pub const RATE_LIMIT_CONFIG_VALUE_LEN: usize = 16;
pub const RATE_SCALE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfigValue {
    pub rate_scaled: u64,
    pub burst_scaled: u64,
}

impl RateLimitConfigValue {
    /// Scale floating-point requests-per-second / burst values by
    /// [`RATE_SCALE`]; this is the "tiny helper" the map façade uses before
    /// writing the rate-limit config map.
    pub fn from_rates(requests_per_second: f64, burst: f64) -> Self {
        Self {
            rate_scaled: (requests_per_second * RATE_SCALE as f64).round() as u64,
            burst_scaled: (burst * RATE_SCALE as f64).round() as u64,
        }
    }

    pub fn encode(&self) -> [u8; RATE_LIMIT_CONFIG_VALUE_LEN] {
        let mut out = [0u8; RATE_LIMIT_CONFIG_VALUE_LEN];
        out[0..8].copy_from_slice(&self.rate_scaled.to_ne_bytes());
        out[8..16].copy_from_slice(&self.burst_scaled.to_ne_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, RATE_LIMIT_CONFIG_VALUE_LEN)?;
        Ok(Self {
            rate_scaled: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
            burst_scaled: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

pub const RATE_LIMIT_BUCKET_VALUE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitBucketValue {
    pub tokens_scaled: u64,
    pub last_update_ns: u64,
}

impl RateLimitBucketValue {
    pub fn encode(&self) -> [u8; RATE_LIMIT_BUCKET_VALUE_LEN] {
        let mut out = [0u8; RATE_LIMIT_BUCKET_VALUE_LEN];
        out[0..8].copy_from_slice(&self.tokens_scaled.to_ne_bytes());
        out[8..16].copy_from_slice(&self.last_update_ns.to_ne_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        require_len(buf, RATE_LIMIT_BUCKET_VALUE_LEN)?;
        Ok(Self {
            tokens_scaled: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
            last_update_ns: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

/// Indices into the 4-byte-entry settings array.
pub mod settings_index {
    pub const STATS_ENABLED: usize = 0;
    pub const CONNECTION_TIMEOUT_SECONDS: usize = 1;
    pub const MAX_CONNECTIONS: usize = 2;
    pub const COUNT: usize = 3;
}

pub const SETTINGS_ENTRY_LEN: usize = 4;

pub fn encode_settings_entry(value: u32) -> [u8; SETTINGS_ENTRY_LEN] {
    value.to_ne_bytes()
}

pub fn decode_settings_entry(buf: &[u8]) -> Result<u32, CodecError> {
    require_len(buf, SETTINGS_ENTRY_LEN)?;
    Ok(u32::from_ne_bytes(buf[0..4].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpm_key_round_trip() {
        let key = LpmKey {
            prefix_len: 16,
            ip: 0x0a01_0203,
        };
        let decoded = LpmKey::decode(&key.encode()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn weighted_route_value_is_72_bytes_and_round_trips() {
        let mut targets = [RouteTargetSlot::default(); MAX_TARGETS];
        targets[0] = RouteTargetSlot {
            ip: 0x0a00_0001,
            port: 8080,
            cumulative_weight: 71,
        };
        targets[1] = RouteTargetSlot {
            ip: 0x0a00_0002,
            port: 8081,
            cumulative_weight: 100,
        };
        let value = WeightedRouteValue::new(2, route_flags::STATS_ENABLED, targets).unwrap();
        let encoded = value.encode();
        assert_eq!(encoded.len(), WEIGHTED_ROUTE_VALUE_LEN);
        assert_eq!(WEIGHTED_ROUTE_VALUE_LEN, 72);
        let decoded = WeightedRouteValue::decode(&encoded).unwrap();
        assert_eq!(decoded.target_count, 2);
        assert_eq!(decoded.flags, route_flags::STATS_ENABLED);
        assert_eq!(decoded.targets[0], targets[0]);
        assert_eq!(decoded.targets[1], targets[1]);
    }

    #[test]
    fn weighted_route_value_rejects_zero_targets() {
        let targets = [RouteTargetSlot::default(); MAX_TARGETS];
        assert!(WeightedRouteValue::new(0, 0, targets).is_err());
    }

    #[test]
    fn decode_short_buffer() {
        let err = LpmKey::decode(&[0u8; 4]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortBuffer {
                expected: LPM_KEY_LEN,
                got: 4
            }
        );
    }

    #[test]
    fn decode_unknown_stats_event() {
        let mut buf = [0u8; STATS_EVENT_LEN];
        buf[0] = 9;
        assert_eq!(StatsEvent::decode(&buf).unwrap_err(), CodecError::UnknownEvent(9));
    }

    #[test]
    fn rate_limit_config_scales_by_1000() {
        let value = RateLimitConfigValue::from_rates(100.0, 200.0);
        assert_eq!(value.rate_scaled, 100_000);
        assert_eq!(value.burst_scaled, 200_000);
    }

    #[test]
    fn conntrack_value_is_128_bytes() {
        assert_eq!(CONNTRACK_VALUE_LEN, 128);
        let value = ConntrackValue {
            orig_dst_ip: 1,
            orig_dst_port: 2,
            nat_dst_ip: 3,
            nat_dst_port: 4,
            created_ns: 5,
            last_seen_ns: 6,
            packets_fwd: 7,
            packets_rev: 8,
            bytes_fwd: 9,
            bytes_rev: 10,
            proxy_protocol: ProxyProtocolState::default(),
        };
        let decoded = ConntrackValue::decode(&value.encode()).unwrap();
        assert_eq!(value, decoded);
    }
}
