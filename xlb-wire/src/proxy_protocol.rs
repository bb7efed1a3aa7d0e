//! PROXY-protocol-v2 header preparation. The TC egress program emits the
//! header on the wire using `orig_client_ip`/`orig_client_port` read out of
//! the conntrack value's [`crate::classic::ProxyProtocolState`] block; this
//! module only prepares that byte layout, it never writes to a socket.

pub const SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

pub const VER_CMD: u8 = 0x21;

pub mod fam_proto {
    pub const INET_STREAM: u8 = 0x11;
    pub const INET6_STREAM: u8 = 0x21;
}

pub const V4_ADDR_LEN: u16 = 12;
pub const V6_ADDR_LEN: u16 = 36;

pub const V4_HEADER_LEN: usize = 12 + 1 + 1 + 2 + 12;
pub const V6_HEADER_LEN: usize = 12 + 1 + 1 + 2 + 36;

/// IPv4/TCP variant: `src_ip | dst_ip | src_port | dst_port`, network order.
pub fn encode_v4(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16) -> [u8; V4_HEADER_LEN] {
    let mut out = [0u8; V4_HEADER_LEN];
    out[0..12].copy_from_slice(&SIGNATURE);
    out[12] = VER_CMD;
    out[13] = fam_proto::INET_STREAM;
    out[14..16].copy_from_slice(&V4_ADDR_LEN.to_be_bytes());
    out[16..20].copy_from_slice(&src_ip.to_be_bytes());
    out[20..24].copy_from_slice(&dst_ip.to_be_bytes());
    out[24..26].copy_from_slice(&src_port.to_be_bytes());
    out[26..28].copy_from_slice(&dst_port.to_be_bytes());
    out
}

/// IPv6/TCP variant: `src_ip | dst_ip | src_port | dst_port`, network order.
pub fn encode_v6(
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    src_port: u16,
    dst_port: u16,
) -> [u8; V6_HEADER_LEN] {
    let mut out = [0u8; V6_HEADER_LEN];
    out[0..12].copy_from_slice(&SIGNATURE);
    out[12] = VER_CMD;
    out[13] = fam_proto::INET6_STREAM;
    out[14..16].copy_from_slice(&V6_ADDR_LEN.to_be_bytes());
    out[16..32].copy_from_slice(&src_ip);
    out[32..48].copy_from_slice(&dst_ip);
    out[48..50].copy_from_slice(&src_port.to_be_bytes());
    out[50..52].copy_from_slice(&dst_port.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_header_starts_with_signature_and_has_correct_addr_len() {
        let header = encode_v4(0x0a00_0001, 0x0a00_0002, 1234, 80);
        assert_eq!(&header[0..12], &SIGNATURE);
        assert_eq!(header[12], VER_CMD);
        assert_eq!(header[13], fam_proto::INET_STREAM);
        assert_eq!(u16::from_be_bytes([header[14], header[15]]), V4_ADDR_LEN);
    }
}
