//! The outermost SMAData2 envelope.
//!
//! Every packet on the link starts with a fixed 18-octet header: a `0x7E`
//! marker, a one-octet total length (never above `0x70`), a reserved zero, an
//! XOR check byte over the first three octets, source and destination
//! Bluetooth addresses, and a little-endian 16-bit type.

use bytes::{Buf, BytesMut};

use crate::SmaError;
use crate::address::BtAddr;

/// Size of the outer packet header.
pub const OUTER_HLEN: usize = 18;
/// Largest total packet length the protocol allows.
pub const MAX_OUTER_LEN: usize = 0x70;

/// Packet start marker, shared with the PPP flag byte.
pub const START_MARKER: u8 = 0x7e;

pub const OTYPE_PPP: u16 = 0x01;
pub const OTYPE_HELLO: u16 = 0x02;
pub const OTYPE_GETVAR: u16 = 0x03;
pub const OTYPE_VARVAL: u16 = 0x04;
/// Peer list announcement, sent by the inverter after HELLO.
pub const OTYPE_PEERS: u16 = 0x05;
pub const OTYPE_ERROR: u16 = 0x07;
pub const OTYPE_PPP2: u16 = 0x08;

/// Variable id for the link signal strength, fetched with `OTYPE_GETVAR`.
pub const OVAR_SIGNAL: u16 = 0x05;

/// A decoded outer envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterPacket {
    pub src: BtAddr,
    pub dst: BtAddr,
    /// Outer packet type, one of the `OTYPE_*` constants for known traffic.
    pub ptype: u16,
    pub payload: Vec<u8>,
}

/// Encodes an outer packet ready for the wire.
pub fn encode(src: BtAddr, dst: BtAddr, ptype: u16, payload: &[u8]) -> Result<Vec<u8>, SmaError> {
    let pktlen = payload.len() + OUTER_HLEN;
    if pktlen > MAX_OUTER_LEN {
        return Err(SmaError::OversizePayload);
    }
    let pktlen = pktlen as u8;

    let mut pkt = Vec::with_capacity(pktlen as usize);
    pkt.push(START_MARKER);
    pkt.push(pktlen);
    pkt.push(0x00);
    pkt.push(START_MARKER ^ pktlen);
    pkt.extend_from_slice(&src.0);
    pkt.extend_from_slice(&dst.0);
    pkt.extend_from_slice(&ptype.to_le_bytes());
    pkt.extend_from_slice(payload);
    Ok(pkt)
}

/// Validates the four fixed header octets and returns the declared length.
fn check_header(hdr: &[u8]) -> Result<usize, SmaError> {
    if hdr[0] != START_MARKER {
        return Err(SmaError::BadStartMarker);
    }
    if hdr[1] as usize > MAX_OUTER_LEN || (hdr[1] as usize) < OUTER_HLEN || hdr[2] != 0 {
        return Err(SmaError::BadLength);
    }
    if hdr[3] != (hdr[0] ^ hdr[1] ^ hdr[2]) {
        return Err(SmaError::BadHeaderChecksum);
    }
    Ok(hdr[1] as usize)
}

/// Attempts to cut one complete packet from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; consumed bytes are removed
/// from the buffer only once a full packet is present. Header validation
/// errors are fatal, the stream has lost framing.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<OuterPacket>, SmaError> {
    if buf.len() < OUTER_HLEN {
        return Ok(None);
    }
    let pktlen = check_header(&buf[..4])?;
    if buf.len() < pktlen {
        return Ok(None);
    }

    let pkt = buf.copy_to_bytes(pktlen);
    Ok(Some(OuterPacket {
        src: BtAddr::from_wire(&pkt[4..10]),
        dst: BtAddr::from_wire(&pkt[10..16]),
        ptype: u16::from_le_bytes([pkt[16], pkt[17]]),
        payload: pkt[OUTER_HLEN..].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> BtAddr {
        BtAddr([0x11, 0x22, 0x33, 0x44, 0x55, last])
    }

    #[test]
    fn encode_builds_valid_header() {
        let pkt = encode(addr(1), addr(2), OTYPE_HELLO, &[0xca, 0xfe]).unwrap();
        assert_eq!(pkt.len(), OUTER_HLEN + 2);
        assert_eq!(pkt[0], 0x7e);
        assert_eq!(pkt[1] as usize, pkt.len());
        assert_eq!(pkt[2], 0x00);
        assert_eq!(pkt[3], pkt[0] ^ pkt[1] ^ pkt[2]);
        assert_eq!(&pkt[16..18], &[0x02, 0x00]);
    }

    #[test]
    fn round_trip() {
        let payloads: [&[u8]; 3] = [&[], &[0x00], &[0xab; 0x5e]];
        for payload in payloads {
            let wire = encode(addr(1), addr(2), OTYPE_VARVAL, payload).unwrap();
            let mut buf = BytesMut::from(&wire[..]);
            let pkt = try_decode(&mut buf).unwrap().unwrap();
            assert_eq!(pkt.src, addr(1));
            assert_eq!(pkt.dst, addr(2));
            assert_eq!(pkt.ptype, OTYPE_VARVAL);
            assert_eq!(pkt.payload, payload);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn oversize_payload_rejected() {
        let payload = [0u8; MAX_OUTER_LEN - OUTER_HLEN + 1];
        assert!(matches!(
            encode(addr(1), addr(2), OTYPE_PPP, &payload),
            Err(SmaError::OversizePayload)
        ));
    }

    #[test]
    fn short_buffer_needs_more() {
        let wire = encode(addr(1), addr(2), OTYPE_HELLO, &[1, 2, 3, 4]).unwrap();
        let mut buf = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(try_decode(&mut buf).unwrap().is_none());
        // Nothing consumed until the packet completes
        assert_eq!(buf.len(), wire.len() - 1);
        buf.extend_from_slice(&wire[wire.len() - 1..]);
        assert!(try_decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn two_packets_in_one_buffer() {
        let a = encode(addr(1), addr(2), OTYPE_HELLO, &[1]).unwrap();
        let b = encode(addr(3), addr(4), OTYPE_PEERS, &[2, 3]).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);
        let first = try_decode(&mut buf).unwrap().unwrap();
        let second = try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload, vec![1]);
        assert_eq!(second.payload, vec![2, 3]);
        assert!(try_decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn bad_header_bytes_are_fatal() {
        let good = encode(addr(1), addr(2), OTYPE_HELLO, &[]).unwrap();

        let mut wrong_marker = good.clone();
        wrong_marker[0] = 0x7f;
        let mut buf = BytesMut::from(&wrong_marker[..]);
        assert!(matches!(try_decode(&mut buf), Err(SmaError::BadStartMarker)));

        let mut wrong_len = good.clone();
        wrong_len[1] = 0x71;
        wrong_len[3] = wrong_len[0] ^ wrong_len[1] ^ wrong_len[2];
        let mut buf = BytesMut::from(&wrong_len[..]);
        assert!(matches!(try_decode(&mut buf), Err(SmaError::BadLength)));

        let mut wrong_check = good;
        wrong_check[3] ^= 0x01;
        let mut buf = BytesMut::from(&wrong_check[..]);
        assert!(matches!(
            try_decode(&mut buf),
            Err(SmaError::BadHeaderChecksum)
        ));
    }
}
