//! The inner "6560" SMA command packet, carried inside PPP frames under
//! protocol number `0x6560`.
//!
//! The 36-octet header encodes source and destination SMA addresses, a
//! device error field, fragmentation state (`pktcount` counting down to zero,
//! a "first fragment" bit folded into the tag word), a 15-bit request tag,
//! and the command type/subtype/argument words. All multi-byte fields are
//! little-endian; the extra payload length must be a multiple of four.

use crate::SmaError;
use crate::address::SmaAddr;

/// Size of the 6560 packet header.
pub const INNER_HLEN: usize = 36;

/// High bit of the tag word marks the first fragment of a reply.
const TAG_FIRST: u16 = 0x8000;
/// Low bit of the type word marks a response.
const TYPE_RESPONSE: u16 = 0x0001;

/// A decoded 6560 command packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerPacket {
    /// Command class byte.
    pub a2: u8,
    pub dst: SmaAddr,
    pub b1: u8,
    pub b2: u8,
    pub src: SmaAddr,
    pub c1: u8,
    pub c2: u8,
    /// Non-zero when the device reports an error for this request.
    pub error: u16,
    /// Remaining fragments after this one; zero on the last.
    pub pktcount: u16,
    /// 15-bit request correlation tag.
    pub tag: u16,
    /// Set on the first fragment of a reply.
    pub first: bool,
    /// Command type with the response bit stripped; other bits are carried
    /// verbatim between request and response.
    pub ptype: u16,
    pub response: bool,
    pub subtype: u16,
    pub arg1: u32,
    pub arg2: u32,
    /// Command-specific payload, length a multiple of four.
    pub extra: Vec<u8>,
}

impl InnerPacket {
    /// Builds an outgoing request addressed from the local SMA address to the
    /// broadcast address, the way every operation sends one.
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        a2: u8,
        b1: u8,
        b2: u8,
        c1: u8,
        c2: u8,
        tag: u16,
        ptype: u16,
        subtype: u16,
        arg1: u32,
        arg2: u32,
        extra: Vec<u8>,
    ) -> Self {
        InnerPacket {
            a2,
            dst: SmaAddr::BROADCAST,
            b1,
            b2,
            src: SmaAddr::LOCAL,
            c1,
            c2,
            error: 0,
            pktcount: 0,
            tag,
            first: true,
            ptype,
            response: false,
            subtype,
            arg1,
            arg2,
            extra,
        }
    }

    /// Serializes the packet as a PPP payload.
    pub fn serialize(&self) -> Result<Vec<u8>, SmaError> {
        if self.extra.len() % 4 != 0 {
            return Err(SmaError::InnerAlignment);
        }
        if self.ptype & TYPE_RESPONSE != 0 {
            return Err(SmaError::BadRequestType(self.ptype));
        }

        let innerlen = (self.extra.len() + INNER_HLEN) / 4;
        let mut out = Vec::with_capacity(INNER_HLEN + self.extra.len());
        out.push(innerlen as u8);
        out.push(self.a2);
        out.extend_from_slice(&self.dst.0);
        out.push(self.b1);
        out.push(self.b2);
        out.extend_from_slice(&self.src.0);
        out.push(self.c1);
        out.push(self.c2);
        out.extend_from_slice(&self.error.to_le_bytes());
        out.extend_from_slice(&self.pktcount.to_le_bytes());

        let mut tag = self.tag & 0x7fff;
        if self.first {
            tag |= TAG_FIRST;
        }
        out.extend_from_slice(&tag.to_le_bytes());

        let mut ptype = self.ptype;
        if self.response {
            ptype |= TYPE_RESPONSE;
        }
        out.extend_from_slice(&ptype.to_le_bytes());
        out.extend_from_slice(&self.subtype.to_le_bytes());
        out.extend_from_slice(&self.arg1.to_le_bytes());
        out.extend_from_slice(&self.arg2.to_le_bytes());
        out.extend_from_slice(&self.extra);
        Ok(out)
    }

    /// Parses a PPP payload carrying a 6560 packet.
    pub fn parse(payload: &[u8]) -> Result<Self, SmaError> {
        if payload.len() < INNER_HLEN {
            return Err(SmaError::InnerLengthMismatch(INNER_HLEN, payload.len()));
        }
        let declared = payload[0] as usize * 4;
        if declared != payload.len() {
            return Err(SmaError::InnerLengthMismatch(declared, payload.len()));
        }

        let tag_word = u16::from_le_bytes([payload[22], payload[23]]);
        let type_word = u16::from_le_bytes([payload[24], payload[25]]);

        Ok(InnerPacket {
            a2: payload[1],
            dst: SmaAddr::from_wire(&payload[2..8]),
            b1: payload[8],
            b2: payload[9],
            src: SmaAddr::from_wire(&payload[10..16]),
            c1: payload[16],
            c2: payload[17],
            error: u16::from_le_bytes([payload[18], payload[19]]),
            pktcount: u16::from_le_bytes([payload[20], payload[21]]),
            tag: tag_word & 0x7fff,
            first: tag_word & TAG_FIRST != 0,
            ptype: type_word & !TYPE_RESPONSE,
            response: type_word & TYPE_RESPONSE != 0,
            subtype: u16::from_le_bytes([payload[26], payload[27]]),
            arg1: u32::from_le_bytes(payload[28..32].try_into().unwrap()),
            arg2: u32::from_le_bytes(payload[32..36].try_into().unwrap()),
            extra: payload[INNER_HLEN..].to_vec(),
        })
    }
}
