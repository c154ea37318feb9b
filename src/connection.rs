//! The connection to one inverter: framing pipeline, request/response
//! correlation, and the high-level operations.
//!
//! A [`Connection`] owns its transport and is driven by exactly one task.
//! Every operation transmits one tagged 6560 request and then pulls decoded
//! events off the stream until the matching reply arrives; `&mut self` on
//! all waits makes overlapping requests unrepresentable.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::address::{BtAddr, SmaAddr};
use crate::history::{HistoricSample, NO_READING};
use crate::protocol::inner::InnerPacket;
use crate::protocol::outer::{
    self, OTYPE_GETVAR, OTYPE_HELLO, OTYPE_PEERS, OTYPE_PPP, OTYPE_PPP2, OTYPE_VARVAL, OVAR_SIGNAL,
    OuterPacket,
};
use crate::protocol::ppp::{self, SMA_PROTOCOL_ID};
use crate::{ReadWrite, SmaError};

/// The greeting an inverter opens the conversation with. Only the first four
/// octets are authoritative; the rest is the usual firmware payload.
const HELLO_GREETING: [u8; 13] = [
    0x00, 0x04, 0x70, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
];

/// User-level access group for LOGON.
const USER_GROUP: u32 = 7;

/// Object id of the device clock, used by `set_time`.
const TIME_OBJECT: u32 = 0x0023_6d00;

/// Transport read chunk bound.
const MAX_BUFFER: usize = 512;

/// One decoded record out of the receive pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    /// An outer envelope that passed the destination filter.
    Outer(OuterPacket),
    /// A 6560 packet addressed to us or to the SMA broadcast address.
    Inner(InnerPacket),
}

/// A timestamped cumulative yield reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldReading {
    /// Seconds since the Unix epoch, as reported by the device.
    pub timestamp: u32,
    /// Cumulative energy in watt-hours.
    pub yield_wh: u32,
}

/// A live connection to one SMA inverter.
#[derive(Debug)]
pub struct Connection {
    stream: Box<dyn ReadWrite>,
    local_addr: BtAddr,
    remote_addr: BtAddr,
    rxbuf: BytesMut,
    ppp: ppp::Reassembler,
    tag: u16,
    events: VecDeque<Event>,
}

impl Connection {
    /// Wraps an established stream to the inverter.
    ///
    /// `local_addr` is the address of the local Bluetooth adapter;
    /// `remote_addr` is the inverter.
    pub fn new(stream: Box<dyn ReadWrite>, local_addr: BtAddr, remote_addr: BtAddr) -> Self {
        Connection {
            stream,
            local_addr,
            remote_addr,
            rxbuf: BytesMut::with_capacity(MAX_BUFFER),
            ppp: ppp::Reassembler::new(),
            tag: 0,
            events: VecDeque::new(),
        }
    }

    /// The inverter's Bluetooth address.
    pub fn remote_addr(&self) -> BtAddr {
        self.remote_addr
    }

    /// The local adapter's Bluetooth address.
    pub fn local_addr(&self) -> BtAddr {
        self.local_addr
    }

    /// Allocates the next request tag. 15 bits, never zero.
    fn next_tag(&mut self) -> u16 {
        self.tag = (self.tag + 1) & 0x7fff;
        if self.tag == 0 {
            self.tag = 1;
        }
        self.tag
    }

    //
    // Receive pipeline
    //

    /// Returns the next decoded event, reading from the transport as needed.
    ///
    /// Traffic for other destinations, unknown outer types and non-SMA PPP
    /// protocols is discarded here and never surfaces.
    pub async fn next_event(&mut self) -> Result<Event, SmaError> {
        loop {
            if let Some(ev) = self.events.pop_front() {
                return Ok(ev);
            }
            let n = self.stream.read_buf(&mut self.rxbuf).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            trace!(bytes = n, "read from transport");
            while let Some(pkt) = outer::try_decode(&mut self.rxbuf)? {
                self.route_outer(pkt)?;
            }
        }
    }

    fn route_outer(&mut self, pkt: OuterPacket) -> Result<(), SmaError> {
        if !pkt.dst.accepts(&self.local_addr) {
            trace!(dst = %pkt.dst, "discarding packet for other destination");
            return Ok(());
        }
        trace!(src = %pkt.src, ptype = pkt.ptype, len = pkt.payload.len(), "outer packet");

        let is_ppp = pkt.ptype == OTYPE_PPP || pkt.ptype == OTYPE_PPP2;
        let (src, payload) = (pkt.src, pkt.payload.clone());
        self.events.push_back(Event::Outer(pkt));

        if is_ppp {
            for frame in self.ppp.feed(src, &payload)? {
                if frame.protocol != SMA_PROTOCOL_ID {
                    debug!(protocol = frame.protocol, "discarding non-SMA ppp frame");
                    continue;
                }
                let inner = InnerPacket::parse(&frame.payload)?;
                if inner.dst != SmaAddr::LOCAL && inner.dst != SmaAddr::BROADCAST {
                    trace!(dst = %inner.dst, "discarding 6560 packet for other device");
                    continue;
                }
                self.events.push_back(Event::Inner(inner));
            }
        }
        Ok(())
    }

    //
    // Transmit side
    //

    /// Sends one outer envelope.
    pub async fn send_outer(
        &mut self,
        src: BtAddr,
        dst: BtAddr,
        ptype: u16,
        payload: &[u8],
    ) -> Result<(), SmaError> {
        let pkt = outer::encode(src, dst, ptype, payload)?;
        trace!(dst = %dst, ptype, len = pkt.len(), "sending outer packet");
        self.stream.write_all(&pkt).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Builds and sends one 6560 request under a fresh tag, returning the tag.
    #[allow(clippy::too_many_arguments)]
    async fn request(
        &mut self,
        a2: u8,
        b1: u8,
        b2: u8,
        c1: u8,
        c2: u8,
        ptype: u16,
        subtype: u16,
        arg1: u32,
        arg2: u32,
        extra: Vec<u8>,
    ) -> Result<u16, SmaError> {
        let tag = self.next_tag();
        let pkt = InnerPacket::request(a2, b1, b2, c1, c2, tag, ptype, subtype, arg1, arg2, extra);
        let frame = ppp::encode_frame(SMA_PROTOCOL_ID, &pkt.serialize()?);
        debug!(tag, ptype, subtype, "sending 6560 request");
        self.send_outer(self.local_addr, BtAddr::BROADCAST, OTYPE_PPP, &frame)
            .await?;
        Ok(tag)
    }

    //
    // Waits
    //

    /// Waits for an outer packet of type `wtype` whose payload starts with
    /// `prefix`, returning its payload.
    pub async fn wait_outer(&mut self, wtype: u16, prefix: &[u8]) -> Result<Vec<u8>, SmaError> {
        loop {
            if let Event::Outer(pkt) = self.next_event().await?
                && pkt.ptype == wtype
                && pkt.payload.starts_with(prefix)
            {
                return Ok(pkt.payload);
            }
        }
    }

    /// Waits for the single-packet reply to the request with `tag`.
    pub async fn wait_6560(&mut self, tag: u16) -> Result<InnerPacket, SmaError> {
        loop {
            let Event::Inner(pkt) = self.next_event().await? else {
                continue;
            };
            if !pkt.response || pkt.tag != tag {
                continue;
            }
            if pkt.pktcount != 0 || !pkt.first {
                return Err(SmaError::UnexpectedMultipacket);
            }
            if pkt.error != 0 {
                return Err(SmaError::Device(pkt.error));
            }
            return Ok(pkt);
        }
    }

    /// Collects the fragments of a multi-packet reply to `tag`, in
    /// transmission order.
    ///
    /// The first fragment announces the remaining count; every subsequent
    /// one must count down by exactly one, reaching zero on the last.
    pub async fn wait_6560_multi(&mut self, tag: u16) -> Result<Vec<InnerPacket>, SmaError> {
        let mut frags: Vec<InnerPacket> = Vec::new();
        let mut total: u32 = 0;
        loop {
            let Event::Inner(pkt) = self.next_event().await? else {
                continue;
            };
            if !pkt.response || pkt.tag != tag {
                continue;
            }
            if pkt.error != 0 {
                return Err(SmaError::Device(pkt.error));
            }
            if frags.is_empty() {
                if !pkt.first {
                    return Err(SmaError::MissingFirstFragment);
                }
                total = u32::from(pkt.pktcount) + 1;
            } else {
                let expected = total - frags.len() as u32 - 1;
                if pkt.first || u32::from(pkt.pktcount) != expected {
                    return Err(SmaError::FragmentOrder {
                        got: pkt.pktcount,
                        expected: expected as u16,
                    });
                }
            }
            let last = pkt.pktcount == 0;
            frags.push(pkt);
            if last {
                return Ok(frags);
            }
        }
    }

    //
    // Operations
    //

    /// Performs the HELLO handshake. The inverter speaks first; we echo its
    /// greeting and wait for the peer-list announcement.
    pub async fn hello(&mut self) -> Result<(), SmaError> {
        let greeting = self.wait_outer(OTYPE_HELLO, &[]).await?;
        if !greeting.starts_with(&HELLO_GREETING[..4]) {
            return Err(SmaError::UnexpectedResponse);
        }
        if greeting != HELLO_GREETING {
            warn!(payload = ?greeting, "unusual HELLO payload, echoing anyway");
        }
        let remote = self.remote_addr;
        self.send_outer(BtAddr::ZERO, remote, OTYPE_HELLO, &greeting)
            .await?;
        self.wait_outer(OTYPE_PEERS, &[]).await?;
        debug!(remote = %remote, "handshake complete");
        Ok(())
    }

    /// Reads a link variable, returning its raw value.
    pub async fn get_var(&mut self, var: u16) -> Result<Vec<u8>, SmaError> {
        let remote = self.remote_addr;
        self.send_outer(BtAddr::ZERO, remote, OTYPE_GETVAR, &var.to_le_bytes())
            .await?;
        let val = self.wait_outer(OTYPE_VARVAL, &var.to_le_bytes()).await?;
        Ok(val[2..].to_vec())
    }

    /// Bluetooth signal strength as a percentage.
    pub async fn get_signal(&mut self) -> Result<f64, SmaError> {
        let val = self.get_var(OVAR_SIGNAL).await?;
        if val.len() < 3 {
            return Err(SmaError::UnexpectedResponse);
        }
        Ok(f64::from(val[2]) / 255.0 * 100.0)
    }

    /// Authenticates with the inverter's user password.
    ///
    /// The password is padded to 12 octets and byte-obfuscated the way the
    /// firmware expects; `timeout` is the session lifetime in seconds.
    pub async fn logon(&mut self, password: &str, timeout: u32) -> Result<(), SmaError> {
        let password = password.as_bytes();
        if password.len() > 12 {
            return Err(SmaError::PasswordTooLong);
        }

        let mut extra = vec![0xaa, 0xaa, 0xbb, 0xbb, 0x00, 0x00, 0x00, 0x00];
        for i in 0..12 {
            let b = password.get(i).copied().unwrap_or(0x00);
            extra.push(((u16::from(b) + 0x88) % 0xff) as u8);
        }

        let tag = self
            .request(0xa0, 0x00, 0x01, 0x00, 0x01, 0x040c, 0xfffd, USER_GROUP, timeout, extra)
            .await?;
        self.wait_6560(tag).await?;
        debug!("logged on");
        Ok(())
    }

    /// Total generation to date.
    pub async fn total_yield(&mut self) -> Result<YieldReading, SmaError> {
        self.yield_query(0x0026_0100, 0x0026_01ff).await
    }

    /// Generation for the current day.
    pub async fn daily_yield(&mut self) -> Result<YieldReading, SmaError> {
        self.yield_query(0x0026_2200, 0x0026_22ff).await
    }

    async fn yield_query(&mut self, arg1: u32, arg2: u32) -> Result<YieldReading, SmaError> {
        let tag = self
            .request(0xa0, 0x00, 0x00, 0x00, 0x00, 0x0200, 0x5400, arg1, arg2, Vec::new())
            .await?;
        let rsp = self.wait_6560(tag).await?;
        if rsp.extra.len() < 12 {
            return Err(SmaError::UnexpectedResponse);
        }
        Ok(YieldReading {
            timestamp: u32::from_le_bytes(rsp.extra[4..8].try_into().unwrap()),
            yield_wh: u32::from_le_bytes(rsp.extra[8..12].try_into().unwrap()),
        })
    }

    /// Five-minute historic yield samples between two timestamps.
    pub async fn historic(
        &mut self,
        from_time: u32,
        to_time: u32,
    ) -> Result<Vec<HistoricSample>, SmaError> {
        self.historic_query(0x7000, from_time, to_time).await
    }

    /// Daily historic yield samples between two timestamps.
    pub async fn historic_daily(
        &mut self,
        from_time: u32,
        to_time: u32,
    ) -> Result<Vec<HistoricSample>, SmaError> {
        self.historic_query(0x7020, from_time, to_time).await
    }

    async fn historic_query(
        &mut self,
        subtype: u16,
        from_time: u32,
        to_time: u32,
    ) -> Result<Vec<HistoricSample>, SmaError> {
        let tag = self
            .request(0xe0, 0x00, 0x00, 0x00, 0x00, 0x0200, subtype, from_time, to_time, Vec::new())
            .await?;
        let frags = self.wait_6560_multi(tag).await?;

        let mut points = Vec::new();
        for frag in &frags {
            // 12-octet records: timestamp, value, four octets of padding
            for rec in frag.extra.chunks_exact(12) {
                let timestamp = u32::from_le_bytes(rec[0..4].try_into().unwrap());
                let value = u32::from_le_bytes(rec[4..8].try_into().unwrap());
                if value != NO_READING {
                    points.push(HistoricSample {
                        timestamp,
                        yield_wh: value,
                    });
                }
            }
        }
        debug!(count = points.len(), "historic download complete");
        Ok(points)
    }

    /// Sets the device clock. The inverter sends no acknowledgement.
    ///
    /// `tz_offset` is the 16-bit timezone encoding from
    /// [`crate::util::tz_offset`].
    pub async fn set_time(&mut self, time: u32, tz_offset: u16) -> Result<(), SmaError> {
        let mut extra = Vec::with_capacity(32);
        extra.extend_from_slice(&TIME_OBJECT.to_le_bytes());
        extra.extend_from_slice(&time.to_le_bytes());
        extra.extend_from_slice(&time.to_le_bytes());
        extra.extend_from_slice(&time.to_le_bytes());
        extra.extend_from_slice(&tz_offset.to_le_bytes());
        extra.extend_from_slice(&0u16.to_le_bytes());
        extra.extend_from_slice(&0x007e_fe30u32.to_le_bytes());
        extra.extend_from_slice(&0x0000_0001u32.to_le_bytes());

        self.request(0xa0, 0x00, 0x00, 0x00, 0x00, 0x020a, 0xf000, TIME_OBJECT, TIME_OBJECT, extra)
            .await?;
        Ok(())
    }
}
