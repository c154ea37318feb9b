//! Client library for SMA photovoltaic inverters speaking the SMAData2
//! protocol over a Bluetooth RFCOMM link.
//!
//! The protocol is three nested framing layers: a length-prefixed outer
//! envelope addressed by Bluetooth-style addresses, an HDLC/PPP-style
//! byte-stuffed frame with an FCS-16 checksum, and an inner "6560" command
//! packet carrying a 15-bit request tag. [`Connection`] drives all three over
//! any reliable octet stream and exposes the high-level operations: the HELLO
//! handshake, logon, live signal and yield queries, historic-yield downloads
//! and clock setting.
//!
//! The transport is anything implementing [`ReadWrite`]; on Linux the
//! `rfcomm` feature provides [`rfcomm::connect`] for a real inverter.

#![warn(missing_debug_implementations)]
#![warn(missing_copy_implementations)]

pub mod address;
pub mod config;
pub mod connection;
pub mod history;
pub mod protocol;
#[cfg(feature = "rfcomm")]
pub mod rfcomm;
pub mod util;

pub use address::{BtAddr, SmaAddr};
pub use connection::{Connection, YieldReading};
pub use history::{HistoricSample, SampleKind, SampleStore};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// A trait combining all required characteristics for an inverter
/// communication socket.
///
/// Any ordered, reliable, octet-oriented stream suffices; in practice this is
/// a Bluetooth RFCOMM stream, but tokio's `TcpStream`, `UnixStream` and
/// `DuplexStream` all qualify too.
pub trait ReadWrite: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug {}

// Blanket implementation for any compatible type
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug> ReadWrite for T {}

/// Type alias for boxed inverter connection sockets.
pub type SmaSocket = Box<dyn ReadWrite>;

/// Comprehensive error type for all inverter communication failures.
///
/// Framing and protocol errors are fatal to the connection: once the byte
/// stream has lost synchronization there is no way to recover it. A
/// [`SmaError::Device`] error leaves the connection usable.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SmaError {
    #[error("inverter socket io failed")]
    Io(#[from] std::io::Error),

    #[error("missing packet start marker")]
    BadStartMarker,
    #[error("bad outer packet length")]
    BadLength,
    #[error("bad outer header check byte")]
    BadHeaderChecksum,
    #[error("payload too large for outer packet")]
    OversizePayload,

    #[error("missing flag byte on PPP frame")]
    MissingFlag,
    #[error("truncated escape sequence in PPP frame")]
    TruncatedEscape,
    #[error("bad address/control header on PPP frame")]
    BadPppHeader,
    #[error("bad checksum on PPP frame")]
    BadCrc,

    #[error("inner packet payload length must be a multiple of 4")]
    InnerAlignment,
    #[error("inner length field says {0} bytes but payload is {1} bytes")]
    InnerLengthMismatch(usize, usize),
    #[error("request type {0:#06x} has the response bit set")]
    BadRequestType(u16),

    #[error("unexpected multipacket reply")]
    UnexpectedMultipacket,
    #[error("didn't see first fragment of reply")]
    MissingFirstFragment,
    #[error("got fragment index {got} instead of {expected}")]
    FragmentOrder { got: u16, expected: u16 },

    #[error("inverter returned error {0:#06x}")]
    Device(u16),

    #[error("unexpected response from inverter")]
    UnexpectedResponse,
    #[error("bad bluetooth address `{0}`")]
    InvalidAddress(String),
    #[error("password longer than 12 bytes")]
    PasswordTooLong,
    #[error("unparseable time `{0}`")]
    InvalidTime(String),

    #[error("malformed configuration")]
    Config(#[from] serde_json::Error),
}
