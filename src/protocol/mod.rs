//! The three framing layers of the SMAData2 wire protocol.
//!
//! Receive path: raw stream bytes are cut into outer envelopes
//! ([`outer`]), outer payloads of PPP type accumulate in per-source buffers
//! until a complete byte-stuffed frame appears ([`ppp`]), and frames carrying
//! the SMA protocol number decode into 6560 command packets ([`inner`]).
//! Transmit is the inverse chain. Every stage is a pure codec returning
//! `Result`; routing and waiting live in [`crate::connection`].

pub mod inner;
pub mod outer;
pub mod ppp;
