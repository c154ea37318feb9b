//! The two address namespaces of the SMAData2 protocol.
//!
//! Outer packets carry six-octet Bluetooth addresses, rendered as
//! colon-separated hex in *reversed* byte order (the least significant octet
//! appears last in the string, as `hcitool` prints them). Inner 6560 packets
//! carry six-octet SMA-internal addresses which are raw device identifiers
//! with no reversal. The asymmetry is deliberate and must be preserved.

use std::fmt;
use std::str::FromStr;

use crate::SmaError;

/// A Bluetooth device address in wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BtAddr(pub [u8; 6]);

impl BtAddr {
    /// The anonymous address, used as the source before login.
    pub const ZERO: BtAddr = BtAddr([0x00; 6]);
    /// The broadcast address.
    pub const BROADCAST: BtAddr = BtAddr([0xff; 6]);

    /// Reads an address from the start of a packet slice.
    ///
    /// # Panics
    /// Panics if `raw` is shorter than six octets; callers slice out of
    /// validated headers.
    pub fn from_wire(raw: &[u8]) -> Self {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&raw[..6]);
        BtAddr(addr)
    }

    /// Whether the outer receive filter accepts packets sent to this
    /// destination: our own address, broadcast, or the anonymous address.
    pub fn accepts(&self, local: &BtAddr) -> bool {
        self == local || *self == Self::BROADCAST || *self == Self::ZERO
    }
}

impl fmt::Display for BtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        // Reversed: least significant octet renders last
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl FromStr for BtAddr {
    type Err = SmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = [0u8; 6];
        let mut count = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 {
                return Err(SmaError::InvalidAddress(s.to_string()));
            }
            let octet = u8::from_str_radix(part, 16)
                .map_err(|_| SmaError::InvalidAddress(s.to_string()))?;
            addr[5 - i] = octet;
            count += 1;
        }
        if count != 6 {
            return Err(SmaError::InvalidAddress(s.to_string()));
        }
        Ok(BtAddr(addr))
    }
}

/// An SMA-internal device address, raw octets with no display reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmaAddr(pub [u8; 6]);

impl SmaAddr {
    /// The broadcast SMA address; all requests are sent to it.
    pub const BROADCAST: SmaAddr = SmaAddr([0xff; 6]);
    /// The fixed address this client announces for itself.
    pub const LOCAL: SmaAddr = SmaAddr([0x78, 0x00, 0x3f, 0x10, 0xfb, 0x39]);

    /// Reads an address from the start of a packet slice.
    ///
    /// # Panics
    /// Panics if `raw` is shorter than six octets.
    pub fn from_wire(raw: &[u8]) -> Self {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&raw[..6]);
        SmaAddr(addr)
    }
}

impl fmt::Display for SmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}
