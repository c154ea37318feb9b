//! Bluetooth RFCOMM transport, the link real inverters actually speak.
//!
//! SMA inverters expose the SMAData2 protocol on RFCOMM channel 1. This
//! module needs BlueZ and is only built with the `rfcomm` feature; everything
//! else in the crate works over any [`crate::ReadWrite`] stream.

use bluer::Address;
use bluer::rfcomm::{SocketAddr, Stream};
use tracing::debug;

use crate::address::BtAddr;
use crate::connection::Connection;
use crate::SmaError;

/// RFCOMM channel the inverter listens on.
const CHANNEL: u8 = 1;

fn to_bluer(addr: BtAddr) -> Address {
    // bluer keeps addresses in display order, the wire keeps them reversed
    let mut bytes = addr.0;
    bytes.reverse();
    Address::new(bytes)
}

fn from_bluer(addr: Address) -> BtAddr {
    let mut bytes = addr.0;
    bytes.reverse();
    BtAddr(bytes)
}

/// Opens an RFCOMM stream to the inverter at `remote` and wraps it in a
/// [`Connection`] ready for [`Connection::hello`].
pub async fn connect(remote: BtAddr) -> Result<Connection, SmaError> {
    let stream = Stream::connect(SocketAddr::new(to_bluer(remote), CHANNEL)).await?;
    let local = from_bluer(stream.as_ref().local_addr()?.addr);
    debug!(local = %local, remote = %remote, "rfcomm link up");
    Ok(Connection::new(Box::new(stream), local, remote))
}
