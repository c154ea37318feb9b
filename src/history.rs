//! Historic yield samples and their persistence contract.
//!
//! The library does not own a database; callers inject anything implementing
//! [`SampleStore`]. Stores are idempotent on the `(serial, timestamp, kind)`
//! key so a download can always be replayed safely. [`sync_inverter`] pulls
//! everything the device recorded since the last stored sample.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::connection::Connection;
use crate::{SmaError, util};

/// Sentinel yield value meaning "no reading"; filtered out of results.
pub const NO_READING: u32 = 0xffff_ffff;

/// One historic data point from the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricSample {
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    /// Cumulative yield in watt-hours at that time.
    pub yield_wh: u32,
}

/// Discriminator for persisted sample series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SampleKind {
    /// Externally controlled ad-hoc samples.
    Adhoc = 0,
    /// Inverter-recorded 5-minute samples.
    InverterFast = 1,
    /// Inverter-recorded daily samples.
    InverterDaily = 2,
}

/// Persistence for downloaded samples.
///
/// `add_sample` must be idempotent on `(serial, timestamp, kind)`; batches
/// are flushed by `commit` at operation boundaries.
pub trait SampleStore: Send + Sync {
    fn add_sample(
        &mut self,
        serial: u32,
        timestamp: u32,
        kind: SampleKind,
        total_yield: u32,
    ) -> impl std::future::Future<Output = Result<(), SmaError>> + Send;

    /// Timestamp of the newest stored sample of `kind`, if any.
    fn last_sample(
        &mut self,
        serial: u32,
        kind: SampleKind,
    ) -> impl std::future::Future<Output = Result<Option<u32>, SmaError>> + Send;

    fn commit(&mut self) -> impl std::future::Future<Output = Result<(), SmaError>> + Send;
}

/// In-memory store, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: HashMap<(u32, u32, SampleKind), u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Yield value stored for one key, if present.
    pub fn get(&self, serial: u32, timestamp: u32, kind: SampleKind) -> Option<u32> {
        self.samples.get(&(serial, timestamp, kind)).copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleStore for MemoryStore {
    async fn add_sample(
        &mut self,
        serial: u32,
        timestamp: u32,
        kind: SampleKind,
        total_yield: u32,
    ) -> Result<(), SmaError> {
        self.samples.insert((serial, timestamp, kind), total_yield);
        Ok(())
    }

    async fn last_sample(
        &mut self,
        serial: u32,
        kind: SampleKind,
    ) -> Result<Option<u32>, SmaError> {
        Ok(self
            .samples
            .keys()
            .filter(|(s, _, k)| *s == serial && *k == kind)
            .map(|(_, t, _)| *t)
            .max())
    }

    async fn commit(&mut self) -> Result<(), SmaError> {
        Ok(())
    }
}

/// Downloads one sample series since the newest stored point.
async fn sync_kind<S: SampleStore>(
    conn: &mut Connection,
    store: &mut S,
    serial: u32,
    kind: SampleKind,
    start_time: Option<u32>,
    now: u32,
) -> Result<Vec<HistoricSample>, SmaError> {
    let last = store.last_sample(serial, kind).await?;
    let from = match last.or(start_time) {
        Some(t) => t + 1,
        None => 0,
    };

    let data = match kind {
        SampleKind::InverterDaily => conn.historic_daily(from, now).await?,
        _ => conn.historic(from, now).await?,
    };

    for sample in &data {
        store
            .add_sample(serial, sample.timestamp, kind, sample.yield_wh)
            .await?;
    }
    debug!(serial, ?kind, count = data.len(), "stored samples");
    Ok(data)
}

/// Pulls the fast and daily historic series from a connected, logged-on
/// inverter into `store`, committing at the end.
///
/// Returns the newly downloaded `(fast, daily)` samples.
pub async fn sync_inverter<S: SampleStore>(
    conn: &mut Connection,
    store: &mut S,
    serial: u32,
    start_time: Option<u32>,
) -> Result<(Vec<HistoricSample>, Vec<HistoricSample>), SmaError> {
    let now = util::now_timestamp();

    let fast = sync_kind(conn, store, serial, SampleKind::InverterFast, start_time, now).await?;
    let daily =
        sync_kind(conn, store, serial, SampleKind::InverterDaily, start_time, now).await?;
    store.commit().await?;

    info!(
        serial,
        fast = fast.len(),
        daily = daily.len(),
        "inverter download complete"
    );
    Ok((fast, daily))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{BtAddr, SmaAddr};
    use crate::protocol::inner::InnerPacket;
    use crate::protocol::outer::{self, OTYPE_PPP};
    use crate::protocol::ppp::{self, SMA_PROTOCOL_ID};
    use tokio::io::AsyncWriteExt;

    const LOCAL: BtAddr = BtAddr([0x39, 0xfb, 0x10, 0x3f, 0x00, 0x78]);
    const REMOTE: BtAddr = BtAddr([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);

    fn historic_response(tag: u16, ts: u32, value: u32) -> Vec<u8> {
        let mut extra = Vec::with_capacity(12);
        extra.extend_from_slice(&ts.to_le_bytes());
        extra.extend_from_slice(&value.to_le_bytes());
        extra.extend_from_slice(&[0; 4]);

        let mut pkt =
            InnerPacket::request(0xe0, 0, 0, 0, 0, tag, 0x0200, 0x7001, 0, 0, extra);
        pkt.dst = SmaAddr::LOCAL;
        pkt.response = true;
        let frame = ppp::encode_frame(SMA_PROTOCOL_ID, &pkt.serialize().unwrap());
        outer::encode(REMOTE, LOCAL, OTYPE_PPP, &frame).unwrap()
    }

    #[tokio::test]
    async fn sync_inverter_stores_both_series() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (_peer_rx, mut peer_tx) = tokio::io::split(theirs);
        let mut conn = Connection::new(Box::new(ours), LOCAL, REMOTE);
        let mut store = MemoryStore::new();

        // Tag 1 answers the fast query, tag 2 the daily one
        peer_tx
            .write_all(&historic_response(1, 1000, 500))
            .await
            .unwrap();
        peer_tx
            .write_all(&historic_response(2, 86400, 600))
            .await
            .unwrap();

        let (fast, daily) = sync_inverter(&mut conn, &mut store, 21, Some(0))
            .await
            .unwrap();
        assert_eq!(fast.len(), 1);
        assert_eq!(daily.len(), 1);
        assert_eq!(store.get(21, 1000, SampleKind::InverterFast), Some(500));
        assert_eq!(store.get(21, 86400, SampleKind::InverterDaily), Some(600));
    }

    #[tokio::test]
    async fn memory_store_is_idempotent() {
        let mut store = MemoryStore::new();
        store
            .add_sample(21, 1000, SampleKind::InverterFast, 500)
            .await
            .unwrap();
        store
            .add_sample(21, 1000, SampleKind::InverterFast, 500)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(21, 1000, SampleKind::InverterFast), Some(500));
    }

    #[tokio::test]
    async fn last_sample_is_per_serial_and_kind() {
        let mut store = MemoryStore::new();
        store
            .add_sample(21, 1000, SampleKind::InverterFast, 500)
            .await
            .unwrap();
        store
            .add_sample(21, 2000, SampleKind::InverterFast, 510)
            .await
            .unwrap();
        store
            .add_sample(21, 9000, SampleKind::InverterDaily, 600)
            .await
            .unwrap();
        store
            .add_sample(99, 8000, SampleKind::InverterFast, 700)
            .await
            .unwrap();

        assert_eq!(
            store.last_sample(21, SampleKind::InverterFast).await.unwrap(),
            Some(2000)
        );
        assert_eq!(
            store.last_sample(21, SampleKind::InverterDaily).await.unwrap(),
            Some(9000)
        );
        assert_eq!(
            store.last_sample(21, SampleKind::Adhoc).await.unwrap(),
            None
        );
    }
}
