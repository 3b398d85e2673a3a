use crate::domain::model::{
    DailyReport, Lot, LotId, LotStatus, Occupancy, OccupancyId, SlotId, SlotStatus,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

/// Source of "now" for timestamps. Injected so tests can control time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// A lot row as the store sees it: internal key plus external identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotRecord {
    pub key: i64,
    pub id: LotId,
    pub name: String,
    pub desired_slots: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub key: i64,
    pub id: SlotId,
    pub ordinal: u32,
    pub available: bool,
    pub under_maintenance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyRecord {
    pub key: i64,
    pub id: OccupancyId,
    pub registration_number: String,
    pub lot_id: LotId,
    pub slot_key: i64,
    pub slot_id: SlotId,
    pub slot_ordinal: u32,
    pub parked_at: DateTime<Utc>,
    pub unparked_at: Option<DateTime<Utc>>,
    pub fee: Option<i64>,
}

impl OccupancyRecord {
    pub fn into_occupancy(self) -> Occupancy {
        Occupancy {
            id: self.id,
            registration_number: self.registration_number,
            lot_id: self.lot_id,
            slot_id: self.slot_id,
            slot_number: self.slot_ordinal,
            parked_at: self.parked_at,
            unparked_at: self.unparked_at,
            fee: self.fee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOccupancy<'a> {
    pub id: OccupancyId,
    pub registration_number: &'a str,
    pub slot_key: i64,
    pub parked_at: DateTime<Utc>,
}

/// Queries available inside any transaction, read or write.
pub trait ReadTx {
    fn lot_by_id(&self, id: &LotId) -> Result<Option<LotRecord>>;

    /// Every slot of the lot ordered by ordinal.
    fn slots_of_lot(&self, lot_key: i64) -> Result<Vec<SlotRecord>>;

    /// Every slot of the lot joined with its open occupancy, ordered by ordinal.
    fn slot_statuses(&self, lot_key: i64) -> Result<Vec<SlotStatus>>;

    /// Occupancies of the lot with `from <= parked_at < to`.
    fn occupancies_parked_between(
        &self,
        lot_key: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OccupancyRecord>>;

    fn open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>>;
}

/// Mutations. Only reachable inside a serializable write transaction, which
/// holds the store's exclusive write lock from its first statement on.
pub trait WriteTx: ReadTx {
    fn lot_name_exists(&self, name: &str) -> Result<bool>;

    fn insert_lot(
        &self,
        id: &LotId,
        name: &str,
        desired_slots: u32,
        created_at: DateTime<Utc>,
    ) -> Result<i64>;

    fn insert_slot(&self, lot_key: i64, id: &SlotId, ordinal: u32) -> Result<SlotRecord>;

    /// The eligible slot with the smallest ordinal, selected under the lock.
    fn lock_lowest_free_slot(&self, lot_key: i64) -> Result<Option<SlotRecord>>;

    fn set_slot_available(&self, slot_key: i64, available: bool) -> Result<()>;

    /// The open occupancy for a registration, selected under the lock.
    fn lock_open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>>;

    fn insert_occupancy(&self, occupancy: &NewOccupancy<'_>) -> Result<i64>;

    fn close_occupancy(&self, key: i64, unparked_at: DateTime<Utc>, fee: i64) -> Result<()>;
}

/// Transactional persistence. `write` commits when `f` returns `Ok` and the
/// token is still live, and rolls back otherwise; no partial writes escape.
pub trait Store: Send + Sync {
    fn write<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&dyn WriteTx) -> Result<T>;

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T>;
}

#[async_trait]
pub trait ParkingService: Send + Sync {
    async fn create_lot(&self, name: &str, desired_slots: u32) -> Result<Lot>;
    async fn park_vehicle(&self, lot_id: LotId, registration_number: &str) -> Result<Occupancy>;
    async fn unpark_vehicle(&self, registration_number: &str) -> Result<Occupancy>;
    async fn lot_status(&self, lot_id: LotId) -> Result<LotStatus>;
    async fn daily_report(&self, lot_id: LotId, date: NaiveDate) -> Result<DailyReport>;
}
