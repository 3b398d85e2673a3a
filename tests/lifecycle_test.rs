mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Duration, Utc};
use parkwise::adapters::SqliteStore;
use parkwise::core::lifecycle::OccupancyLifecycle;
use parkwise::domain::model::{LotId, SlotId, SlotStatus};
use parkwise::domain::ports::{
    Clock, LotRecord, NewOccupancy, OccupancyRecord, ReadTx, SlotRecord, Store, WriteTx,
};
use parkwise::utils::error::{ConflictReason, ErrorKind, ParkingError, Result};
use parkwise::{EngineSettings, ManualClock, ParkingEngine, ParkingService};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_park_then_unpark_round_trip() {
    let h = common::memory_harness();
    let lot = h.lot("Round", 2).await;

    let parked = h.engine.park_vehicle(lot, "MH-12-AB-1234").await.unwrap();
    assert_eq!(parked.slot_number, 1);
    assert_eq!(parked.parked_at, common::start_time());
    assert!(parked.is_open());

    h.clock.advance(Duration::minutes(45));
    let closed = h.engine.unpark_vehicle("MH-12-AB-1234").await.unwrap();
    assert_eq!(closed.id, parked.id);
    assert_eq!(closed.slot_id, parked.slot_id);
    assert_eq!(closed.unparked_at, Some(common::start_time() + Duration::minutes(45)));
    assert_eq!(closed.fee, Some(10));

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(status.slots.iter().all(|s| s.is_available));
    assert_eq!(status.occupied_count(), 0);
}

#[tokio::test]
async fn test_fee_rounds_started_hours_up() {
    let h = common::memory_harness();
    let lot = h.lot("Fees", 1).await;

    h.engine.park_vehicle(lot, "ZERO").await.unwrap();
    let closed = h.engine.unpark_vehicle("ZERO").await.unwrap();
    assert_eq!(closed.fee, Some(10), "zero duration bills one hour");

    h.engine.park_vehicle(lot, "OVER").await.unwrap();
    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    let closed = h.engine.unpark_vehicle("OVER").await.unwrap();
    assert_eq!(closed.fee, Some(20), "one hour and a second bills two hours");

    h.engine.park_vehicle(lot, "EXACT").await.unwrap();
    h.clock.advance(Duration::hours(3));
    let closed = h.engine.unpark_vehicle("EXACT").await.unwrap();
    assert_eq!(closed.fee, Some(30));
}

#[tokio::test]
async fn test_clock_running_backwards_bills_one_hour() {
    let h = common::memory_harness();
    let lot = h.lot("Skew", 1).await;

    h.engine.park_vehicle(lot, "SKEW-1").await.unwrap();
    h.clock.set(common::start_time() - Duration::minutes(5));
    let closed = h.engine.unpark_vehicle("SKEW-1").await.unwrap();
    assert_eq!(closed.fee, Some(10));
}

#[tokio::test]
async fn test_double_park_is_rejected_even_across_lots() {
    let h = common::memory_harness();
    let first = h.lot("First", 2).await;
    let second = h.lot("Second", 2).await;

    h.engine.park_vehicle(first, "DUP-1").await.unwrap();

    let err = h.engine.park_vehicle(first, "DUP-1").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::AlreadyParked));

    let err = h.engine.park_vehicle(second, " DUP-1 ").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::AlreadyParked));

    let status = h.engine.lot_status(second).await.unwrap();
    assert_eq!(status.occupied_count(), 0);
}

#[tokio::test]
async fn test_full_lot_conflict_changes_nothing() {
    let h = common::memory_harness();
    let lot = h.lot("Tiny", 2).await;
    h.engine.park_vehicle(lot, "A").await.unwrap();
    h.engine.park_vehicle(lot, "B").await.unwrap();
    let before = h.engine.lot_status(lot).await.unwrap();

    let err = h.engine.park_vehicle(lot, "C").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.conflict_reason(), Some(ConflictReason::LotFull));
    assert!(!err.is_retryable());

    let after = h.engine.lot_status(lot).await.unwrap();
    assert_eq!(before, after);

    let err = h.engine.unpark_vehicle("C").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NotParked));
}

#[tokio::test]
async fn test_unknown_lot_is_not_found() {
    let h = common::memory_harness();
    let err = h.engine.park_vehicle(LotId::new(), "LOST").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_registration_can_park_again_after_unpark() {
    let h = common::memory_harness();
    let lot = h.lot("Cycle", 3).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let parked = h.engine.park_vehicle(lot, "CYCLE").await.unwrap();
        h.clock.advance(Duration::minutes(10));
        h.engine.unpark_vehicle("CYCLE").await.unwrap();
        ids.push(parked.id);
    }

    ids.sort_by_key(|id| id.to_string());
    ids.dedup();
    assert_eq!(ids.len(), 3, "each park opens a new occupancy");
}

#[tokio::test]
async fn test_maintenance_slot_is_skipped_and_keeps_its_flag() {
    let h = common::memory_harness();
    let lot = h.lot("Service", 3).await;
    let slots = h.engine.lot_status(lot).await.unwrap().slots;

    h.store.set_under_maintenance(&slots[0].slot_id, true).unwrap();
    let parked = h.engine.park_vehicle(lot, "MAINT-1").await.unwrap();
    assert_eq!(parked.slot_number, 2);

    // An occupied slot put under maintenance stays flagged after unpark.
    h.store.set_under_maintenance(&slots[1].slot_id, true).unwrap();
    h.engine.unpark_vehicle("MAINT-1").await.unwrap();

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(status.slots[1].is_available);
    assert!(status.slots[1].is_maintenance);

    let parked = h.engine.park_vehicle(lot, "MAINT-2").await.unwrap();
    assert_eq!(parked.slot_number, 3);
}

#[tokio::test]
async fn test_cancelled_park_leaves_store_untouched() {
    let h = common::memory_harness();
    let lot = h.lot("Cancel", 2).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .engine
        .park_vehicle_with(&cancel, lot, "CANCELLED")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let status = h.engine.lot_status(lot).await.unwrap();
    assert_eq!(status.occupied_count(), 0);
    assert!(status.slots.iter().all(|s| s.is_available));

    let err = h.engine.unpark_vehicle("CANCELLED").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NotParked));
}

/// Delegates to a real store but fails every occupancy insert, i.e. after the
/// slot has been selected and flipped.
struct FailingInsertStore {
    inner: SqliteStore,
}

struct FailAfterSlotLock<'a> {
    inner: &'a dyn WriteTx,
}

impl ReadTx for FailAfterSlotLock<'_> {
    fn lot_by_id(&self, id: &LotId) -> Result<Option<LotRecord>> {
        self.inner.lot_by_id(id)
    }

    fn slots_of_lot(&self, lot_key: i64) -> Result<Vec<SlotRecord>> {
        self.inner.slots_of_lot(lot_key)
    }

    fn slot_statuses(&self, lot_key: i64) -> Result<Vec<SlotStatus>> {
        self.inner.slot_statuses(lot_key)
    }

    fn occupancies_parked_between(
        &self,
        lot_key: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OccupancyRecord>> {
        self.inner.occupancies_parked_between(lot_key, from, to)
    }

    fn open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>> {
        self.inner.open_occupancy(registration_number)
    }
}

impl WriteTx for FailAfterSlotLock<'_> {
    fn lot_name_exists(&self, name: &str) -> Result<bool> {
        self.inner.lot_name_exists(name)
    }

    fn insert_lot(
        &self,
        id: &LotId,
        name: &str,
        desired_slots: u32,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.inner.insert_lot(id, name, desired_slots, created_at)
    }

    fn insert_slot(&self, lot_key: i64, id: &SlotId, ordinal: u32) -> Result<SlotRecord> {
        self.inner.insert_slot(lot_key, id, ordinal)
    }

    fn lock_lowest_free_slot(&self, lot_key: i64) -> Result<Option<SlotRecord>> {
        self.inner.lock_lowest_free_slot(lot_key)
    }

    fn set_slot_available(&self, slot_key: i64, available: bool) -> Result<()> {
        self.inner.set_slot_available(slot_key, available)
    }

    fn lock_open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>> {
        self.inner.lock_open_occupancy(registration_number)
    }

    fn insert_occupancy(&self, _occupancy: &NewOccupancy<'_>) -> Result<i64> {
        Err(ParkingError::Internal {
            message: "injected failure".to_string(),
        })
    }

    fn close_occupancy(&self, key: i64, unparked_at: DateTime<Utc>, fee: i64) -> Result<()> {
        self.inner.close_occupancy(key, unparked_at, fee)
    }
}

impl Store for FailingInsertStore {
    fn write<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&dyn WriteTx) -> Result<T>,
    {
        self.inner
            .write(cancel, |tx| f(&FailAfterSlotLock { inner: tx }))
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T>,
    {
        self.inner.read(f)
    }
}

#[tokio::test]
async fn test_failure_after_slot_lock_rolls_everything_back() {
    let h = common::file_harness();
    let lot = h.lot("Injected", 1).await;

    // A second handle on the same database file, with the failing wrapper.
    let failing = Arc::new(FailingInsertStore {
        inner: h.reopen_store(),
    });
    let lifecycle = OccupancyLifecycle::new(
        failing,
        Arc::new(ManualClock::new(common::start_time())),
    );

    let err = lifecycle
        .park(&CancellationToken::new(), &lot, "INJECT")
        .unwrap_err();
    assert!(matches!(err, ParkingError::Internal { .. }));

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(status.slots[0].is_available, "slot flip was rolled back");
    assert_eq!(status.occupied_count(), 0);

    let err = h.engine.unpark_vehicle("INJECT").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NotParked));

    // The real path still works afterwards.
    h.engine.park_vehicle(lot, "INJECT").await.unwrap();
}

/// Cancels the operation's token the moment the transaction asks for the
/// time, i.e. after the slot has been flipped but before commit.
struct CancellingClock {
    token: CancellationToken,
}

impl Clock for CancellingClock {
    fn now(&self) -> DateTime<Utc> {
        self.token.cancel();
        common::start_time()
    }
}

#[tokio::test]
async fn test_park_cancelled_inside_transaction_rolls_back() {
    let h = common::file_harness();
    let lot = h.lot("MidPark", 2).await;

    let cancel = CancellationToken::new();
    let lifecycle = OccupancyLifecycle::new(
        Arc::clone(&h.store),
        Arc::new(CancellingClock {
            token: cancel.clone(),
        }),
    );

    let err = lifecycle.park(&cancel, &lot, "MID-PARK").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(status.slots.iter().all(|s| s.is_available));
    assert_eq!(status.occupied_count(), 0);

    let err = h.engine.unpark_vehicle("MID-PARK").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NotParked));
}

#[tokio::test]
async fn test_unpark_cancelled_inside_transaction_keeps_vehicle_parked() {
    let h = common::file_harness();
    let lot = h.lot("MidUnpark", 1).await;
    h.engine.park_vehicle(lot, "MID-UNPARK").await.unwrap();

    let cancel = CancellationToken::new();
    let lifecycle = OccupancyLifecycle::new(
        Arc::clone(&h.store),
        Arc::new(CancellingClock {
            token: cancel.clone(),
        }),
    );

    let err = lifecycle.unpark(&cancel, "MID-UNPARK").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(!status.slots[0].is_available);
    assert_eq!(status.slots[0].registration_number.as_deref(), Some("MID-UNPARK"));
    common::Harness::assert_consistent(&status);

    h.clock.advance(Duration::minutes(20));
    let closed = h.engine.unpark_vehicle("MID-UNPARK").await.unwrap();
    assert_eq!(closed.fee, Some(10));
}

/// Reports how each write transaction ended.
struct ObservedStore {
    inner: SqliteStore,
    outcomes: Mutex<mpsc::Sender<Option<ErrorKind>>>,
}

impl Store for ObservedStore {
    fn write<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&dyn WriteTx) -> Result<T>,
    {
        let result = self.inner.write(cancel, f);
        let kind = result.as_ref().err().map(|e| e.kind());
        self.outcomes.lock().unwrap().send(kind).unwrap();
        result
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T>,
    {
        self.inner.read(f)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_park_future_rolls_back_after_lock_wait() {
    let h = common::file_harness();
    let lot = h.lot("Abandoned", 1).await;

    let (outcome_tx, outcome_rx) = mpsc::channel();
    let observed = Arc::new(ObservedStore {
        inner: h.reopen_store(),
        outcomes: Mutex::new(outcome_tx),
    });
    let engine = ParkingEngine::new(observed, h.clock.clone(), EngineSettings::default());

    // Another connection holds the write lock until released.
    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = h.reopen_store();
    let blocker = thread::spawn(move || {
        holder.write(&CancellationToken::new(), |_tx| {
            ready_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(())
        })
    });
    ready_rx.recv().unwrap();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        engine.park_vehicle(lot, "DROPPED"),
    )
    .await;
    assert!(abandoned.is_err(), "park should still be waiting on the lock");

    release_tx.send(()).unwrap();
    blocker.join().unwrap().unwrap();

    // The orphaned attempt gets the lock, runs, and must not commit.
    let outcome = outcome_rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .unwrap();
    assert_eq!(outcome, Some(ErrorKind::Cancelled));

    let status = h.engine.lot_status(lot).await.unwrap();
    assert!(status.slots[0].is_available);
    assert_eq!(status.occupied_count(), 0);

    let err = h.engine.unpark_vehicle("DROPPED").await.unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NotParked));
}
