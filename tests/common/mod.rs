#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parkwise::domain::model::{LotId, LotStatus};
use parkwise::{
    EngineSettings, ManualClock, ParkingEngine, ParkingService, RetryPolicy, SqliteStore,
};
use tempfile::TempDir;

pub struct Harness {
    pub engine: ParkingEngine<SqliteStore>,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    db_path: Option<PathBuf>,
    // Keeps the database directory alive for file-backed harnesses.
    _dir: Option<TempDir>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 15, 8, 0, 0).unwrap()
}

fn settings() -> EngineSettings {
    EngineSettings {
        retry: RetryPolicy {
            max_retries: 10,
            backoff: Duration::from_millis(5),
        },
        max_slots_per_lot: 1_000,
    }
}

fn build(store: SqliteStore, dir: Option<TempDir>, db_path: Option<PathBuf>) -> Harness {
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(start_time()));
    Harness {
        engine: ParkingEngine::new(Arc::clone(&store), clock.clone(), settings()),
        store,
        clock,
        db_path,
        _dir: dir,
    }
}

pub fn memory_harness() -> Harness {
    build(SqliteStore::open_in_memory().unwrap(), None, None)
}

/// A WAL-mode file database, so concurrent operations use separate
/// connections and contend on the real SQLite write lock.
pub fn file_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parking.db");
    let store = SqliteStore::open(&path, Duration::from_secs(10)).unwrap();
    build(store, Some(dir), Some(path))
}

impl Harness {
    /// Another store handle on the same file. File-backed harnesses only.
    pub fn reopen_store(&self) -> SqliteStore {
        let path = self.db_path.as_ref().expect("file-backed harness");
        SqliteStore::open(path, Duration::from_secs(10)).unwrap()
    }

    pub async fn lot(&self, name: &str, slots: u32) -> LotId {
        self.engine.create_lot(name, slots).await.unwrap().id
    }

    /// A slot is unavailable exactly when it has an open occupancy.
    pub fn assert_consistent(status: &LotStatus) {
        for slot in &status.slots {
            assert_eq!(
                !slot.is_available,
                slot.registration_number.is_some(),
                "slot {} availability disagrees with its occupancy",
                slot.slot_number
            );
        }
    }
}
