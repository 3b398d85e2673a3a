use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::sqlite::schema;
use crate::config::toml_config::DatabaseConfig;
use crate::domain::model::{LotId, OccupancyId, SlotId, SlotStatus};
use crate::domain::ports::{
    LotRecord, NewOccupancy, OccupancyRecord, ReadTx, SlotRecord, Store, WriteTx,
};
use crate::utils::error::{ConflictReason, NotFoundSubject, ParkingError, Result};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

macro_rules! occupancy_select {
    () => {
        "SELECT o.id, o.external_id, o.registration_number, l.external_id,
                s.id, s.external_id, s.ordinal, o.parked_ms, o.unparked_ms, o.fee
         FROM occupancies o
         JOIN slots s ON s.id = o.slot_id
         JOIN lots l ON l.id = s.lot_id"
    };
}

const SELECT_OPEN_OCCUPANCY: &str = concat!(
    occupancy_select!(),
    " WHERE o.registration_number = ?1 AND o.unparked_ms IS NULL"
);

const SELECT_OCCUPANCIES_PARKED_BETWEEN: &str = concat!(
    occupancy_select!(),
    " WHERE s.lot_id = ?1 AND o.parked_ms >= ?2 AND o.parked_ms < ?3 ORDER BY o.parked_ms, o.id"
);

const SELECT_LOWEST_FREE_SLOT: &str = "
    SELECT id, external_id, ordinal, available, under_maintenance
    FROM slots
    WHERE lot_id = ?1 AND available = 1 AND under_maintenance = 0
    ORDER BY ordinal
    LIMIT 1";

#[derive(Debug)]
enum Backing {
    /// A fresh connection per transaction; SQLite's file locks arbitrate.
    File(PathBuf),
    /// One shared connection; the mutex serializes transactions.
    Memory(Mutex<Connection>),
}

/// SQLite-backed [`Store`].
///
/// Write transactions start with `BEGIN IMMEDIATE`, which takes the database
/// write lock before the first statement runs. Every read inside a write
/// transaction therefore sees state no concurrent writer can change until
/// commit or rollback, which is what makes "select the lowest free slot" and
/// "mark it unavailable" one atomic step. Contending writers wait up to the
/// busy timeout and otherwise fail with a retryable busy error.
#[derive(Debug)]
pub struct SqliteStore {
    backing: Backing,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Opens (creating it and its directory if needed) a file database in
    /// WAL mode.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).map_err(ParkingError::storage("opening database"))?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(ParkingError::storage("enabling WAL mode"))?;
        configure(&conn, busy_timeout)?;
        schema::initialize(&conn)?;

        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened parking database");

        Ok(Self {
            backing: Backing::File(path),
            busy_timeout,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_in_memory_with(busy_timeout: Duration) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(ParkingError::storage("opening database"))?;
        configure(&conn, busy_timeout)?;
        schema::initialize(&conn)?;

        Ok(Self {
            backing: Backing::Memory(Mutex::new(conn)),
            busy_timeout,
        })
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        if config.in_memory {
            Self::open_in_memory_with(busy_timeout)
        } else {
            Self::open(&config.path, busy_timeout)
        }
    }

    /// Administrative toggle for a slot's maintenance flag. Not part of the
    /// park/unpark flows, which only read the flag.
    pub fn set_under_maintenance(&self, slot_id: &SlotId, under_maintenance: bool) -> Result<()> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE slots SET under_maintenance = ?2 WHERE external_id = ?1",
                    params![slot_id.to_string(), under_maintenance],
                )
                .map_err(ParkingError::storage("updating maintenance flag"))?;
            if changed == 0 {
                return Err(ParkingError::not_found(
                    NotFoundSubject::Slot,
                    slot_id.to_string(),
                ));
            }
            Ok(())
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        match &self.backing {
            Backing::File(path) => {
                let mut conn =
                    Connection::open(path).map_err(ParkingError::storage("opening database"))?;
                configure(&conn, self.busy_timeout)?;
                f(&mut conn)
            }
            Backing::Memory(conn) => {
                let mut guard = conn.lock().map_err(|_| ParkingError::Internal {
                    message: "in-memory connection mutex poisoned".to_string(),
                })?;
                f(&mut guard)
            }
        }
    }
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)
        .map_err(ParkingError::storage("setting busy timeout"))?;
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(ParkingError::storage("enabling foreign keys"))?;
    Ok(())
}

impl Store for SqliteStore {
    fn write<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&dyn WriteTx) -> Result<T>,
    {
        if cancel.is_cancelled() {
            return Err(ParkingError::cancelled("write transaction"));
        }

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(ParkingError::storage("beginning write transaction"))?;

            let outcome = f(&SqliteTx { conn: &tx });
            let outcome = match outcome {
                Ok(_) if cancel.is_cancelled() => Err(ParkingError::cancelled("write transaction")),
                other => other,
            };

            match outcome {
                Ok(value) => {
                    tx.commit()
                        .map_err(ParkingError::storage("committing write transaction"))?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback() {
                        tracing::error!("error rolling back the transaction: {}", rollback_err);
                    }
                    Err(err)
                }
            }
        })
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadTx) -> Result<T>,
    {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Deferred)
                .map_err(ParkingError::storage("beginning read transaction"))?;
            let value = f(&SqliteTx { conn: &tx })?;
            tx.commit()
                .map_err(ParkingError::storage("finishing read transaction"))?;
            Ok(value)
        })
    }
}

/// Repository view over an open rusqlite transaction.
struct SqliteTx<'a> {
    conn: &'a Connection,
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
    })
    .transpose()
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<SlotRecord> {
    Ok(SlotRecord {
        key: row.get(0)?,
        id: SlotId::from_uuid(uuid_at(row, 1)?),
        ordinal: row.get(2)?,
        available: row.get(3)?,
        under_maintenance: row.get(4)?,
    })
}

fn occupancy_from_row(row: &Row<'_>) -> rusqlite::Result<OccupancyRecord> {
    Ok(OccupancyRecord {
        key: row.get(0)?,
        id: OccupancyId::from_uuid(uuid_at(row, 1)?),
        registration_number: row.get(2)?,
        lot_id: LotId::from_uuid(uuid_at(row, 3)?),
        slot_key: row.get(4)?,
        slot_id: SlotId::from_uuid(uuid_at(row, 5)?),
        slot_ordinal: row.get(6)?,
        parked_at: timestamp_at(row, 7)?,
        unparked_at: optional_timestamp_at(row, 8)?,
        fee: row.get(9)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == ErrorCode::ConstraintViolation && message.contains(column)
        }
        _ => false,
    }
}

impl ReadTx for SqliteTx<'_> {
    fn lot_by_id(&self, id: &LotId) -> Result<Option<LotRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, desired_slots FROM lots WHERE external_id = ?1",
                [id.to_string()],
                |row| {
                    Ok(LotRecord {
                        key: row.get(0)?,
                        id: *id,
                        name: row.get(1)?,
                        desired_slots: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(ParkingError::storage("looking up parking lot"))
    }

    fn slots_of_lot(&self, lot_key: i64) -> Result<Vec<SlotRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, external_id, ordinal, available, under_maintenance
                 FROM slots WHERE lot_id = ?1 ORDER BY ordinal",
            )
            .map_err(ParkingError::storage("listing slots"))?;
        let slots = stmt
            .query_map([lot_key], slot_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(ParkingError::storage("listing slots"))?;
        Ok(slots)
    }

    fn slot_statuses(&self, lot_key: i64) -> Result<Vec<SlotStatus>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT s.external_id, s.ordinal, s.available, s.under_maintenance,
                        o.registration_number, o.parked_ms
                 FROM slots s
                 LEFT JOIN occupancies o ON o.slot_id = s.id AND o.unparked_ms IS NULL
                 WHERE s.lot_id = ?1
                 ORDER BY s.ordinal",
            )
            .map_err(ParkingError::storage("reading slot status"))?;
        let statuses = stmt
            .query_map([lot_key], |row| {
                Ok(SlotStatus {
                    slot_id: SlotId::from_uuid(uuid_at(row, 0)?),
                    slot_number: row.get(1)?,
                    is_available: row.get(2)?,
                    is_maintenance: row.get(3)?,
                    registration_number: row.get(4)?,
                    parked_at: optional_timestamp_at(row, 5)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(ParkingError::storage("reading slot status"))?;
        Ok(statuses)
    }

    fn occupancies_parked_between(
        &self,
        lot_key: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OccupancyRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(SELECT_OCCUPANCIES_PARKED_BETWEEN)
            .map_err(ParkingError::storage("reading occupancy history"))?;
        let records = stmt
            .query_map(
                params![lot_key, from.timestamp_millis(), to.timestamp_millis()],
                occupancy_from_row,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(ParkingError::storage("reading occupancy history"))?;
        Ok(records)
    }

    fn open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>> {
        self.conn
            .query_row(SELECT_OPEN_OCCUPANCY, [registration_number], occupancy_from_row)
            .optional()
            .map_err(ParkingError::storage("looking up open occupancy"))
    }
}

impl WriteTx for SqliteTx<'_> {
    fn lot_name_exists(&self, name: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM lots WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(ParkingError::storage("checking parking lot existence"))
    }

    fn insert_lot(
        &self,
        id: &LotId,
        name: &str,
        desired_slots: u32,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO lots (external_id, name, desired_slots, created_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
                params![id.to_string(), name, desired_slots, created_at.timestamp_millis()],
                |row| row.get(0),
            )
            .map_err(|e| {
                if is_unique_violation(&e, "lots.name") {
                    ParkingError::conflict(ConflictReason::DuplicateLotName, name)
                } else {
                    ParkingError::storage("creating parking lot")(e)
                }
            })
    }

    fn insert_slot(&self, lot_key: i64, id: &SlotId, ordinal: u32) -> Result<SlotRecord> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO slots (external_id, lot_id, ordinal) VALUES (?1, ?2, ?3) RETURNING id",
            )
            .map_err(ParkingError::storage("preparing slot creation"))?;
        let key: i64 = stmt
            .query_row(params![id.to_string(), lot_key, ordinal], |row| row.get(0))
            .map_err(ParkingError::storage("creating slots"))?;

        Ok(SlotRecord {
            key,
            id: *id,
            ordinal,
            available: true,
            under_maintenance: false,
        })
    }

    fn lock_lowest_free_slot(&self, lot_key: i64) -> Result<Option<SlotRecord>> {
        self.conn
            .query_row(SELECT_LOWEST_FREE_SLOT, [lot_key], slot_from_row)
            .optional()
            .map_err(ParkingError::storage("finding available slot"))
    }

    fn set_slot_available(&self, slot_key: i64, available: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE slots SET available = ?2 WHERE id = ?1",
                params![slot_key, available],
            )
            .map_err(ParkingError::storage("updating slot availability"))?;
        if changed != 1 {
            return Err(ParkingError::Internal {
                message: format!("slot {} disappeared during update", slot_key),
            });
        }
        Ok(())
    }

    fn lock_open_occupancy(&self, registration_number: &str) -> Result<Option<OccupancyRecord>> {
        // The write lock is already held; a plain read is a locked read here.
        self.open_occupancy(registration_number)
    }

    fn insert_occupancy(&self, occupancy: &NewOccupancy<'_>) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO occupancies (external_id, slot_id, registration_number, parked_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
                params![
                    occupancy.id.to_string(),
                    occupancy.slot_key,
                    occupancy.registration_number,
                    occupancy.parked_at.timestamp_millis()
                ],
                |row| row.get(0),
            )
            .map_err(|e| {
                if is_unique_violation(&e, "occupancies.registration_number") {
                    ParkingError::conflict(
                        ConflictReason::AlreadyParked,
                        occupancy.registration_number,
                    )
                } else {
                    ParkingError::storage("creating vehicle record")(e)
                }
            })
    }

    fn close_occupancy(&self, key: i64, unparked_at: DateTime<Utc>, fee: i64) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE occupancies SET unparked_ms = ?2, fee = ?3
                 WHERE id = ?1 AND unparked_ms IS NULL",
                params![key, unparked_at.timestamp_millis(), fee],
            )
            .map_err(ParkingError::storage("closing vehicle record"))?;
        if changed == 0 {
            return Err(ParkingError::conflict(
                ConflictReason::NotParked,
                format!("occupancy {}", key),
            ));
        }
        Ok(())
    }
}
