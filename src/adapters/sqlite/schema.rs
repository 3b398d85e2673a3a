//! SQLite schema for the parking store.
//!
//! ```text
//!  lots                 slots                      occupancies
//!  ┌──────────────┐     ┌────────────────────┐     ┌──────────────────────┐
//!  │ id (PK)      │◄────│ lot_id (FK)        │     │ id (PK)              │
//!  │ external_id  │     │ id (PK)            │◄────│ slot_id (FK)         │
//!  │ name UNIQUE  │     │ external_id        │     │ external_id          │
//!  │ desired_slots│     │ ordinal            │     │ registration_number  │
//!  │ created_ms   │     │ available          │     │ parked_ms            │
//!  └──────────────┘     │ under_maintenance  │     │ unparked_ms NULL     │
//!                       └────────────────────┘     │ fee NULL             │
//!                                                  └──────────────────────┘
//! ```
//!
//! Application guards are backed by constraints: one open occupancy per
//! registration and per slot (partial unique indexes), unique ordinal per lot,
//! unique lot name.

use rusqlite::{Connection, OptionalExtension};

use crate::utils::error::{ParkingError, Result};

const SCHEMA_VERSION: i32 = 1;

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS parking_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

const CREATE_LOTS: &str = r#"
CREATE TABLE IF NOT EXISTS lots (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id   TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL UNIQUE,
    desired_slots INTEGER NOT NULL CHECK (desired_slots >= 0),
    created_ms    INTEGER NOT NULL
)
"#;

/// `available` and `under_maintenance` are 0/1 integers. Ordinals start at 1
/// and are never reused within a lot.
const CREATE_SLOTS: &str = r#"
CREATE TABLE IF NOT EXISTS slots (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id       TEXT NOT NULL UNIQUE,
    lot_id            INTEGER NOT NULL REFERENCES lots(id),
    ordinal           INTEGER NOT NULL CHECK (ordinal >= 1),
    available         INTEGER NOT NULL DEFAULT 1,
    under_maintenance INTEGER NOT NULL DEFAULT 0,
    UNIQUE (lot_id, ordinal)
)
"#;

/// An occupancy is open while `unparked_ms` is NULL. `fee` is written in the
/// same update that closes it.
const CREATE_OCCUPANCIES: &str = r#"
CREATE TABLE IF NOT EXISTS occupancies (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id         TEXT NOT NULL UNIQUE,
    slot_id             INTEGER NOT NULL REFERENCES slots(id),
    registration_number TEXT NOT NULL,
    parked_ms           INTEGER NOT NULL,
    unparked_ms         INTEGER,
    fee                 INTEGER,
    CHECK ((unparked_ms IS NULL) = (fee IS NULL))
)
"#;

const CREATE_OPEN_REGISTRATION_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS occupancies_open_registration
ON occupancies(registration_number) WHERE unparked_ms IS NULL
"#;

const CREATE_OPEN_SLOT_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS occupancies_open_slot
ON occupancies(slot_id) WHERE unparked_ms IS NULL
"#;

/// Supports the daily report's range scan.
const CREATE_PARKED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS occupancies_slot_parked
ON occupancies(slot_id, parked_ms)
"#;

/// Creates all tables and indexes if missing, then checks the schema version.
pub fn initialize(conn: &Connection) -> Result<()> {
    let statements = [
        CREATE_METADATA,
        CREATE_LOTS,
        CREATE_SLOTS,
        CREATE_OCCUPANCIES,
        CREATE_OPEN_REGISTRATION_INDEX,
        CREATE_OPEN_SLOT_INDEX,
        CREATE_PARKED_INDEX,
    ];
    for statement in statements {
        conn.execute_batch(statement)
            .map_err(ParkingError::storage("creating schema"))?;
    }

    verify_or_set_version(conn)
}

fn verify_or_set_version(conn: &Connection) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM parking_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(ParkingError::storage("reading schema version"))?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO parking_metadata (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )
            .map_err(ParkingError::storage("writing schema version"))?;
        }
        Some(v) if v == SCHEMA_VERSION.to_string() => {}
        Some(v) => {
            return Err(ParkingError::ConfigError {
                message: format!(
                    "schema version mismatch: database has version {}, expected {}",
                    v, SCHEMA_VERSION
                ),
            });
        }
    }

    Ok(())
}
