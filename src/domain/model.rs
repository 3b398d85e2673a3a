use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::error::{ParkingError, Result};

macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn parse(value: &str) -> Result<Self> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|_| ParkingError::bad_input($field, format!("'{}' is not a valid ID", value)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

external_id!(
    /// Opaque external identity of a parking lot.
    LotId,
    "parking lot ID"
);
external_id!(
    /// Opaque external identity of a slot.
    SlotId,
    "slot ID"
);
external_id!(
    /// Opaque external identity of one park-to-unpark episode.
    OccupancyId,
    "occupancy ID"
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub id: LotId,
    pub name: String,
    pub desired_slots: u32,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub slot_number: u32,
    pub is_available: bool,
    pub is_maintenance: bool,
}

/// A vehicle's stay in a slot. Open while `unparked_at` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupancy {
    pub id: OccupancyId,
    pub registration_number: String,
    pub lot_id: LotId,
    pub slot_id: SlotId,
    pub slot_number: u32,
    pub parked_at: DateTime<Utc>,
    pub unparked_at: Option<DateTime<Utc>>,
    pub fee: Option<i64>,
}

impl Occupancy {
    pub fn is_open(&self) -> bool {
        self.unparked_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotStatus {
    pub parking_lot_id: LotId,
    pub name: String,
    pub slots: Vec<SlotStatus>,
}

impl LotStatus {
    pub fn occupied_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.registration_number.is_some())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub slot_id: SlotId,
    pub slot_number: u32,
    pub is_available: bool,
    pub is_maintenance: bool,
    pub registration_number: Option<String>,
    pub parked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub parking_lot_id: LotId,
    pub date: NaiveDate,
    pub total_vehicles_parked: u64,
    pub total_parking_hours: i64,
    pub total_fee_collected: i64,
}

/// Drops sub-millisecond precision so in-memory timestamps match what the
/// store persists.
pub fn millis_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
