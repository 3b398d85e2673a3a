pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::AppConfig;

pub use adapters::{ManualClock, SqliteStore, SystemClock};
pub use core::{EngineSettings, ParkingEngine, ParkingService, RetryPolicy};
pub use domain::model::{DailyReport, Lot, LotId, LotStatus, Occupancy, Slot, SlotId, SlotStatus};
pub use utils::error::{ErrorKind, ParkingError, Result};
