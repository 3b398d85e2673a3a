// Adapters layer: concrete implementations of the domain ports.

pub mod clock;
pub mod sqlite;

pub use clock::{ManualClock, SystemClock};
pub use sqlite::SqliteStore;
