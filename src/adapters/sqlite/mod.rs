pub mod schema;
pub mod store;

pub use store::{SqliteStore, DEFAULT_BUSY_TIMEOUT};
