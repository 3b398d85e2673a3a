pub mod allocator;
pub mod engine;
pub mod lifecycle;
pub mod provisioning;
pub mod reporting;

pub use crate::domain::ports::{Clock, ParkingService, Store};
pub use crate::utils::error::Result;
pub use engine::{EngineSettings, ParkingEngine, RetryPolicy};
