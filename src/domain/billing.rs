use chrono::{DateTime, Utc};

/// Flat rate charged per started hour, in integer currency units.
pub const HOURLY_RATE: i64 = 10;

const MILLIS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bill {
    pub hours: i64,
    pub fee: i64,
}

/// Started hours between two instants. Never less than one; a clock that
/// went backwards counts as zero elapsed.
pub fn billable_hours(parked_at: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let elapsed_ms = (until - parked_at).num_milliseconds().max(0);
    let hours = (elapsed_ms + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR;
    hours.max(1)
}

pub fn bill(parked_at: DateTime<Utc>, unparked_at: DateTime<Utc>) -> Bill {
    let hours = billable_hours(parked_at, unparked_at);
    Bill {
        hours,
        fee: hours * HOURLY_RATE,
    }
}
