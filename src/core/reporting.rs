use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::domain::billing;
use crate::domain::model::{DailyReport, LotId, LotStatus};
use crate::domain::ports::{OccupancyRecord, Store};
use crate::utils::error::{NotFoundSubject, ParkingError, Result};

/// Read-only projections. Each call reads one committed snapshot.
pub struct ReportingView<S: Store> {
    store: Arc<S>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyTotals {
    pub vehicles: u64,
    pub hours: i64,
    pub fees: i64,
}

/// Folds a day's occupancies into totals. Every row counts as a vehicle.
/// Only closed rows add billed hours and their stored fee, so a report over
/// committed data does not change as time passes.
pub fn summarize(records: &[OccupancyRecord]) -> DailyTotals {
    records.iter().fold(DailyTotals::default(), |mut totals, record| {
        totals.vehicles += 1;
        if let Some(unparked_at) = record.unparked_at {
            totals.hours += billing::bill(record.parked_at, unparked_at).hours;
            totals.fees += record.fee.unwrap_or(0);
        }
        totals
    })
}

/// `[date 00:00 UTC, date+1 00:00 UTC)`.
pub fn day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| ParkingError::bad_input("date", format!("{} is out of range", date)))?;
    Ok((
        date.and_time(NaiveTime::MIN).and_utc(),
        next.and_time(NaiveTime::MIN).and_utc(),
    ))
}

impl<S: Store> ReportingView<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn lot_status(&self, lot_id: &LotId) -> Result<LotStatus> {
        self.store.read(|tx| {
            let lot = tx
                .lot_by_id(lot_id)?
                .ok_or_else(|| ParkingError::not_found(NotFoundSubject::Lot, lot_id.to_string()))?;
            let slots = tx.slot_statuses(lot.key)?;
            Ok(LotStatus {
                parking_lot_id: lot.id,
                name: lot.name,
                slots,
            })
        })
    }

    pub fn daily_report(&self, lot_id: &LotId, date: NaiveDate) -> Result<DailyReport> {
        let (from, to) = day_bounds(date)?;

        let totals = self.store.read(|tx| {
            let lot = tx
                .lot_by_id(lot_id)?
                .ok_or_else(|| ParkingError::not_found(NotFoundSubject::Lot, lot_id.to_string()))?;
            let records = tx.occupancies_parked_between(lot.key, from, to)?;
            if records.is_empty() {
                return Err(ParkingError::not_found(
                    NotFoundSubject::DailyActivity,
                    format!("{} on {}", lot.name, date),
                ));
            }
            Ok(summarize(&records))
        })?;

        tracing::debug!(lot = %lot_id, %date, vehicles = totals.vehicles, "daily report built");

        Ok(DailyReport {
            parking_lot_id: *lot_id,
            date,
            total_vehicles_parked: totals.vehicles,
            total_parking_hours: totals.hours,
            total_fee_collected: totals.fees,
        })
    }
}
