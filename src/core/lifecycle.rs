use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::allocator::allocate_slot;
use crate::domain::billing;
use crate::domain::model::{LotId, Occupancy, OccupancyId};
use crate::domain::ports::{Clock, NewOccupancy, Store};
use crate::utils::error::{ConflictReason, ParkingError, Result};
use crate::utils::validation::validate_registration;

/// Park and unpark, each as one all-or-nothing write transaction.
///
/// A registration cycles `none -> open -> closed -> open ...`; the slot it
/// holds is unavailable exactly while its occupancy is open.
pub struct OccupancyLifecycle<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> OccupancyLifecycle<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn park(
        &self,
        cancel: &CancellationToken,
        lot_id: &LotId,
        registration_number: &str,
    ) -> Result<Occupancy> {
        let registration = validate_registration(registration_number)?;

        let occupancy = self.store.write(cancel, |tx| {
            if tx.open_occupancy(&registration)?.is_some() {
                return Err(ParkingError::conflict(
                    ConflictReason::AlreadyParked,
                    registration.as_str(),
                ));
            }

            let allocation = allocate_slot(tx, lot_id)?;
            tx.set_slot_available(allocation.slot_key, false)?;

            let id = OccupancyId::new();
            let parked_at = self.clock.now();
            tx.insert_occupancy(&NewOccupancy {
                id,
                registration_number: &registration,
                slot_key: allocation.slot_key,
                parked_at,
            })?;

            Ok(Occupancy {
                id,
                registration_number: registration.clone(),
                lot_id: *lot_id,
                slot_id: allocation.slot_id,
                slot_number: allocation.slot_number,
                parked_at,
                unparked_at: None,
                fee: None,
            })
        })?;

        tracing::info!(
            registration = %occupancy.registration_number,
            lot = %occupancy.lot_id,
            slot_number = occupancy.slot_number,
            "vehicle parked"
        );
        Ok(occupancy)
    }

    pub fn unpark(&self, cancel: &CancellationToken, registration_number: &str) -> Result<Occupancy> {
        let registration = validate_registration(registration_number)?;

        let occupancy = self.store.write(cancel, |tx| {
            let open = tx.lock_open_occupancy(&registration)?.ok_or_else(|| {
                ParkingError::conflict(ConflictReason::NotParked, registration.as_str())
            })?;

            let unparked_at = self.clock.now();
            let bill = billing::bill(open.parked_at, unparked_at);

            tx.close_occupancy(open.key, unparked_at, bill.fee)?;
            tx.set_slot_available(open.slot_key, true)?;

            let mut occupancy = open.into_occupancy();
            occupancy.unparked_at = Some(unparked_at);
            occupancy.fee = Some(bill.fee);
            Ok(occupancy)
        })?;

        tracing::info!(
            registration = %occupancy.registration_number,
            slot_number = occupancy.slot_number,
            fee = occupancy.fee.unwrap_or_default(),
            "vehicle unparked"
        );
        Ok(occupancy)
    }
}
