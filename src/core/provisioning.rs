use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::model::{Lot, LotId, Slot, SlotId};
use crate::domain::ports::{Clock, Store};
use crate::utils::error::{ConflictReason, ParkingError, Result};
use crate::utils::validation::{validate_lot_name, validate_range};

pub const DEFAULT_MAX_SLOTS_PER_LOT: u32 = 10_000;

/// Creates a lot and all of its slots in a single transaction.
pub struct LotProvisioner<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    max_slots_per_lot: u32,
}

impl<S: Store> LotProvisioner<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, max_slots_per_lot: u32) -> Self {
        Self {
            store,
            clock,
            max_slots_per_lot,
        }
    }

    /// Slots are numbered `1..=desired_slots`, all available and out of
    /// maintenance. Zero slots is a valid lot that is always full.
    pub fn create_lot(
        &self,
        cancel: &CancellationToken,
        name: &str,
        desired_slots: u32,
    ) -> Result<Lot> {
        let name = validate_lot_name(name)?;
        validate_range("desired slot count", desired_slots, 0, self.max_slots_per_lot)?;

        let lot = self.store.write(cancel, |tx| {
            if tx.lot_name_exists(&name)? {
                return Err(ParkingError::conflict(
                    ConflictReason::DuplicateLotName,
                    name.as_str(),
                ));
            }

            let id = LotId::new();
            let lot_key = tx.insert_lot(&id, &name, desired_slots, self.clock.now())?;

            let slots = (1..=desired_slots)
                .map(|ordinal| {
                    let slot = tx.insert_slot(lot_key, &SlotId::new(), ordinal)?;
                    Ok(Slot {
                        id: slot.id,
                        slot_number: slot.ordinal,
                        is_available: slot.available,
                        is_maintenance: slot.under_maintenance,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(Lot {
                id,
                name: name.clone(),
                desired_slots,
                slots,
            })
        })?;

        tracing::info!(lot = %lot.id, name = %lot.name, slots = desired_slots, "parking lot created");
        Ok(lot)
    }
}
