use crate::domain::model::{LotId, SlotId};
use crate::domain::ports::WriteTx;
use crate::utils::error::{ConflictReason, NotFoundSubject, ParkingError, Result};

/// A slot claimed inside an open write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slot_key: i64,
    pub slot_id: SlotId,
    pub slot_number: u32,
}

/// Picks the free, non-maintenance slot with the smallest ordinal.
///
/// Runs inside the caller's transaction and never commits or rolls back.
/// The selection is made under the transaction's write lock, so the slot
/// cannot be handed to anyone else before the caller commits. Marking it
/// unavailable is left to the caller.
pub fn allocate_slot(tx: &dyn WriteTx, lot_id: &LotId) -> Result<Allocation> {
    let lot = tx
        .lot_by_id(lot_id)?
        .ok_or_else(|| ParkingError::not_found(NotFoundSubject::Lot, lot_id.to_string()))?;

    let slot = tx
        .lock_lowest_free_slot(lot.key)?
        .ok_or_else(|| ParkingError::conflict(ConflictReason::LotFull, lot.name.clone()))?;

    tracing::debug!(lot = %lot.name, slot_number = slot.ordinal, "selected slot");

    Ok(Allocation {
        slot_key: slot.key,
        slot_id: slot.id,
        slot_number: slot.ordinal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::SqliteStore;
    use crate::domain::ports::Store;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    fn store_with_lot(slots: u32) -> (SqliteStore, LotId, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = LotId::new();
        let key = store
            .write(&CancellationToken::new(), |tx| {
                let key = tx.insert_lot(&id, "alloc", slots, Utc::now())?;
                for ordinal in 1..=slots {
                    tx.insert_slot(key, &SlotId::new(), ordinal)?;
                }
                Ok(key)
            })
            .unwrap();
        (store, id, key)
    }

    fn claim(store: &SqliteStore, lot_id: &LotId) -> Result<Allocation> {
        store.write(&CancellationToken::new(), |tx| {
            let allocation = allocate_slot(tx, lot_id)?;
            tx.set_slot_available(allocation.slot_key, false)?;
            Ok(allocation)
        })
    }

    #[test]
    fn test_allocations_follow_ordinal_order() {
        let (store, lot_id, _) = store_with_lot(5);
        let numbers: Vec<u32> = (0..5)
            .map(|_| claim(&store, &lot_id).unwrap().slot_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_full_lot_is_a_conflict() {
        let (store, lot_id, _) = store_with_lot(1);
        claim(&store, &lot_id).unwrap();

        let err = claim(&store, &lot_id).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::LotFull));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_zero_slot_lot_is_always_full() {
        let (store, lot_id, _) = store_with_lot(0);
        let err = claim(&store, &lot_id).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::LotFull));
    }

    #[test]
    fn test_unknown_lot_is_not_found() {
        let (store, _, _) = store_with_lot(2);
        let err = claim(&store, &LotId::new()).unwrap_err();
        assert_eq!(err.not_found_subject(), Some(NotFoundSubject::Lot));
    }

    #[test]
    fn test_maintenance_slots_are_skipped() {
        let (store, lot_id, key) = store_with_lot(3);
        let slots = store.read(|tx| tx.slots_of_lot(key)).unwrap();
        store.set_under_maintenance(&slots[0].id, true).unwrap();

        assert_eq!(claim(&store, &lot_id).unwrap().slot_number, 2);
    }
}
