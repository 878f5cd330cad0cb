use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

/// Date-order, required-field and size checks. Returns the normalized stay.
fn validate_draft(draft: &ReservationDraft) -> Result<StayRange, EngineError> {
    if draft.exit <= draft.entry {
        return Err(EngineError::InvalidDateRange {
            entry: draft.entry,
            exit: draft.exit,
        });
    }
    let stay = StayRange::new(draft.entry, draft.exit);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if draft.guest_name.trim().is_empty() {
        return Err(EngineError::MissingField("guest_name"));
    }
    if draft.guest_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if draft.contact.len() > MAX_CONTACT_LEN {
        return Err(EngineError::LimitExceeded("contact too long"));
    }
    if draft.observations.len() > MAX_OBSERVATIONS_LEN {
        return Err(EngineError::LimitExceeded("observations too long"));
    }
    if draft.party_size == 0 {
        return Err(EngineError::InvalidPartySize(draft.party_size));
    }
    if draft.additional_guests.len() > MAX_ADDITIONAL_GUESTS {
        return Err(EngineError::LimitExceeded("too many additional guests"));
    }
    if draft.additional_guests.iter().any(|g| g.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("additional guest name too long"));
    }
    Ok(stay)
}

/// Every other reservation of the room must not overlap the stay.
/// `exclude` is the record being edited, compared against itself otherwise.
fn check_no_overlap(
    ledger: &RoomLedger,
    stay: &StayRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for other in ledger.overlapping(stay) {
        if Some(other.id) == exclude {
            continue;
        }
        return Err(EngineError::RoomUnavailable {
            room_id: ledger.room_id.clone(),
            conflicting: other.id,
        });
    }
    Ok(())
}

impl Engine {
    pub async fn create_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        self.propose(id, draft, None).await
    }

    /// Re-runs the full propose pipeline: the edited record is excluded from
    /// the overlap check and totals are re-priced from the current catalog.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        self.propose(id, draft, Some(id)).await
    }

    /// The core read-check-write transaction. The target room's write lock is
    /// held across overlap check, WAL append and apply, so of N concurrent
    /// proposals for overlapping ranges exactly one commits — the rest fail
    /// their own check against the committed record. Nothing is applied
    /// before the WAL accepts the event: a failed append leaves no partial
    /// write.
    async fn propose(
        &self,
        id: Ulid,
        draft: ReservationDraft,
        exclude: Option<Ulid>,
    ) -> Result<Reservation, EngineError> {
        let stay = validate_draft(&draft)?;
        if !self.rooms.contains_key(&draft.room_id) {
            return Err(EngineError::UnknownRoom(draft.room_id));
        }
        let addons = self.resolve_addons(&draft.addon_ids)?;

        // Catalog snapshot: rate and addon prices freeze here.
        let nightly_rate = self
            .prices
            .get(&draft.room_id)
            .map(|e| *e.value())
            .unwrap_or(0);
        let addon_total: i64 = addons.iter().map(|a| a.price).sum();
        let total_amount = nightly_rate * stay.nights() + addon_total;
        let amount_paid = match draft.payment {
            Payment::Full => total_amount,
            Payment::Deposit(v) if v < 0 => return Err(EngineError::InvalidPayment(v)),
            Payment::Deposit(v) => v,
        };
        let amount_due = total_amount - amount_paid;

        let target = self
            .get_ledger(&draft.room_id)
            .ok_or_else(|| EngineError::UnknownRoom(draft.room_id.clone()))?;

        let prev_room = match exclude {
            Some(prev_id) => Some(
                self.room_for_reservation(&prev_id)
                    .ok_or(EngineError::NotFound(prev_id))?,
            ),
            None => None,
        };

        // When an edit moves the reservation to another room, both rooms are
        // locked in sorted order to prevent deadlocks.
        let (mut target_guard, mut old_guard) = match &prev_room {
            Some(old_room) if *old_room != draft.room_id => {
                let old = self
                    .get_ledger(old_room)
                    .ok_or_else(|| EngineError::UnknownRoom(old_room.clone()))?;
                if *old_room < draft.room_id {
                    let og = old.write_owned().await;
                    let tg = target.write_owned().await;
                    (tg, Some(og))
                } else {
                    let tg = target.write_owned().await;
                    let og = old.write_owned().await;
                    (tg, Some(og))
                }
            }
            _ => (target.write_owned().await, None),
        };

        if target_guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        if let Err(e) = check_no_overlap(&target_guard, &stay, exclude) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let now = now_ms();
        let (created_at, created_by) = match exclude {
            Some(prev_id) => {
                let prev = old_guard
                    .as_deref()
                    .and_then(|g| g.get(prev_id))
                    .or_else(|| target_guard.get(prev_id))
                    .ok_or(EngineError::NotFound(prev_id))?;
                (prev.created_at, prev.created_by.clone())
            }
            None => (now, draft.created_by.clone()),
        };

        let reservation = Reservation {
            id,
            room_id: draft.room_id.clone(),
            guest_name: draft.guest_name,
            contact: draft.contact,
            party_size: draft.party_size,
            stay,
            additional_guests: draft.additional_guests,
            addons,
            observations: draft.observations,
            nightly_rate,
            total_amount,
            amount_paid,
            amount_due,
            created_at,
            created_by,
            updated_at: now,
        };

        let event = if exclude.is_some() {
            Event::ReservationUpdated {
                reservation: reservation.clone(),
            }
        } else {
            Event::ReservationCreated {
                reservation: reservation.clone(),
            }
        };

        self.wal_append(&event).await?;

        if let Some(og) = old_guard.as_mut() {
            og.remove(id);
        }
        target_guard.remove(id); // same-room edit: replace in place
        target_guard.insert(reservation.clone());
        self.reservation_to_room
            .insert(id, reservation.room_id.clone());
        drop(old_guard);
        drop(target_guard);

        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL).increment(1);
        self.link_client(&reservation).await;
        self.publish(Collection::Reservations);
        Ok(reservation)
    }

    /// Idempotent: deleting an unknown id is a no-op — the UI's two-phase
    /// confirm may race another session's delete. The client index keeps the
    /// id (`reservation_ids` is advisory, not a foreign key).
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let Some(room_id) = self.room_for_reservation(&id) else {
            return Ok(());
        };
        let Some(ledger) = self.get_ledger(&room_id) else {
            return Ok(());
        };
        let mut guard = ledger.write().await;
        if guard.get(id).is_none() {
            return Ok(());
        }
        let event = Event::ReservationDeleted {
            id,
            room_id: room_id.clone(),
        };
        self.wal_append(&event).await?;
        guard.remove(id);
        self.reservation_to_room.remove(&id);
        drop(guard);
        self.publish(Collection::Reservations);
        Ok(())
    }

    /// Resolve addon ids against the catalog, freezing name and price.
    fn resolve_addons(&self, ids: &[Ulid]) -> Result<Vec<AddonSnapshot>, EngineError> {
        if ids.len() > MAX_ADDONS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many addons"));
        }
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            let addon = self
                .addons
                .get(id)
                .ok_or(EngineError::UnknownAddon(*id))?;
            snapshots.push(AddonSnapshot {
                addon_id: addon.id,
                name: addon.name.clone(),
                price: addon.price,
            });
        }
        Ok(snapshots)
    }
}
