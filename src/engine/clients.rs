use ulid::Ulid;

use crate::model::*;

use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Upsert the client index for a committed reservation.
    ///
    /// A failure here never rolls the reservation back — the ledger already
    /// committed. It is logged and the contact queued for background repair,
    /// which re-derives the links from the reservation set.
    pub(super) async fn link_client(&self, reservation: &Reservation) {
        if reservation.contact.is_empty() {
            // Reservations without a contact are not indexed.
            return;
        }
        let event = Event::ClientLinked {
            id: Ulid::new(),
            guest_name: reservation.guest_name.clone(),
            contact: reservation.contact.clone(),
            reservation_id: reservation.id,
            at: now_ms(),
        };
        match self.wal_append(&event).await {
            Ok(()) => {
                self.apply_replayed(&event);
                self.publish(Collection::Clients);
            }
            Err(e) => {
                metrics::counter!(crate::observability::CLIENT_LINK_FAILURES_TOTAL).increment(1);
                tracing::error!(
                    contact = %reservation.contact,
                    reservation = %reservation.id,
                    "client index write failed after reservation commit, queued for repair: {e}"
                );
                self.dirty_contacts.insert(reservation.contact.clone(), ());
            }
        }
    }

    /// Set-like membership: a reservation id is appended at most once no
    /// matter how often the same edit is replayed. The dashmap entry makes
    /// concurrent upserts of one contact yield a single client record.
    pub(super) fn apply_client_link(
        &self,
        id: Ulid,
        guest_name: &str,
        contact: &str,
        reservation_id: Ulid,
        at: Ms,
    ) {
        let mut entry = self
            .clients
            .entry(contact.to_string())
            .or_insert_with(|| Client {
                id,
                guest_name: guest_name.to_string(),
                contact: contact.to_string(),
                reservation_ids: Vec::new(),
                created_at: at,
            });
        if !entry.reservation_ids.contains(&reservation_id) {
            entry.reservation_ids.push(reservation_id);
        }
    }

    /// Re-derive one contact's links from the authoritative reservation set
    /// instead of trusting cached index state. Missing links are WAL-backed
    /// so they survive restart.
    pub(super) async fn rebuild_links_for_contact(
        &self,
        contact: &str,
    ) -> Result<(), EngineError> {
        let mut found: Vec<(Ulid, String)> = Vec::new();
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        for ledger in ledgers {
            let guard = ledger.read().await;
            for reservation in &guard.reservations {
                if reservation.contact == contact {
                    found.push((reservation.id, reservation.guest_name.clone()));
                }
            }
        }

        for (reservation_id, guest_name) in found {
            let already_linked = self
                .clients
                .get(contact)
                .is_some_and(|c| c.reservation_ids.contains(&reservation_id));
            if already_linked {
                continue;
            }
            let event = Event::ClientLinked {
                id: Ulid::new(),
                guest_name,
                contact: contact.to_string(),
                reservation_id,
                at: now_ms(),
            };
            self.wal_append(&event).await?;
            self.apply_replayed(&event);
        }
        Ok(())
    }

    /// Drain the repair queue. Returns the number of contacts repaired;
    /// failures stay queued for the next maintenance pass.
    pub async fn repair_client_index(&self) -> usize {
        let contacts: Vec<String> = self.dirty_contacts.iter().map(|e| e.key().clone()).collect();
        let mut repaired = 0;
        for contact in contacts {
            match self.rebuild_links_for_contact(&contact).await {
                Ok(()) => {
                    self.dirty_contacts.remove(&contact);
                    repaired += 1;
                }
                Err(e) => {
                    tracing::warn!(contact = %contact, "client index repair failed, will retry: {e}");
                }
            }
        }
        if repaired > 0 {
            self.publish(Collection::Clients);
        }
        metrics::gauge!(crate::observability::CLIENT_REPAIRS_PENDING)
            .set(self.dirty_contacts.len() as f64);
        repaired
    }
}
