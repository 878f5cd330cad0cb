use ulid::Ulid;

use crate::model::*;

use super::availability::month_span;
use super::{Engine, EngineError};

impl Engine {
    pub fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub fn list_prices(&self) -> Vec<Price> {
        let mut prices: Vec<Price> = self
            .prices
            .iter()
            .map(|e| Price {
                room_id: e.key().clone(),
                nightly_rate: *e.value(),
            })
            .collect();
        prices.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        prices
    }

    pub fn list_addons(&self) -> Vec<Addon> {
        let mut addons: Vec<Addon> = self.addons.iter().map(|e| e.value().clone()).collect();
        addons.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        addons
    }

    pub fn list_holidays(&self) -> Vec<Holiday> {
        let mut holidays: Vec<Holiday> = self.holidays.iter().map(|e| e.value().clone()).collect();
        holidays.sort_by_key(|h| (h.day, h.id));
        holidays
    }

    pub fn list_clients(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.contact.cmp(&b.contact)));
        clients
    }

    /// All reservations, newest entry date first (the booking table order).
    pub async fn list_reservations(&self) -> Vec<Reservation> {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut reservations = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            reservations.extend(guard.reservations.iter().cloned());
        }
        reservations.sort_by(|a, b| b.stay.entry.cmp(&a.stay.entry).then(a.id.cmp(&b.id)));
        reservations
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let room_id = self.room_for_reservation(&id)?;
        let ledger = self.get_ledger(&room_id)?;
        let guard = ledger.read().await;
        guard.get(id).cloned()
    }

    /// Gross totals across every reservation on record.
    pub async fn business_summary(&self) -> BusinessSummary {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut summary = BusinessSummary {
            reservation_count: 0,
            total_amount: 0,
            total_paid: 0,
            total_due: 0,
        };
        for ledger in ledgers {
            let guard = ledger.read().await;
            for r in &guard.reservations {
                summary.reservation_count += 1;
                summary.total_amount += r.total_amount;
                summary.total_paid += r.amount_paid;
                summary.total_due += r.amount_due;
            }
        }
        summary
    }

    /// Per-room count and income for reservations whose entry date falls in
    /// the month. Rooms without bookings appear with zero rows, matching the
    /// monthly report table.
    pub async fn month_summary(&self, year: i32, month: u32) -> Result<MonthSummary, EngineError> {
        let window = month_span(year, month).ok_or(EngineError::InvalidMonth { year, month })?;

        let mut rows = Vec::new();
        let mut grand_total = 0;
        for room in self.list_rooms() {
            let mut row = RoomMonthRow {
                room_id: room.id.clone(),
                reservation_count: 0,
                income: 0,
            };
            if let Some(ledger) = self.get_ledger(&room.id) {
                let guard = ledger.read().await;
                for r in &guard.reservations {
                    if window.contains_day(r.stay.entry) {
                        row.reservation_count += 1;
                        row.income += r.total_amount;
                    }
                }
            }
            grand_total += row.income;
            rows.push(row);
        }

        Ok(MonthSummary {
            year,
            month,
            rooms: rows,
            grand_total,
        })
    }

    /// Full current state of one collection — what subscribers receive.
    pub async fn snapshot(&self, collection: Collection) -> Snapshot {
        match collection {
            Collection::Rooms => Snapshot::Rooms(self.list_rooms()),
            Collection::Prices => Snapshot::Prices(self.list_prices()),
            Collection::Addons => Snapshot::Addons(self.list_addons()),
            Collection::Holidays => Snapshot::Holidays(self.list_holidays()),
            Collection::Reservations => Snapshot::Reservations(self.list_reservations().await),
            Collection::Clients => Snapshot::Clients(self.list_clients()),
        }
    }
}
