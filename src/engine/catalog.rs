use ulid::Ulid;

use crate::limits::MAX_NAME_LEN;
use crate::model::*;

use super::{Engine, EngineError};

/// Seed set created when the room catalog is empty. Ids are stable, so the
/// migration can run any number of times without duplicating rooms.
const DEFAULT_ROOMS: [&str; 4] = ["KAWSAY", "INFINITY", "DIAMANTE", "JARDIN"];

const DEFAULT_RATES: [(&str, i64); 4] = [
    ("KAWSAY", 500_000),
    ("INFINITY", 500_000),
    ("DIAMANTE", 350_000),
    ("JARDIN", 450_000),
];

impl Engine {
    /// Idempotent startup migration: seed rooms, then seed prices. Invoked
    /// once by the binary after WAL replay — never on an observation tick.
    pub async fn bootstrap(&self) -> Result<(), EngineError> {
        self.ensure_default_rooms().await?;
        self.ensure_default_prices().await?;
        Ok(())
    }

    /// Insert the fixed seed set only if the room catalog is empty.
    pub async fn ensure_default_rooms(&self) -> Result<(), EngineError> {
        if !self.rooms.is_empty() {
            return Ok(());
        }
        for id in DEFAULT_ROOMS {
            if self.rooms.contains_key(id) {
                continue;
            }
            let event = Event::RoomCreated {
                id: id.to_string(),
                name: id.to_string(),
            };
            self.wal_append(&event).await?;
            self.apply_replayed(&event);
        }
        tracing::info!("seeded {} default rooms", DEFAULT_ROOMS.len());
        self.publish(Collection::Rooms);
        Ok(())
    }

    /// Seed default rates once rooms exist and no price is configured yet.
    pub async fn ensure_default_prices(&self) -> Result<(), EngineError> {
        if self.rooms.is_empty() || !self.prices.is_empty() {
            return Ok(());
        }
        for (room_id, nightly_rate) in DEFAULT_RATES {
            if self.prices.contains_key(room_id) || !self.rooms.contains_key(room_id) {
                continue;
            }
            let event = Event::PriceSet {
                room_id: room_id.to_string(),
                nightly_rate,
            };
            self.wal_append(&event).await?;
            self.apply_replayed(&event);
        }
        tracing::info!("seeded default nightly rates");
        self.publish(Collection::Prices);
        Ok(())
    }

    /// Overwrite a room's nightly rate. No history is kept — last write wins.
    /// Existing reservations are untouched (rate snapshots).
    pub async fn set_price(&self, room_id: RoomId, nightly_rate: i64) -> Result<(), EngineError> {
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::UnknownRoom(room_id));
        }
        if nightly_rate < 0 {
            return Err(EngineError::InvalidPrice(nightly_rate));
        }
        let event = Event::PriceSet {
            room_id,
            nightly_rate,
        };
        self.wal_append(&event).await?;
        self.apply_replayed(&event);
        self.publish(Collection::Prices);
        Ok(())
    }

    pub async fn add_addon(&self, id: Ulid, name: String, price: i64) -> Result<Addon, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("addon name too long"));
        }
        if price <= 0 {
            return Err(EngineError::InvalidPrice(price));
        }
        let event = Event::AddonAdded {
            id,
            name: name.clone(),
            price,
        };
        self.wal_append(&event).await?;
        self.apply_replayed(&event);
        self.publish(Collection::Addons);
        Ok(Addon { id, name, price })
    }

    /// Idempotent: removing an unknown addon is a no-op, since the UI's
    /// confirm step may race another session's delete. Reservations that
    /// referenced the addon keep their snapshots.
    pub async fn remove_addon(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.addons.contains_key(&id) {
            return Ok(());
        }
        let event = Event::AddonRemoved { id };
        self.wal_append(&event).await?;
        self.apply_replayed(&event);
        self.publish(Collection::Addons);
        Ok(())
    }

    pub async fn add_holiday(&self, id: Ulid, day: Day, name: String) -> Result<Holiday, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("holiday name too long"));
        }
        let event = Event::HolidayAdded {
            id,
            day,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_replayed(&event);
        self.publish(Collection::Holidays);
        Ok(Holiday { id, day, name })
    }

    /// Idempotent, like `remove_addon`.
    pub async fn remove_holiday(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.holidays.contains_key(&id) {
            return Ok(());
        }
        let event = Event::HolidayRemoved { id };
        self.wal_append(&event).await?;
        self.apply_replayed(&event);
        self.publish(Collection::Holidays);
        Ok(())
    }
}
