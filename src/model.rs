use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — used for record timestamps only, never for stay math.
pub type Ms = i64;

/// A calendar day. Day-granular, single reference timezone (UTC).
pub type Day = NaiveDate;

/// Stable room key ("KAWSAY", "INFINITY", …). Seeded once, immutable.
pub type RoomId = String;

/// Truncate an instant to its UTC calendar day. Two instants on the same
/// calendar day normalize identically regardless of time-of-day.
pub fn normalize_day(instant: DateTime<Utc>) -> Day {
    instant.date_naive()
}

/// Half-open stay interval `[entry, exit)` — the exit day is checkout,
/// not occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub entry: Day,
    pub exit: Day,
}

impl StayRange {
    pub fn new(entry: Day, exit: Day) -> Self {
        debug_assert!(entry < exit, "StayRange entry must be before exit");
        Self { entry, exit }
    }

    pub fn nights(&self) -> i64 {
        self.exit.signed_duration_since(self.entry).num_days()
    }

    /// The one overlap predicate — shared by the conflict check and every
    /// occupancy query.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.entry < other.exit && other.entry < self.exit
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.entry <= day && day < self.exit
    }
}

// ── Catalog records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// One active nightly rate per room. Versionless, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub room_id: RoomId,
    pub nightly_rate: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub id: Ulid,
    pub name: String,
    pub price: i64,
}

/// Addon name and price frozen into a reservation at booking time.
/// Catalog renames and re-pricings never rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSnapshot {
    pub addon_id: Ulid,
    pub name: String,
    pub price: i64,
}

/// Calendar highlighting only — holidays carry no rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub id: Ulid,
    pub day: Day,
    pub name: String,
}

// ── Reservation & client ─────────────────────────────────────────

/// How payment was recorded at booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Payment {
    /// Paid in full — `amount_paid` becomes the reservation total.
    Full,
    /// Manually recorded deposit (0 = nothing paid yet).
    Deposit(i64),
}

impl Default for Payment {
    fn default() -> Self {
        Payment::Deposit(0)
    }
}

/// Caller input for the propose pipeline. Totals are never accepted from the
/// caller; the engine computes them from the catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub room_id: RoomId,
    pub guest_name: String,
    pub contact: String,
    pub party_size: u32,
    pub entry: Day,
    pub exit: Day,
    #[serde(default)]
    pub additional_guests: Vec<String>,
    #[serde(default)]
    pub addon_ids: Vec<Ulid>,
    #[serde(default)]
    pub observations: String,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: RoomId,
    pub guest_name: String,
    pub contact: String,
    pub party_size: u32,
    pub stay: StayRange,
    pub additional_guests: Vec<String>,
    pub addons: Vec<AddonSnapshot>,
    pub observations: String,
    /// Rate snapshot taken from the catalog at booking time.
    pub nightly_rate: i64,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub amount_due: i64,
    pub created_at: Ms,
    pub created_by: Option<String>,
    pub updated_at: Ms,
}

/// Derived registry entry, keyed by exact contact. Append-only: ids of
/// deleted reservations are intentionally left in `reservation_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub guest_name: String,
    pub contact: String,
    pub reservation_ids: Vec<Ulid>,
    pub created_at: Ms,
}

// ── Room ledger ──────────────────────────────────────────────────

/// All reservations for one room, sorted by entry day.
#[derive(Debug, Clone)]
pub struct RoomLedger {
    pub room_id: RoomId,
    pub reservations: Vec<Reservation>,
}

impl RoomLedger {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by stay.entry.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.stay.entry, |r| r.stay.entry)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose stay overlaps the query window.
    /// Binary search skips everything starting at or after `query.exit`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.entry < query.exit);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.exit > query.entry)
    }
}

// ── Events & collections ─────────────────────────────────────────

/// Collections observable through the notification hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Rooms,
    Prices,
    Addons,
    Holidays,
    Reservations,
    Clients,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
    },
    PriceSet {
        room_id: RoomId,
        nightly_rate: i64,
    },
    AddonAdded {
        id: Ulid,
        name: String,
        price: i64,
    },
    AddonRemoved {
        id: Ulid,
    },
    HolidayAdded {
        id: Ulid,
        day: Day,
        name: String,
    },
    HolidayRemoved {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: RoomId,
    },
    ClientLinked {
        id: Ulid,
        guest_name: String,
        contact: String,
        reservation_id: Ulid,
        at: Ms,
    },
}

impl Event {
    pub fn collection(&self) -> Collection {
        match self {
            Event::RoomCreated { .. } => Collection::Rooms,
            Event::PriceSet { .. } => Collection::Prices,
            Event::AddonAdded { .. } | Event::AddonRemoved { .. } => Collection::Addons,
            Event::HolidayAdded { .. } | Event::HolidayRemoved { .. } => Collection::Holidays,
            Event::ReservationCreated { .. }
            | Event::ReservationUpdated { .. }
            | Event::ReservationDeleted { .. } => Collection::Reservations,
            Event::ClientLinked { .. } => Collection::Clients,
        }
    }
}

/// Full-collection snapshot delivered to subscribers on every change.
/// Replace semantics: consumers drop whatever they held before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "data", rename_all = "snake_case")]
pub enum Snapshot {
    Rooms(Vec<Room>),
    Prices(Vec<Price>),
    Addons(Vec<Addon>),
    Holidays(Vec<Holiday>),
    Reservations(Vec<Reservation>),
    Clients(Vec<Client>),
}

impl Snapshot {
    pub fn collection(&self) -> Collection {
        match self {
            Snapshot::Rooms(_) => Collection::Rooms,
            Snapshot::Prices(_) => Collection::Prices,
            Snapshot::Addons(_) => Collection::Addons,
            Snapshot::Holidays(_) => Collection::Holidays,
            Snapshot::Reservations(_) => Collection::Reservations,
            Snapshot::Clients(_) => Collection::Clients,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Totals across the whole reservation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub reservation_count: usize,
    pub total_amount: i64,
    pub total_paid: i64,
    pub total_due: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMonthRow {
    pub room_id: RoomId,
    pub reservation_count: usize,
    pub income: i64,
}

/// Per-room count/income for reservations entering in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub rooms: Vec<RoomMonthRow>,
    pub grand_total: i64,
}

/// Occupancy of every room for one rendered month. Absent keys mean free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthOccupancy {
    pub year: i32,
    pub month: u32,
    pub occupied: BTreeMap<RoomId, BTreeSet<Day>>,
}

impl MonthOccupancy {
    pub fn get(&self, room_id: &str, day: Day) -> bool {
        self.occupied
            .get(room_id)
            .is_some_and(|days| days.contains(&day))
    }
}
