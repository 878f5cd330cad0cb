use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

use super::{Engine, EngineError};

// ── Occupancy queries ────────────────────────────────────────────

/// First day of the month through the first day of the next — the half-open
/// window scanned by the calendar view. None for an invalid year/month.
pub fn month_span(year: i32, month: u32) -> Option<StayRange> {
    let first = Day::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        Day::from_ymd_opt(year + 1, 1, 1)?
    } else {
        Day::from_ymd_opt(year, month + 1, 1)?
    };
    Some(StayRange::new(first, next))
}

impl Engine {
    /// The reservation occupying `room_id` on `day`, if any. The overlap
    /// invariant guarantees at most one exists, so the first hit is returned
    /// directly — no tie-break needed. Unknown rooms read as free.
    pub async fn is_occupied(&self, room_id: &str, day: Day) -> Option<Reservation> {
        let window = StayRange::new(day, day.succ_opt()?);
        let ledger = self.get_ledger(room_id)?;
        let guard = ledger.read().await;
        guard.overlapping(&window).next().cloned()
    }

    /// Occupancy map for one rendered month: a single `overlapping` scan per
    /// room — O(rooms × overlapping reservations), not O(rooms × days ×
    /// reservations). Pure function of ledger state: repeated calls over an
    /// unchanged ledger return identical maps.
    pub async fn month_occupancy(&self, year: i32, month: u32) -> Result<MonthOccupancy, EngineError> {
        let window = month_span(year, month).ok_or(EngineError::InvalidMonth { year, month })?;

        let mut occupied: BTreeMap<RoomId, BTreeSet<Day>> = BTreeMap::new();
        let mut room_ids: Vec<RoomId> = self.ledgers.iter().map(|e| e.key().clone()).collect();
        room_ids.sort();

        for room_id in room_ids {
            let Some(ledger) = self.get_ledger(&room_id) else {
                continue;
            };
            let guard = ledger.read().await;
            let days = occupied.entry(room_id.clone()).or_default();
            for reservation in guard.overlapping(&window) {
                let from = reservation.stay.entry.max(window.entry);
                let to = reservation.stay.exit.min(window.exit);
                for day in from.iter_days().take_while(|d| *d < to) {
                    days.insert(day);
                }
            }
        }

        Ok(MonthOccupancy {
            year,
            month,
            occupied,
        })
    }

    /// Calendar highlighting only.
    pub fn is_holiday(&self, day: Day) -> bool {
        self.holidays.iter().any(|h| h.day == day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    #[test]
    fn month_span_covers_whole_month() {
        let span = month_span(2024, 1).unwrap();
        assert_eq!(span.entry, d("2024-01-01"));
        assert_eq!(span.exit, d("2024-02-01"));
        assert_eq!(span.nights(), 31);
    }

    #[test]
    fn month_span_december_wraps_year() {
        let span = month_span(2024, 12).unwrap();
        assert_eq!(span.exit, d("2025-01-01"));
    }

    #[test]
    fn month_span_leap_february() {
        assert_eq!(month_span(2024, 2).unwrap().nights(), 29);
        assert_eq!(month_span(2023, 2).unwrap().nights(), 28);
    }

    #[test]
    fn month_span_rejects_bad_month() {
        assert!(month_span(2024, 0).is_none());
        assert!(month_span(2024, 13).is_none());
    }
}
