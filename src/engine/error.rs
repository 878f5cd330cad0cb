use thiserror::Error;
use ulid::Ulid;

use crate::model::{Day, RoomId};

/// Engine failure taxonomy. Three classes matter to callers:
/// validation (fix the input), conflict (pick other dates), transient
/// (retry the whole operation). `code()` is the wire-level class tag.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid date range: exit {exit} must be after entry {entry}")]
    InvalidDateRange { entry: Day, exit: Day },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid price: {0}")]
    InvalidPrice(i64),
    #[error("invalid payment amount: {0}")]
    InvalidPayment(i64),
    #[error("invalid party size: {0}")]
    InvalidPartySize(u32),
    #[error("invalid month: {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),
    #[error("unknown addon: {0}")]
    UnknownAddon(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("room {room_id} unavailable: conflicts with reservation {conflicting}")]
    RoomUnavailable { room_id: RoomId, conflicting: Ulid },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EngineError {
    /// Malformed input — surface to the caller for correction, never retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDateRange { .. }
                | EngineError::MissingField(_)
                | EngineError::InvalidPrice(_)
                | EngineError::InvalidPayment(_)
                | EngineError::InvalidPartySize(_)
                | EngineError::InvalidMonth { .. }
                | EngineError::UnknownRoom(_)
                | EngineError::UnknownAddon(_)
                | EngineError::LimitExceeded(_)
        )
    }

    /// Room taken — caller must re-prompt with different input.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::RoomUnavailable { .. })
    }

    /// Backend unreachable — the whole operation is safe to retry from
    /// scratch (it re-validates against current state).
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }

    pub fn code(&self) -> &'static str {
        if self.is_conflict() {
            "conflict"
        } else if self.is_transient() {
            "unavailable"
        } else if self.is_validation() {
            "validation"
        } else {
            "not_found"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_is_a_partition() {
        let errors = [
            EngineError::InvalidDateRange {
                entry: "2024-01-05".parse().unwrap(),
                exit: "2024-01-01".parse().unwrap(),
            },
            EngineError::MissingField("guest_name"),
            EngineError::InvalidPrice(-1),
            EngineError::UnknownRoom("SUITE".into()),
            EngineError::NotFound(Ulid::new()),
            EngineError::RoomUnavailable {
                room_id: "KAWSAY".into(),
                conflicting: Ulid::new(),
            },
            EngineError::StoreUnavailable("timeout".into()),
        ];
        for e in &errors {
            let classes = [e.is_validation(), e.is_conflict(), e.is_transient()];
            assert!(classes.iter().filter(|c| **c).count() <= 1, "{e}");
        }
    }

    #[test]
    fn wire_codes() {
        assert_eq!(
            EngineError::RoomUnavailable {
                room_id: "KAWSAY".into(),
                conflicting: Ulid::new()
            }
            .code(),
            "conflict"
        );
        assert_eq!(EngineError::StoreUnavailable("x".into()).code(), "unavailable");
        assert_eq!(EngineError::MissingField("contact").code(), "validation");
        assert_eq!(EngineError::NotFound(Ulid::new()).code(), "not_found");
    }
}
