//! Hard input bounds. Crossing one yields `EngineError::LimitExceeded`.

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CONTACT_LEN: usize = 200;
pub const MAX_OBSERVATIONS_LEN: usize = 2_000;
pub const MAX_ADDITIONAL_GUESTS: usize = 20;
pub const MAX_ADDONS_PER_RESERVATION: usize = 50;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 10_000;

/// Longest accepted wire request line.
pub const MAX_WIRE_LINE_BYTES: usize = 64 * 1024;

/// Bound on every store interaction; past this the operation surfaces
/// `StoreUnavailable` instead of hanging.
pub const WAL_APPEND_TIMEOUT_MS: u64 = 5_000;

/// Pending snapshot publications before change markers are dropped
/// (subscribers still converge on the next delivered snapshot).
pub const PUBLISH_QUEUE_CAPACITY: usize = 1_024;
