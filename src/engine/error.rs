use ulid::Ulid;

use crate::model::BookingStatus;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed, empty, reversed or out-of-range dates.
    InvalidInterval(String),
    /// Overlaps the approved booking carried here.
    Conflict(Ulid),
    NotFound(Ulid),
    Forbidden(&'static str),
    InvalidStatus {
        id: Ulid,
        status: BookingStatus,
    },
    /// Cancellation refused because the booking has already begun.
    AlreadyStarted(Ulid),
    InvalidInput(&'static str),
    Persistence(String),
}

impl EngineError {
    /// Stable label for metrics and for an outer API layer picking response codes.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval(_) => "invalid_interval",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidStatus { .. } => "invalid_status",
            EngineError::AlreadyStarted(_) => "already_started",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::Conflict(id) => write!(f, "conflict with approved booking: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidStatus { id, status } => {
                write!(f, "booking {id} is {status}; transition not allowed")
            }
            EngineError::AlreadyStarted(id) => write!(f, "booking {id} has already started"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Conflict(id) => EngineError::Conflict(id),
            StoreError::InvalidTransition { id, from, .. } => {
                EngineError::InvalidStatus { id, status: from }
            }
            StoreError::Wal(e) => EngineError::Persistence(e),
        }
    }
}
