//! Persistence contracts consumed by the lifecycle engine, plus the in-memory
//! implementation the service runs on.

mod memory;
mod writer;

pub use memory::MemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// An approved booking (the id carried) already occupies part of the span.
    Conflict(Ulid),
    /// The row moved on before this write landed.
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Conflict(id) => write!(f, "overlaps approved booking: {id}"),
            StoreError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Booking rows and the approved-overlap query.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Booking, StoreError>;

    /// Most recent first.
    async fn list_by_requester(&self, requester_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    /// Bookings on every space `owner_id` owns right now, most recent first.
    async fn list_by_owner(&self, owner_id: Ulid) -> Result<Vec<Booking>, StoreError>;

    /// Implementations must refuse a transition `BookingStatus::can_transition_to`
    /// forbids, and must refuse to approve a booking that would overlap another
    /// approved booking on the same space (`StoreError::Conflict`).
    async fn update_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, StoreError>;

    /// First approved booking on `resource_id` overlapping `span`, ignoring `exclude`.
    async fn find_approved_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, StoreError>;

    async fn has_approved_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .find_approved_overlap(resource_id, span, exclude)
            .await?
            .is_some())
    }
}

/// Spaces and who owns them.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn resolve_owner(&self, resource_id: Ulid) -> Result<Ulid, StoreError>;

    async fn register(&self, space: NewSpace) -> Result<Space, StoreError>;

    /// Most recent first.
    async fn list_spaces(&self) -> Result<Vec<Space>, StoreError>;
}
