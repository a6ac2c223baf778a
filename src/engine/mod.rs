mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::dispatch::EventSender;
use crate::model::*;
use crate::store::{BookingStore, ResourceDirectory};

/// The reservation lifecycle engine.
///
/// Stateless between calls: the store is the single source of truth, and
/// ownership is resolved through the directory on every owner-scoped call.
pub struct Engine {
    pub(super) bookings: Arc<dyn BookingStore>,
    pub(super) directory: Arc<dyn ResourceDirectory>,
    pub(super) events: EventSender,
    /// Refuse cancellation once `date_from` has passed.
    pub(super) forbid_cancel_after_start: bool,
}

impl Engine {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        directory: Arc<dyn ResourceDirectory>,
        events: EventSender,
    ) -> Self {
        Self {
            bookings,
            directory,
            events,
            forbid_cancel_after_start: false,
        }
    }

    pub fn forbid_cancel_after_start(mut self, forbid: bool) -> Self {
        self.forbid_cancel_after_start = forbid;
        self
    }

    /// Enqueue without waiting; a full queue loses the event.
    pub(super) fn emit(&self, kind: EventKind, booking: &Booking) {
        self.events.emit(LifecycleEvent::for_booking(kind, booking));
    }

    /// Check the caller's owner role and resolve the space owner right now.
    pub(super) async fn authorize_owner(
        &self,
        actor: &Actor,
        booking: &Booking,
    ) -> Result<(), EngineError> {
        require_role(actor, Role::Owner)?;
        let owner_id = self.directory.resolve_owner(booking.resource_id).await?;
        if owner_id != actor.subject_id {
            debug!(
                booking_id = %booking.id,
                actor = %actor.subject_id,
                "owner check failed"
            );
            return Err(EngineError::Forbidden(
                "only the owner of the space may manage its bookings",
            ));
        }
        Ok(())
    }

    /// Load a pending booking and check the caller owns its space.
    pub(super) async fn load_for_owner(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let booking = self.bookings.get(booking_id).await?;
        self.authorize_owner(actor, &booking).await?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStatus {
                id: booking.id,
                status: booking.status,
            });
        }
        Ok(booking)
    }
}

pub(super) fn require_role(actor: &Actor, role: Role) -> Result<(), EngineError> {
    if actor.role == role {
        return Ok(());
    }
    Err(EngineError::Forbidden(match role {
        Role::Tenant => "tenant role required",
        Role::Owner => "owner role required",
    }))
}
