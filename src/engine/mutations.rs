use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability::timed;

use super::conflict::{check_no_approved_overlap, span_from_dates, validate_listing, validate_span};
use super::{require_role, Engine, EngineError};

impl Engine {
    /// Request `[date_from, date_to)` on a space. The booking starts pending;
    /// other pending requests never block it, approved ones do.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        resource_id: Ulid,
        date_from: Ms,
        date_to: Ms,
    ) -> Result<Booking, EngineError> {
        timed("create_booking", async {
            require_role(actor, Role::Tenant)?;
            let span = validate_span(date_from, date_to)?;
            self.create_validated(actor, resource_id, span).await
        })
        .await
    }

    /// `create_booking` for `YYYY-MM-DD` dates as they arrive from a request.
    pub async fn create_booking_for_dates(
        &self,
        actor: &Actor,
        resource_id: Ulid,
        date_from: &str,
        date_to: &str,
    ) -> Result<Booking, EngineError> {
        timed("create_booking", async {
            require_role(actor, Role::Tenant)?;
            let span = span_from_dates(date_from, date_to)?;
            self.create_validated(actor, resource_id, span).await
        })
        .await
    }

    async fn create_validated(
        &self,
        actor: &Actor,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        // Surfaces NotFound for an unknown space before anything is written.
        self.directory.resolve_owner(resource_id).await?;
        check_no_approved_overlap(self.bookings.as_ref(), resource_id, span, None).await?;

        let booking = self
            .bookings
            .create(NewBooking {
                resource_id,
                requester_id: actor.subject_id,
                span,
            })
            .await?;
        info!(
            booking_id = %booking.id,
            resource_id = %resource_id,
            requester_id = %actor.subject_id,
            "booking requested"
        );
        self.emit(EventKind::Created, &booking);
        Ok(booking)
    }

    /// Withdraw a pending or approved booking. Only its requester may.
    pub async fn cancel_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        timed("cancel_booking", async {
            // Load first: an unknown id is NotFound for every caller.
            let booking = self.bookings.get(booking_id).await?;
            require_role(actor, Role::Tenant)?;
            if booking.requester_id != actor.subject_id {
                return Err(EngineError::Forbidden("only the requester may cancel a booking"));
            }
            if !booking.status.can_transition_to(BookingStatus::Cancelled) {
                return Err(EngineError::InvalidStatus {
                    id: booking.id,
                    status: booking.status,
                });
            }
            if self.forbid_cancel_after_start && now_ms() >= booking.span.start {
                return Err(EngineError::AlreadyStarted(booking.id));
            }

            let cancelled = self
                .bookings
                .update_status(booking_id, BookingStatus::Cancelled)
                .await?;
            info!(booking_id = %booking_id, "booking cancelled");
            self.emit(EventKind::Cancelled, &cancelled);
            Ok(cancelled)
        })
        .await
    }

    /// Accept a pending booking. Fails with `Conflict` if an overlapping
    /// booking on the same space was approved first.
    pub async fn approve_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        timed("approve_booking", async {
            let booking = self.load_for_owner(actor, booking_id).await?;
            check_no_approved_overlap(
                self.bookings.as_ref(),
                booking.resource_id,
                booking.span,
                Some(booking.id),
            )
            .await?;

            // The store re-checks overlap under the space lock; a racing
            // approval that slipped past the check above surfaces as Conflict.
            let approved = self
                .bookings
                .update_status(booking_id, BookingStatus::Approved)
                .await?;
            info!(
                booking_id = %booking_id,
                resource_id = %approved.resource_id,
                "booking approved"
            );
            self.emit(EventKind::Approved, &approved);
            Ok(approved)
        })
        .await
    }

    pub async fn reject_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        timed("reject_booking", async {
            self.load_for_owner(actor, booking_id).await?;
            let rejected = self
                .bookings
                .update_status(booking_id, BookingStatus::Rejected)
                .await?;
            info!(booking_id = %booking_id, "booking rejected");
            self.emit(EventKind::Rejected, &rejected);
            Ok(rejected)
        })
        .await
    }

    /// List a new space owned by the caller.
    pub async fn register_space(
        &self,
        actor: &Actor,
        listing: SpaceListing,
    ) -> Result<Space, EngineError> {
        timed("register_space", async {
            require_role(actor, Role::Owner)?;
            validate_listing(&listing)?;
            let space = self
                .directory
                .register(NewSpace {
                    owner_id: actor.subject_id,
                    listing,
                })
                .await?;
            info!(resource_id = %space.id, owner_id = %space.owner_id, "space registered");
            Ok(space)
        })
        .await
    }
}
