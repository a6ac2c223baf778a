use crate::model::*;
use crate::observability::timed;

use super::{require_role, Engine, EngineError};

impl Engine {
    /// The caller's own bookings, most recent first.
    pub async fn list_mine(&self, actor: &Actor) -> Result<Vec<Booking>, EngineError> {
        timed("list_mine", async {
            require_role(actor, Role::Tenant)?;
            Ok(self.bookings.list_by_requester(actor.subject_id).await?)
        })
        .await
    }

    /// Bookings on every space the caller owns, most recent first. Ownership
    /// comes from the store's join, never from the caller.
    pub async fn list_for_owner(&self, actor: &Actor) -> Result<Vec<Booking>, EngineError> {
        timed("list_for_owner", async {
            require_role(actor, Role::Owner)?;
            Ok(self.bookings.list_by_owner(actor.subject_id).await?)
        })
        .await
    }

    /// Public listing; no identity needed.
    pub async fn list_spaces(&self) -> Result<Vec<Space>, EngineError> {
        timed("list_spaces", async { Ok(self.directory.list_spaces().await?) }).await
    }
}
