use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::BookingStore;

use super::EngineError;

/// Validate a requested interval once, at creation. Intervals never change
/// afterwards so nothing downstream re-checks this. Any length is accepted;
/// the range check only rejects values no calendar date produces.
pub(crate) fn validate_span(date_from: Ms, date_to: Ms) -> Result<Span, EngineError> {
    if date_from >= date_to {
        return Err(EngineError::InvalidInterval(
            "date_from must be before date_to".into(),
        ));
    }
    if date_from < MIN_VALID_TIMESTAMP_MS || date_to > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidInterval("timestamp out of range".into()));
    }
    Ok(Span::new(date_from, date_to))
}

/// `YYYY-MM-DD` pair → validated span.
pub(crate) fn span_from_dates(date_from: &str, date_to: &str) -> Result<Span, EngineError> {
    let parse = |s: &str| {
        parse_date(s).ok_or_else(|| EngineError::InvalidInterval(format!("malformed date: {s:?}")))
    };
    validate_span(parse(date_from)?, parse(date_to)?)
}

/// Early exit before a write. The store re-checks on approval, so this is an
/// optimisation, not the guard.
pub(crate) async fn check_no_approved_overlap(
    store: &dyn BookingStore,
    resource_id: Ulid,
    span: Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match store.find_approved_overlap(resource_id, span, exclude).await? {
        Some(existing) => Err(EngineError::Conflict(existing)),
        None => Ok(()),
    }
}

pub(crate) fn validate_listing(listing: &SpaceListing) -> Result<(), EngineError> {
    if listing.title.trim().is_empty() {
        return Err(EngineError::InvalidInput("title must not be empty"));
    }
    if listing.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::InvalidInput("title too long"));
    }
    if listing
        .description
        .as_ref()
        .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
    {
        return Err(EngineError::InvalidInput("description too long"));
    }
    // NaN fails this comparison too
    if !(listing.area_m2 > 0.0 && listing.area_m2.is_finite()) {
        return Err(EngineError::InvalidInput("area_m2 must be a positive number"));
    }
    if listing.price <= 0 {
        return Err(EngineError::InvalidInput("price must be positive"));
    }
    if listing.phone.trim().is_empty() {
        return Err(EngineError::InvalidInput("phone must not be empty"));
    }
    if listing.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::InvalidInput("phone too long"));
    }
    Ok(())
}
