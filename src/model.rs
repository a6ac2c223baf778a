use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a `YYYY-MM-DD` calendar date to midnight UTC.
pub fn parse_date(s: &str) -> Option<Ms> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tenant,
    Owner,
}

/// An already-authenticated caller. Passed into every engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub subject_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn tenant(subject_id: Ulid) -> Self {
        Self { subject_id, role: Role::Tenant }
    }

    pub fn owner(subject_id: Ulid) -> Self {
        Self { subject_id, role: Role::Owner }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Pending may move to any other status. An approved booking may still be
    /// cancelled by its requester. Everything else is final.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Approved)
                | (BookingStatus::Pending, BookingStatus::Rejected)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Approved, BookingStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub status: BookingStatus,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A booking request before the store has assigned identity and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub span: Span,
}

// ── Spaces ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub area_m2: f64,
    pub price: i64,
    pub phone: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// What an owner submits when listing a space.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceListing {
    pub title: String,
    pub description: Option<String>,
    pub area_m2: f64,
    pub price: i64,
    pub phone: String,
}

impl SpaceListing {
    pub fn new(title: impl Into<String>, area_m2: f64, price: i64, phone: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            area_m2,
            price,
            phone: phone.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSpace {
    pub owner_id: Ulid,
    pub listing: SpaceListing,
}

/// An approved booking's footprint on its space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
}

/// Per-space state held by the store behind a lock.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space: Space,
    /// Approved intervals only, sorted by `span.start`.
    pub approved: Vec<Interval>,
    /// Every booking ever made against this space, in creation order.
    pub bookings: Vec<Ulid>,
}

impl SpaceState {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            approved: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .approved
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.approved.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.approved.iter().position(|i| i.id == id)?;
        Some(self.approved.remove(pos))
    }

    /// Return only approved intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self.approved.partition_point(|i| i.span.start < query.end);
        self.approved[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }
}

// ── Lifecycle events ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Approved,
    Rejected,
    Cancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Approved => "approved",
            EventKind::Rejected => "rejected",
            EventKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub booking_id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub at: Ms,
}

impl LifecycleEvent {
    pub fn for_booking(kind: EventKind, booking: &Booking) -> Self {
        Self {
            kind,
            booking_id: booking.id,
            resource_id: booking.resource_id,
            requester_id: booking.requester_id,
            at: booking.updated_at,
        }
    }
}

/// Write-ahead log record. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    SpaceRegistered {
        id: Ulid,
        owner_id: Ulid,
        title: String,
        description: Option<String>,
        area_m2: f64,
        price: i64,
        phone: String,
        at: Ms,
    },
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        requester_id: Ulid,
        span: Span,
        at: Ms,
    },
    StatusChanged {
        id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
}
