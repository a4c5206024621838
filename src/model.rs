use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type inside the engine.
pub type Ms = i64;

pub type RoomId = i64;
pub type UserId = i64;

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

// ── Principals ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Viewer,
    StudentRep,
}

impl Role {
    /// Whether this role may create and reschedule bookings.
    pub fn can_book(&self) -> bool {
        matches!(self, Role::StudentRep)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "VIEWER",
            Role::StudentRep => "STUDENT_REP",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller, resolved once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "ACTIVE",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(BookingStatus::Active),
            "CANCELLED" | "CANCELED" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: RoomId,
    pub created_by: UserId,
    pub span: Span,
    pub purpose: String,
    pub status: BookingStatus,
    pub is_semester_booking: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Reschedule,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Reschedule => "RESCHEDULE",
        }
    }
}

/// Audit row written once per reschedule, before the booking changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingHistory {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub previous_span: Span,
    pub previous_room_id: RoomId,
    pub modified_by: UserId,
    pub change_type: ChangeType,
    pub recorded_at: Ms,
}

/// Read-only catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub floor: Option<i32>,
    pub capacity: u32,
    #[serde(default)]
    pub has_ac: bool,
    #[serde(default)]
    pub has_projector: bool,
}

// ── Timeline ─────────────────────────────────────────────────────

/// ACTIVE booking spans for one room or one user, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<(Span, Ulid)>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, span: Span, id: Ulid) {
        let pos = self
            .entries
            .binary_search_by_key(&span.start, |(s, _)| s.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, (span, id));
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Span> {
        let pos = self.entries.iter().position(|(_, i)| *i == id)?;
        Some(self.entries.remove(pos).0)
    }

    /// Entries whose span overlaps the query window.
    /// Everything starting at or after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(Span, Ulid)> {
        let right_bound = self.entries.partition_point(|(s, _)| s.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |(s, _)| s.end > query.start)
    }
}

// ── WAL record contents ──────────────────────────────────────────

/// Flat mutation events. One WAL record carries all events of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated(Booking),
    BookingCancelled {
        id: Ulid,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: RoomId,
        span: Span,
        at: Ms,
    },
    HistoryRecorded(BookingHistory),
}
