use ulid::Ulid;

use crate::model::{Ms, RoomId};

/// Which overlap predicate rejected an interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The room already holds an ACTIVE booking in the window.
    Room { room_id: RoomId, booking_id: Ulid },
    /// The caller already holds an ACTIVE booking in the window, in `room_name`.
    User {
        room_id: RoomId,
        room_name: String,
        booking_id: Ulid,
    },
}

impl Conflict {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Conflict::Room { booking_id, .. } | Conflict::User { booking_id, .. } => *booking_id,
        }
    }
}

/// Coarse error taxonomy, used for SQLSTATE mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    Authorization,
    InvalidState,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidSpan { start: Ms, end: Ms },
    BookingInPast,
    OutsideBookingWindow,
    Conflict(Conflict),
    /// `week` is 1-based.
    SemesterConflict { week: u32, conflict: Conflict },
    BookingNotFound(Ulid),
    RoomNotFound(RoomId),
    Forbidden(&'static str),
    BookingCancelled(Ulid),
    LimitExceeded(&'static str),
    /// Reschedule named no field to change.
    EmptyReschedule,
    Calendar(String),
    WalError(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidSpan { .. }
            | EngineError::BookingInPast
            | EngineError::OutsideBookingWindow
            | EngineError::LimitExceeded(_)
            | EngineError::EmptyReschedule
            | EngineError::Calendar(_) => ErrorClass::Validation,
            EngineError::Conflict(_) | EngineError::SemesterConflict { .. } => ErrorClass::Conflict,
            EngineError::BookingNotFound(_) | EngineError::RoomNotFound(_) => ErrorClass::NotFound,
            EngineError::Forbidden(_) => ErrorClass::Authorization,
            EngineError::BookingCancelled(_) => ErrorClass::InvalidState,
            EngineError::WalError(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidSpan { .. } => "INVALID_SPAN",
            EngineError::BookingInPast => "BOOKING_IN_PAST",
            EngineError::OutsideBookingWindow => "OUTSIDE_BOOKING_WINDOW",
            EngineError::Conflict(Conflict::Room { .. }) => "ROOM_CONFLICT",
            EngineError::Conflict(Conflict::User { .. }) => "USER_CONFLICT",
            EngineError::SemesterConflict { .. } => "SEMESTER_CONFLICT",
            EngineError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            EngineError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::BookingCancelled(_) => "BOOKING_CANCELLED",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::EmptyReschedule => "EMPTY_RESCHEDULE",
            EngineError::Calendar(_) => "CALENDAR",
            EngineError::WalError(_) => "INTERNAL",
        }
    }

    pub fn sqlstate(&self) -> &'static str {
        match self.class() {
            ErrorClass::Validation => "22023",
            ErrorClass::Conflict => "23P01",
            ErrorClass::NotFound => "P0002",
            ErrorClass::Authorization => "42501",
            ErrorClass::InvalidState => "55000",
            ErrorClass::Internal => "XX000",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSpan { start, end } => {
                write!(f, "start_time must be before end_time (start {start}, end {end})")
            }
            EngineError::BookingInPast => write!(f, "Cannot book in the past"),
            EngineError::OutsideBookingWindow => {
                write!(f, "Regular bookings allowed only for the current week")
            }
            EngineError::Conflict(Conflict::Room { .. }) => {
                write!(f, "Room is already booked for this time period")
            }
            EngineError::Conflict(Conflict::User { room_name, .. }) => write!(
                f,
                "You already have another booking during this time in Room {room_name}"
            ),
            EngineError::SemesterConflict { week, conflict } => match conflict {
                Conflict::Room { .. } => write!(
                    f,
                    "Conflict at week {week}. Semester booking failed: room already booked"
                ),
                Conflict::User { room_name, .. } => write!(
                    f,
                    "Conflict at week {week}. Semester booking failed: user busy in Room {room_name}"
                ),
            },
            EngineError::BookingNotFound(id) => write!(f, "Booking not found: {id}"),
            EngineError::RoomNotFound(id) => write!(f, "Room not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            EngineError::BookingCancelled(id) => write!(f, "Booking {id} is cancelled"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::EmptyReschedule => {
                write!(f, "Reschedule needs a new start_time, end_time or room_id")
            }
            EngineError::Calendar(e) => write!(f, "calendar error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::calendar::CalendarError> for EngineError {
    fn from(e: crate::calendar::CalendarError) -> Self {
        EngineError::Calendar(e.to_string())
    }
}
