use ulid::Ulid;

use crate::directory::Directory;
use crate::model::*;

use super::conflict::{check_booking_window, now_ms, validate_purpose, validate_span, Scope};
use super::{Conflict, Engine, EngineError, Transaction};

/// A single-booking request as it arrives from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: RoomId,
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
    pub is_semester: bool,
}

pub(super) fn require_booking_role(principal: &Principal) -> Result<(), EngineError> {
    if principal.role.can_book() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("booking requires the STUDENT_REP role"))
    }
}

/// Room overlap, then user overlap, then insert. Runs inside `tx`, so the
/// checks and the insert see the same table state.
#[allow(clippy::too_many_arguments)]
pub(super) fn check_and_insert(
    tx: &mut Transaction<'_>,
    directory: &Directory,
    principal: &Principal,
    room_id: RoomId,
    span: Span,
    purpose: &str,
    is_semester: bool,
    now: Ms,
) -> Result<Booking, Conflict> {
    if let Some(existing) = tx.find_overlap(Scope::Room(room_id), &span, None) {
        return Err(Conflict::Room {
            room_id,
            booking_id: existing.id,
        });
    }
    if let Some(existing) = tx.find_overlap(Scope::User(principal.id), &span, None) {
        return Err(Conflict::User {
            room_id: existing.room_id,
            room_name: directory.room_name(existing.room_id),
            booking_id: existing.id,
        });
    }

    let booking = Booking {
        id: Ulid::new(),
        room_id,
        created_by: principal.id,
        span,
        purpose: purpose.to_string(),
        status: BookingStatus::Active,
        is_semester_booking: is_semester,
        created_at: now,
        updated_at: now,
        cancelled_at: None,
    };
    tx.insert_booking(booking.clone());
    Ok(booking)
}

pub(super) fn record_rejection(err: &EngineError) {
    metrics::counter!(crate::observability::BOOKING_REJECTIONS_TOTAL, "reason" => err.reason())
        .increment(1);
}

impl Engine {
    pub async fn create_booking(
        &self,
        principal: &Principal,
        req: BookingRequest,
    ) -> Result<Booking, EngineError> {
        self.create_booking_at(principal, req, now_ms()).await
    }

    /// `create_booking` against an explicit clock reading.
    pub async fn create_booking_at(
        &self,
        principal: &Principal,
        req: BookingRequest,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let result = self.admit(principal, &req, now).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    booking_id = %booking.id,
                    room_id = booking.room_id,
                    user_id = principal.id,
                    "booking created"
                );
            }
            Err(e) => {
                record_rejection(e);
                tracing::debug!(
                    room_id = req.room_id,
                    user_id = principal.id,
                    reason = e.reason(),
                    "booking rejected: {e}"
                );
            }
        }
        result
    }

    async fn admit(
        &self,
        principal: &Principal,
        req: &BookingRequest,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        require_booking_role(principal)?;
        let span = validate_span(req.start, req.end)?;
        validate_purpose(&req.purpose)?;
        check_booking_window(&span, req.is_semester, now)?;
        self.room_exists(req.room_id)?;

        let mut tx = self.begin().await;
        let booking = check_and_insert(
            &mut tx,
            &self.directory,
            principal,
            req.room_id,
            span,
            &req.purpose,
            req.is_semester,
            now,
        )
        .map_err(EngineError::Conflict)?;
        tx.commit().await?;
        Ok(booking)
    }
}
