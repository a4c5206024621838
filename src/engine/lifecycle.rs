use ulid::Ulid;

use crate::model::*;

use super::admission::{record_rejection, require_booking_role};
use super::conflict::{now_ms, validate_span, Scope};
use super::{Conflict, Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The booking was already CANCELLED; nothing was written.
    AlreadyCancelled,
}

/// New values for a reschedule. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescheduleRequest {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub room_id: Option<RoomId>,
}

impl RescheduleRequest {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.room_id.is_none()
    }
}

impl Engine {
    /// Creator-only ACTIVE → CANCELLED transition.
    pub async fn cancel_booking(
        &self,
        principal: &Principal,
        id: Ulid,
    ) -> Result<CancelOutcome, EngineError> {
        let mut tx = self.begin().await;
        let booking = tx.get(&id).ok_or(EngineError::BookingNotFound(id))?;
        if booking.created_by != principal.id {
            return Err(EngineError::Forbidden("only the creator may cancel a booking"));
        }
        if !booking.is_active() {
            tracing::debug!(booking_id = %id, "cancel of cancelled booking ignored");
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        tx.cancel_booking(id, now_ms())?;
        tx.commit().await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!(booking_id = %id, user_id = principal.id, "booking cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Move a booking in time and/or to another room. One history row with
    /// the previous values is written first, in the same transaction.
    pub async fn reschedule_booking(
        &self,
        principal: &Principal,
        id: Ulid,
        change: RescheduleRequest,
    ) -> Result<Booking, EngineError> {
        let result = self.reschedule(principal, id, &change).await;
        match &result {
            Ok(b) => tracing::info!(
                booking_id = %id,
                room_id = b.room_id,
                user_id = principal.id,
                "booking rescheduled"
            ),
            Err(e) => {
                record_rejection(e);
                tracing::debug!(booking_id = %id, reason = e.reason(), "reschedule rejected: {e}");
            }
        }
        result
    }

    async fn reschedule(
        &self,
        principal: &Principal,
        id: Ulid,
        change: &RescheduleRequest,
    ) -> Result<Booking, EngineError> {
        require_booking_role(principal)?;
        if change.is_empty() {
            return Err(EngineError::EmptyReschedule);
        }
        if let Some(room_id) = change.room_id {
            self.room_exists(room_id)?;
        }

        let mut tx = self.begin().await;
        let current = tx.get(&id).cloned().ok_or(EngineError::BookingNotFound(id))?;
        if !current.is_active() {
            return Err(EngineError::BookingCancelled(id));
        }

        let room_id = change.room_id.unwrap_or(current.room_id);
        let span = validate_span(
            change.start.unwrap_or(current.span.start),
            change.end.unwrap_or(current.span.end),
        )?;

        if let Some(other) = tx.find_overlap(Scope::Room(room_id), &span, Some(id)) {
            return Err(EngineError::Conflict(Conflict::Room {
                room_id,
                booking_id: other.id,
            }));
        }
        if let Some(other) = tx.find_overlap(Scope::User(current.created_by), &span, Some(id)) {
            return Err(EngineError::Conflict(Conflict::User {
                room_id: other.room_id,
                room_name: self.directory.room_name(other.room_id),
                booking_id: other.id,
            }));
        }

        let now = now_ms();
        tx.record_history(BookingHistory {
            id: Ulid::new(),
            booking_id: id,
            previous_span: current.span,
            previous_room_id: current.room_id,
            modified_by: principal.id,
            change_type: ChangeType::Reschedule,
            recorded_at: now,
        });
        let updated = tx.reschedule_booking(id, room_id, span, now)?;
        tx.commit().await?;
        Ok(updated)
    }
}
