use chrono::TimeZone;
use ulid::Ulid;

use crate::calendar::weekly_occurrences;
use crate::limits::SEMESTER_WEEKS;
use crate::model::*;

use super::admission::{check_and_insert, record_rejection, require_booking_role};
use super::conflict::{now_ms, validate_purpose, validate_span};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemesterRequest {
    pub room_id: RoomId,
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
}

/// Result of a committed semester booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemesterSummary {
    pub weeks: u32,
    /// One id per week, in week order.
    pub booking_ids: Vec<Ulid>,
}

impl SemesterSummary {
    pub fn status(&self) -> &'static str {
        "Success"
    }

    pub fn message(&self) -> String {
        format!("Semester booking confirmed for {} weeks", self.weeks)
    }
}

impl Engine {
    /// Book the same slot for every week of the semester, in server-local time.
    pub async fn create_semester_booking(
        &self,
        principal: &Principal,
        req: SemesterRequest,
    ) -> Result<SemesterSummary, EngineError> {
        self.create_semester_booking_in(&chrono::Local, principal, req, now_ms())
            .await
    }

    /// Semester booking with weeks laid out in `tz` wall-clock time.
    pub async fn create_semester_booking_in<Tz: TimeZone>(
        &self,
        tz: &Tz,
        principal: &Principal,
        req: SemesterRequest,
        now: Ms,
    ) -> Result<SemesterSummary, EngineError> {
        let result = self.book_semester(tz, principal, &req, now).await;
        match &result {
            Ok(summary) => {
                metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL)
                    .increment(u64::from(summary.weeks));
                tracing::info!(
                    room_id = req.room_id,
                    user_id = principal.id,
                    weeks = summary.weeks,
                    "semester booking committed"
                );
            }
            Err(e) => {
                record_rejection(e);
                if let EngineError::SemesterConflict { week, conflict } = e {
                    tracing::info!(
                        room_id = req.room_id,
                        user_id = principal.id,
                        week,
                        conflicting = %conflict.booking_id(),
                        "semester booking rolled back"
                    );
                }
            }
        }
        result
    }

    async fn book_semester<Tz: TimeZone>(
        &self,
        tz: &Tz,
        principal: &Principal,
        req: &SemesterRequest,
        now: Ms,
    ) -> Result<SemesterSummary, EngineError> {
        require_booking_role(principal)?;
        let base = validate_span(req.start, req.end)?;
        validate_purpose(&req.purpose)?;
        self.room_exists(req.room_id)?;

        let occurrences = weekly_occurrences(tz, base, SEMESTER_WEEKS)?;
        for span in &occurrences {
            validate_span(span.start, span.end)?;
        }

        // Any early return drops `tx`, which undoes the weeks already inserted.
        let mut tx = self.begin().await;
        let mut booking_ids = Vec::with_capacity(occurrences.len());
        for (k, span) in occurrences.into_iter().enumerate() {
            let booking = check_and_insert(
                &mut tx,
                &self.directory,
                principal,
                req.room_id,
                span,
                &req.purpose,
                true,
                now,
            )
            .map_err(|conflict| EngineError::SemesterConflict {
                week: k as u32 + 1,
                conflict,
            })?;
            booking_ids.push(booking.id);
        }
        tx.commit().await?;

        Ok(SemesterSummary {
            weeks: SEMESTER_WEEKS,
            booking_ids,
        })
    }
}
