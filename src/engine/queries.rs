use ulid::Ulid;

use crate::calendar::hour_of_day;
use crate::model::*;

use super::{Engine, EngineError};

/// Optional predicates for `list_bookings`. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub room_id: Option<RoomId>,
    pub created_by: Option<UserId>,
    /// Bookings starting at or after this instant.
    pub start_from: Option<Ms>,
    /// Bookings ending at or before this instant.
    pub end_until: Option<Ms>,
    pub status: Option<BookingStatus>,
    /// Hour of day (UTC) the booking starts in.
    pub slot: Option<u32>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.room_id.is_none_or(|r| b.room_id == r)
            && self.created_by.is_none_or(|u| b.created_by == u)
            && self.start_from.is_none_or(|t| b.span.start >= t)
            && self.end_until.is_none_or(|t| b.span.end <= t)
            && self.status.is_none_or(|s| b.status == s)
            && self.slot.is_none_or(|h| hour_of_day(b.span.start) == Some(h))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub min_capacity: Option<u32>,
    pub has_ac: Option<bool>,
    pub has_projector: Option<bool>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        self.min_capacity.is_none_or(|c| room.capacity >= c)
            && self.has_ac.is_none_or(|v| room.has_ac == v)
            && self.has_projector.is_none_or(|v| room.has_projector == v)
    }
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let table = self.table.read().await;
        table.get(&id).cloned().ok_or(EngineError::BookingNotFound(id))
    }

    /// Matching bookings, newest first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let table = self.table.read().await;
        let mut rows: Vec<Booking> = table.iter().filter(|b| filter.matches(b)).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }

    /// History rows of one booking in recording order.
    pub async fn booking_history(&self, booking_id: Ulid) -> Result<Vec<BookingHistory>, EngineError> {
        let table = self.table.read().await;
        if table.get(&booking_id).is_none() {
            return Err(EngineError::BookingNotFound(booking_id));
        }
        Ok(table.history_for(&booking_id).cloned().collect())
    }

    pub fn rooms(&self, filter: &RoomFilter) -> Vec<Room> {
        self.directory
            .rooms()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect()
    }

    pub async fn booking_count(&self) -> usize {
        self.table.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(room_id: RoomId, user: UserId, start: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id,
            created_by: user,
            span: Span::new(start, start + 3_600_000),
            purpose: String::new(),
            status: BookingStatus::Active,
            is_semester_booking: false,
            created_at: 0,
            updated_at: 0,
            cancelled_at: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(BookingFilter::default().matches(&booking(1, 1, 0)));
    }

    #[test]
    fn slot_is_utc_hour_of_start() {
        // 1970-01-01T10:00Z
        let b = booking(1, 1, 10 * 3_600_000);
        let ten = BookingFilter { slot: Some(10), ..Default::default() };
        let eleven = BookingFilter { slot: Some(11), ..Default::default() };
        assert!(ten.matches(&b));
        assert!(!eleven.matches(&b));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let b = booking(1, 1, 1_000);
        let f = BookingFilter {
            start_from: Some(1_000),
            end_until: Some(1_000 + 3_600_000),
            ..Default::default()
        };
        assert!(f.matches(&b));
        let f = BookingFilter { start_from: Some(1_001), ..Default::default() };
        assert!(!f.matches(&b));
    }

    #[test]
    fn room_filter_combines_predicates() {
        let room = Room {
            id: 1,
            name: "A101".into(),
            building: None,
            floor: None,
            capacity: 40,
            has_ac: true,
            has_projector: false,
        };
        let f = RoomFilter { min_capacity: Some(30), has_ac: Some(true), has_projector: None };
        assert!(f.matches(&room));
        let f = RoomFilter { has_projector: Some(true), ..Default::default() };
        assert!(!f.matches(&room));
    }
}
