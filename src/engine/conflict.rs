use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::BookingTable;
use super::EngineError;

/// Whose timeline an overlap check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Room(RoomId),
    User(UserId),
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `start < end`, inside the supported timestamp range, not wider than a week.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

pub(crate) fn validate_purpose(purpose: &str) -> Result<(), EngineError> {
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

/// Temporal admission rules for a single booking, checked in order.
///
/// The window rule is an absolute distance of seven days from `now`, not a
/// calendar week. Together with the backdate rule it admits
/// `now <= start <= now + 7d`. Semester requests skip the window rule.
pub(crate) fn check_booking_window(span: &Span, is_semester: bool, now: Ms) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::BookingInPast);
    }
    if !is_semester && (span.start - now).abs() > BOOKING_WINDOW_MS {
        return Err(EngineError::OutsideBookingWindow);
    }
    Ok(())
}

/// First ACTIVE booking in `scope` intersecting `span`, ignoring `exclude`.
pub(crate) fn find_overlap<'t>(
    table: &'t BookingTable,
    scope: Scope,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'t Booking> {
    let timeline = table.timeline(scope)?;
    timeline
        .overlapping(span)
        .filter(|(_, id)| Some(*id) != exclude)
        .find_map(|(_, id)| table.get(id))
}

pub(crate) fn overlaps(table: &BookingTable, scope: Scope, span: &Span) -> bool {
    find_overlap(table, scope, span, None).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Ms = 1_792_396_800_000;

    fn table_with(rows: &[(RoomId, UserId, Ms, Ms)]) -> (BookingTable, Vec<Ulid>) {
        let mut t = BookingTable::new();
        let mut ids = Vec::new();
        for &(room_id, user, start, end) in rows {
            let b = Booking {
                id: Ulid::new(),
                room_id,
                created_by: user,
                span: Span::new(start, end),
                purpose: String::new(),
                status: BookingStatus::Active,
                is_semester_booking: false,
                created_at: 1,
                updated_at: 1,
                cancelled_at: None,
            };
            ids.push(b.id);
            t.apply(&Event::BookingCreated(b));
        }
        (t, ids)
    }

    #[test]
    fn window_edges() {
        let at = |start: Ms| Span::new(start, start + HOUR_MS);
        assert!(check_booking_window(&at(NOW), false, NOW).is_ok());
        assert!(check_booking_window(&at(NOW + BOOKING_WINDOW_MS), false, NOW).is_ok());
        assert!(matches!(
            check_booking_window(&at(NOW + BOOKING_WINDOW_MS + 1), false, NOW),
            Err(EngineError::OutsideBookingWindow)
        ));
        assert!(check_booking_window(&at(NOW + BOOKING_WINDOW_MS + 1), true, NOW).is_ok());
        assert!(matches!(
            check_booking_window(&at(NOW - 1), true, NOW),
            Err(EngineError::BookingInPast)
        ));
    }

    #[test]
    fn touching_spans_do_not_overlap() {
        let (t, _) = table_with(&[(1, 7, 100, 200)]);
        assert!(!overlaps(&t, Scope::Room(1), &Span::new(200, 300)));
        assert!(!overlaps(&t, Scope::Room(1), &Span::new(0, 100)));
        assert!(overlaps(&t, Scope::Room(1), &Span::new(199, 300)));
        assert!(overlaps(&t, Scope::User(7), &Span::new(150, 160)));
        assert!(!overlaps(&t, Scope::Room(2), &Span::new(100, 200)));
    }

    #[test]
    fn find_overlap_skips_excluded_booking() {
        let (t, ids) = table_with(&[(1, 7, 100, 200), (1, 8, 200, 300)]);
        let span = Span::new(150, 250);
        assert!(find_overlap(&t, Scope::Room(1), &span, None).is_some());

        let other = find_overlap(&t, Scope::Room(1), &span, Some(ids[0])).unwrap();
        assert_eq!(other.id, ids[1]);
        assert!(find_overlap(&t, Scope::User(7), &span, Some(ids[0])).is_none());
    }

    #[test]
    fn cancelled_rows_never_conflict() {
        let (mut t, ids) = table_with(&[(1, 7, 100, 200)]);
        t.apply(&Event::BookingCancelled { id: ids[0], at: 50 });
        assert!(!overlaps(&t, Scope::Room(1), &Span::new(100, 200)));
        assert!(!overlaps(&t, Scope::User(7), &Span::new(100, 200)));
    }
}
