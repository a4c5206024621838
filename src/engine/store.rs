use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::conflict::Scope;

/// The Booking table: every row ever written plus per-room and per-user
/// timelines holding only ACTIVE rows.
#[derive(Debug, Default)]
pub struct BookingTable {
    bookings: HashMap<Ulid, Booking>,
    by_room: HashMap<RoomId, Timeline>,
    by_user: HashMap<UserId, Timeline>,
    history: Vec<BookingHistory>,
}

impl BookingTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Rows ─────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    pub fn timeline(&self, scope: Scope) -> Option<&Timeline> {
        match scope {
            Scope::Room(id) => self.by_room.get(&id),
            Scope::User(id) => self.by_user.get(&id),
        }
    }

    pub fn history_for(&self, booking_id: &Ulid) -> impl Iterator<Item = &BookingHistory> {
        self.history.iter().filter(move |h| h.booking_id == *booking_id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    // ── Timeline index ───────────────────────────────────────

    fn index(&mut self, booking: &Booking) {
        if !booking.is_active() {
            return;
        }
        self.by_room
            .entry(booking.room_id)
            .or_default()
            .insert(booking.span, booking.id);
        self.by_user
            .entry(booking.created_by)
            .or_default()
            .insert(booking.span, booking.id);
    }

    fn unindex(&mut self, id: Ulid, room_id: RoomId, user_id: UserId) {
        if let Some(t) = self.by_room.get_mut(&room_id) {
            t.remove(id);
            if t.is_empty() {
                self.by_room.remove(&room_id);
            }
        }
        if let Some(t) = self.by_user.get_mut(&user_id) {
            t.remove(id);
            if t.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
    }

    // ── Event application ────────────────────────────────────

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingCreated(booking) => {
                self.index(booking);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingCancelled { id, at } => {
                let Some(b) = self.bookings.get_mut(id) else { return };
                if !b.is_active() {
                    return;
                }
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*at);
                b.updated_at = *at;
                let (room_id, user_id) = (b.room_id, b.created_by);
                self.unindex(*id, room_id, user_id);
            }
            Event::BookingRescheduled {
                id,
                room_id,
                span,
                at,
            } => {
                let Some(b) = self.bookings.get_mut(id) else { return };
                let (old_room, user_id) = (b.room_id, b.created_by);
                b.room_id = *room_id;
                b.span = *span;
                b.updated_at = *at;
                let updated = b.clone();
                self.unindex(*id, old_room, user_id);
                self.index(&updated);
            }
            Event::HistoryRecorded(h) => self.history.push(h.clone()),
        }
    }

    // ── Undo support ─────────────────────────────────────────

    pub(super) fn remove_booking(&mut self, id: &Ulid) {
        if let Some(b) = self.bookings.remove(id) {
            self.unindex(b.id, b.room_id, b.created_by);
        }
    }

    pub(super) fn restore_booking(&mut self, previous: Booking) {
        if let Some(current) = self.bookings.get(&previous.id) {
            let (id, room_id, user_id) = (current.id, current.room_id, current.created_by);
            self.unindex(id, room_id, user_id);
        }
        self.index(&previous);
        self.bookings.insert(previous.id, previous);
    }

    pub(super) fn remove_history(&mut self, id: &Ulid) {
        if let Some(pos) = self.history.iter().rposition(|h| h.id == *id) {
            self.history.remove(pos);
        }
    }

    /// Minimal event list that recreates the current table.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut rows: Vec<&Booking> = self.bookings.values().collect();
        rows.sort_by_key(|b| (b.created_at, b.id));
        let mut events: Vec<Event> = rows
            .into_iter()
            .map(|b| Event::BookingCreated(b.clone()))
            .collect();
        events.extend(self.history.iter().cloned().map(Event::HistoryRecorded));
        events
    }
}
