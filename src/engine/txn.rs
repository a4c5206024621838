use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{self, Scope};
use super::store::BookingTable;
use super::{EngineError, WalCommand};

enum Undo {
    Remove(Ulid),
    Restore(Booking),
    RemoveHistory(Ulid),
}

/// Exclusive, scoped handle on the Booking table.
///
/// Holding the table's write lock for the whole lifetime serializes every
/// check-then-write sequence. Writes are applied immediately so later checks
/// in the same transaction see them, and each write records an undo step.
/// `commit` appends all events as one WAL record before the lock is
/// released. Dropping an uncommitted transaction rolls it back.
pub struct Transaction<'e> {
    table: OwnedRwLockWriteGuard<BookingTable>,
    wal_tx: &'e mpsc::Sender<WalCommand>,
    events: Vec<Event>,
    undo: Vec<Undo>,
    /// Set once the record is handed to the WAL writer; after that the
    /// outcome belongs to the writer and Drop must not undo.
    handed_off: bool,
    finished: bool,
}

impl<'e> Transaction<'e> {
    pub(super) fn new(
        table: OwnedRwLockWriteGuard<BookingTable>,
        wal_tx: &'e mpsc::Sender<WalCommand>,
    ) -> Self {
        Self {
            table,
            wal_tx,
            events: Vec::new(),
            undo: Vec::new(),
            handed_off: false,
            finished: false,
        }
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.table.get(id)
    }

    pub fn overlaps(&self, scope: Scope, span: &Span) -> bool {
        conflict::overlaps(&self.table, scope, span)
    }

    pub fn find_overlap(&self, scope: Scope, span: &Span, exclude: Option<Ulid>) -> Option<&Booking> {
        conflict::find_overlap(&self.table, scope, span, exclude)
    }

    /// Number of writes staged so far.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    // ── Writes ───────────────────────────────────────────────

    fn apply(&mut self, event: Event) {
        self.table.apply(&event);
        self.events.push(event);
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        self.undo.push(Undo::Remove(booking.id));
        self.apply(Event::BookingCreated(booking));
    }

    pub fn cancel_booking(&mut self, id: Ulid, at: Ms) -> Result<(), EngineError> {
        let previous = self.table.get(&id).cloned().ok_or(EngineError::BookingNotFound(id))?;
        self.undo.push(Undo::Restore(previous));
        self.apply(Event::BookingCancelled { id, at });
        Ok(())
    }

    pub fn reschedule_booking(
        &mut self,
        id: Ulid,
        room_id: RoomId,
        span: Span,
        at: Ms,
    ) -> Result<Booking, EngineError> {
        let previous = self.table.get(&id).cloned().ok_or(EngineError::BookingNotFound(id))?;
        self.undo.push(Undo::Restore(previous));
        self.apply(Event::BookingRescheduled { id, room_id, span, at });
        self.table.get(&id).cloned().ok_or(EngineError::BookingNotFound(id))
    }

    pub fn record_history(&mut self, entry: BookingHistory) {
        self.undo.push(Undo::RemoveHistory(entry.id));
        self.apply(Event::HistoryRecorded(entry));
    }

    // ── Outcome ──────────────────────────────────────────────

    /// Durably append the staged writes, then release the lock.
    pub async fn commit(mut self) -> Result<(), EngineError> {
        if self.events.is_empty() {
            self.finished = true;
            return Ok(());
        }
        let events = std::mem::take(&mut self.events);
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .is_err()
        {
            self.undo_all();
            return Err(EngineError::WalError("WAL writer shut down".into()));
        }
        self.handed_off = true;

        let result = match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::WalError(e.to_string())),
            Err(_) => Err(EngineError::WalError("WAL writer dropped response".into())),
        };
        // A failed fsync may still leave this record's bytes in the WAL file,
        // so a later replay can restore rows undone here. Callers only see
        // the WAL error; the file is not truncated back.
        if result.is_err() {
            self.undo_all();
        }
        self.finished = true;
        result
    }

    pub fn rollback(mut self) {
        self.undo_all();
    }

    fn undo_all(&mut self) {
        if !self.undo.is_empty() {
            metrics::counter!(crate::observability::TXN_ROLLBACKS_TOTAL).increment(1);
            tracing::debug!(writes = self.undo.len(), "rolling back transaction");
        }
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Remove(id) => self.table.remove_booking(&id),
                Undo::Restore(previous) => self.table.restore_booking(previous),
                Undo::RemoveHistory(id) => self.table.remove_history(&id),
            }
        }
        self.events.clear();
        self.finished = true;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.handed_off {
            self.undo_all();
        }
    }
}
