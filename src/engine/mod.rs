mod admission;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod semester;
mod store;
mod txn;

pub use admission::BookingRequest;
pub use conflict::Scope;
pub use error::{Conflict, EngineError, ErrorClass};
pub use lifecycle::{CancelOutcome, RescheduleRequest};
pub use queries::{BookingFilter, RoomFilter};
pub use semester::{SemesterRequest, SemesterSummary};
pub use store::BookingTable;
pub use txn::Transaction;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::directory::Directory;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches commits for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch: Vec<PendingAppend> = vec![(events, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (events, _) in batch {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Owns the Booking table, its WAL and the read-only directory.
pub struct Engine {
    table: Arc<RwLock<BookingTable>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub directory: Arc<Directory>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, directory: Arc<Directory>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut table = BookingTable::new();
        for event in &events {
            table.apply(event);
        }
        tracing::info!(
            bookings = table.len(),
            history = table.history_len(),
            "replayed {} events from {}",
            events.len(),
            wal_path.display()
        );

        Ok(Self {
            table: Arc::new(RwLock::new(table)),
            wal_tx,
            directory,
        })
    }

    /// Open a transaction. Waits for any transaction in flight to finish.
    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.table.clone().write_owned().await;
        Transaction::new(guard, &self.wal_tx)
    }

    pub(crate) fn room_exists(&self, room_id: RoomId) -> Result<(), EngineError> {
        self.directory
            .room(room_id)
            .map(|_| ())
            .ok_or(EngineError::RoomNotFound(room_id))
    }

    /// Compact the WAL down to one snapshot record of the current table.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held until the swap completes so no commit lands between snapshot and swap.
        let table = self.table.read().await;
        let events = table.snapshot_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(table);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
