mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
pub mod store;

pub use availability::{
    Proposal, free_slots, merge_overlapping, propose_alternative, subtract_intervals,
};
pub use conflict::{Admission, check_admission};
pub use error::EngineError;

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending {
                    handle_command(&mut wal, other);
                }
            }
            other => handle_command(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::warn!("WAL flush of {} events failed: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared across append+apply; compaction takes it
    /// exclusively so its snapshot cannot miss an in-flight event.
    pub(super) wal_gate: RwLock<()>,
}

/// Apply an event directly to a RoomState (no locking; caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_map: &DashMap<Ulid, Ulid>, now: Ms) {
    match event {
        Event::BookingAdmitted { booking } => {
            booking_map.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
            rs.refresh_active(now);
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            booking_map.remove(id);
            rs.refresh_active(now);
        }
        Event::RoomUpdated { name, capacity, .. } => {
            rs.room.name = name.clone();
            rs.room.capacity = *capacity;
        }
        // RoomCreated/Deleted are handled at the DashMap level, not here
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called from inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_room: DashMap::new(),
            wal_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this runs inside an async context.
        let now = now_ms();
        for event in &events {
            match event {
                Event::RoomCreated {
                    id,
                    name,
                    capacity,
                    created_by,
                } => {
                    let rs = RoomState::new(*id, name.clone(), *capacity, created_by.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    let Some(room_id) = event_room_id(other) else {
                        continue;
                    };
                    let Some(rs) = engine.get_room_state(&room_id) else {
                        continue;
                    };
                    if let Ok(mut guard) = rs.try_write() {
                        apply_to_room(&mut guard, other, &engine.booking_to_room, now);
                    }
                }
            }
        }

        info!(
            "replayed {} events from {}: {} rooms, {} bookings",
            events.len(),
            wal_path.display(),
            engine.state.len(),
            engine.booking_to_room.len()
        );
        Ok(engine)
    }

    /// Create the data directory, replay `rooms.wal`, and spawn the
    /// activity sweeper and WAL compactor.
    pub fn open(config: &Config) -> io::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let engine = Arc::new(Self::new(config.wal_path())?);
        crate::sweeper::spawn(&engine, config);
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Snapshot of every room handle, so no DashMap guard is held across an await.
    pub(super) fn room_handles(&self) -> Vec<SharedRoomState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room, now_ms());
        Ok(())
    }

    /// Acquire the write lock of a room that is still registered.
    ///
    /// A room deleted while we waited for its lock reports `NotFound`, so
    /// nothing is ever admitted into an orphaned state.
    pub(super) async fn write_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.clone().write_owned().await;
        match self.get_room_state(&room_id) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(EngineError::NotFound(room_id)),
        }
    }

    /// Claim `booking_id` for `room_id` in the reverse index. The caller
    /// holds the room's write lock and must `release_booking_id` if the
    /// booking is not persisted after all.
    pub(super) fn reserve_booking_id(
        &self,
        booking_id: Ulid,
        room_id: Ulid,
    ) -> Result<(), EngineError> {
        match self.booking_to_room.entry(booking_id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(booking_id)),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                Ok(())
            }
        }
    }

    pub(super) fn release_booking_id(&self, booking_id: &Ulid) {
        self.booking_to_room.remove(booking_id);
    }

    /// Persist and apply a booking whose id is not reserved yet.
    pub(super) async fn commit_booking(
        &self,
        rs: &mut RoomState,
        booking: Booking,
    ) -> Result<(), EngineError> {
        self.reserve_booking_id(booking.id, booking.room_id)?;
        let id = booking.id;
        let event = Event::BookingAdmitted { booking };
        if let Err(e) = self.persist_and_apply(rs, &event).await {
            self.release_booking_id(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.write_room(room_id).await?;
        Ok((room_id, guard))
    }
}

/// Extract the room id from an event (for non-Create/Delete events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingAdmitted { booking } => Some(booking.room_id),
        Event::BookingCancelled { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => None,
    }
}
