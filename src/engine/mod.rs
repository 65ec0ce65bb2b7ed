mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;
mod validate;

pub use error::EngineError;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::demand::DemandService;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Reply<()> },
    Rewrite { events: Vec<Event>, response: Reply<()> },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Sole owner of the WAL. Appends already queued when the first one arrives
/// are buffered together and made durable by a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<(Event, Reply<()>)> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    pending.push((event, response));
                    next = rx.try_recv().ok();
                }
                control => {
                    // Earlier appends must land before a rewrite sees the file.
                    commit_batch(&mut wal, &mut pending);
                    run_control(&mut wal, control);
                }
            }
        }
        commit_batch(&mut wal, &mut pending);
    }
}

fn commit_batch(wal: &mut Wal, pending: &mut Vec<(Event, Reply<()>)>) {
    if pending.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    let started = std::time::Instant::now();

    let result = wal.append_batch(pending.iter().map(|(event, _)| event));

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in pending.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Booking workflow over rooms, bookings and the injected demand tracker.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    pub(super) demand: Arc<DemandService>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// event commits between its snapshot and the log swap.
    pub(super) compaction_gate: RwLock<()>,
    /// Serializes room creation so duplicate ids are caught before logging.
    pub(super) room_create_lock: Mutex<()>,
}

/// Apply an event to its room and the booking table (caller holds the room lock).
/// Demand is handled by the caller: live paths order it around the WAL append.
fn apply_to_room(rs: &mut RoomState, event: &Event, bookings: &DashMap<Ulid, Booking>) {
    match event {
        Event::BookingConfirmed(booking) => {
            rs.bookings += 1;
            bookings.insert(booking.id, booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            bookings.remove(id);
        }
        // Rooms are created at the map level
        Event::RoomCreated { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, rebuild demand from it, and start the
    /// background writer. Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path, demand: Arc<DemandService>) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            demand,
            wal_tx,
            compaction_gate: RwLock::new(()),
            room_create_lock: Mutex::new(()),
        };

        for event in &events {
            engine.replay_event(event);
        }
        info!(
            "replayed {} events: {} rooms, {} bookings, aggregate demand {}",
            events.len(),
            engine.rooms.len(),
            engine.bookings.len(),
            engine.demand.current_aggregate_demand()
        );

        Ok(engine)
    }

    // We own every Arc during replay, so try_write never contends. Blocking
    // lock calls are off limits here since open may run on a runtime thread.
    fn replay_event(&self, event: &Event) {
        if let Event::RoomCreated {
            id,
            base_price,
            bookings,
        } = event
        {
            let mut rs = RoomState::new(id.clone(), *base_price);
            rs.bookings = *bookings;
            self.rooms.insert(id.clone(), Arc::new(RwLock::new(rs)));
            return;
        }

        let Some(room) = self.get_room_state(event.room_id()) else {
            warn!("replay: event for unknown room {}", event.room_id());
            return;
        };
        let Ok(mut guard) = room.try_write() else {
            warn!("replay: room {} unexpectedly locked", event.room_id());
            return;
        };

        let delta = match event {
            Event::BookingConfirmed(_) => 1,
            Event::BookingCancelled { id, .. } if self.bookings.contains_key(id) => -1,
            _ => 0,
        };
        apply_to_room(&mut guard, event, &self.bookings);
        if delta != 0
            && let Err(e) = self.demand.record_demand_change(event.room_id(), delta)
        {
            warn!("replay: demand not restored for room {}: {e}", event.room_id());
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub(super) fn get_room_state(&self, id: &str) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn demand(&self) -> &Arc<DemandService> {
        &self.demand
    }
}
