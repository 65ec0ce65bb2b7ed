use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{validate_room, validate_stay, validate_user};
use super::{apply_to_room, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(&self, id: RoomId, base_price: f64) -> Result<(), EngineError> {
        self.create_rooms(vec![(id, base_price)]).await.map(|_| ())
    }

    /// Create several rooms. Every row is validated before anything is logged,
    /// so a bad row rejects the whole batch.
    pub async fn create_rooms(&self, rooms: Vec<(RoomId, f64)>) -> Result<usize, EngineError> {
        if rooms.len() > MAX_ROOMS_PER_INSERT {
            return Err(EngineError::LimitExceeded("too many rooms in one insert"));
        }
        let _gate = self.compaction_gate.read().await;
        let _create = self.room_create_lock.lock().await;

        if self.rooms.len() + rooms.len() > MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let mut batch_ids = HashSet::new();
        for (id, base_price) in &rooms {
            validate_room(id, *base_price)?;
            if self.rooms.contains_key(id.as_str()) || !batch_ids.insert(id.as_str()) {
                return Err(EngineError::RoomExists(id.clone()));
            }
        }

        for (id, base_price) in &rooms {
            self.insert_room(id.clone(), *base_price).await?;
        }
        Ok(rooms.len())
    }

    /// Seed the default rooms, skipping any that already exist.
    /// Returns how many were inserted.
    pub async fn seed_default_rooms(&self) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let _create = self.room_create_lock.lock().await;

        let mut inserted = 0;
        for (id, base_price) in DEFAULT_ROOMS {
            if self.rooms.contains_key(*id) {
                continue;
            }
            self.insert_room(id.to_string(), *base_price).await?;
            inserted += 1;
        }
        info!("seeded {inserted} default rooms");
        Ok(inserted)
    }

    /// Caller holds the compaction gate and the room-create lock.
    async fn insert_room(&self, id: RoomId, base_price: f64) -> Result<(), EngineError> {
        let event = Event::RoomCreated {
            id: id.clone(),
            base_price,
            bookings: 0,
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id.clone(), base_price);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    /// Book a room at the current dynamic price.
    ///
    /// Demand is bumped before the price is read and before the booking is
    /// logged, so the stored price always accounts for this booking. A room
    /// whose id has no demand slot is refused before anything is written.
    pub async fn book_room(
        &self,
        id: Ulid,
        user_id: &str,
        room_id: &str,
        check_in: Ms,
        check_out: Ms,
    ) -> Result<Booking, EngineError> {
        validate_user(user_id)?;
        let stay = validate_stay(check_in, check_out)?;
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let _gate = self.compaction_gate.read().await;
        let room = self
            .get_room_state(room_id)
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))?;
        let mut rs = room.write().await;
        if self.bookings.contains_key(&id) {
            return Err(EngineError::BookingExists(id));
        }

        let quote = self.demand.record_and_quote(room_id, 1, rs.base_price)?;
        let booking = Booking {
            id,
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            stay,
            price: quote.price,
        };
        let event = Event::BookingConfirmed(booking.clone());

        if let Err(e) = self.wal_append(&event).await {
            if let Err(revert) = self.demand.record_demand_change(room_id, -1) {
                warn!("demand for room {room_id} not reverted after failed booking: {revert}");
            }
            return Err(e);
        }
        apply_to_room(&mut rs, &event, &self.bookings);

        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        metrics::histogram!(crate::observability::QUOTED_PRICE).record(quote.price);
        info!(
            "booked room {room_id} for {user_id} at {:.2} (demand {})",
            quote.price, quote.demand
        );
        Ok(booking)
    }

    /// Cancel a booking and release its demand. The stored price is left as is.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let room_id = self
            .bookings
            .get(&id)
            .map(|b| b.room_id.clone())
            .ok_or(EngineError::BookingNotFound(id))?;
        let room = self
            .get_room_state(&room_id)
            .ok_or_else(|| EngineError::RoomNotFound(room_id.clone()))?;
        let mut rs = room.write().await;

        // A concurrent cancel may have won while we waited for the lock.
        let booking = self
            .bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::BookingNotFound(id))?;

        let event = Event::BookingCancelled {
            id,
            room_id: room_id.clone(),
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut rs, &event, &self.bookings);

        if let Err(e) = self.demand.record_demand_change(room_id.as_str(), -1) {
            warn!("demand for room {room_id} not released on cancel of {id}: {e}");
        }
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL).increment(1);
        info!("cancelled booking {id} on room {room_id}");
        Ok(booking)
    }

    pub async fn appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Rewrite the WAL as the smallest event set that rebuilds current state:
    /// each room, then every live booking. Returns the number of events kept.
    pub async fn compact(&self) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut live_per_room: HashMap<RoomId, u64> = HashMap::new();
        let mut live: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        live.sort_by_key(|b| b.id);
        for b in &live {
            *live_per_room.entry(b.room_id.clone()).or_default() += 1;
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(rooms.len() + live.len());
        for room in rooms {
            let rs = room.read().await;
            let replayed = live_per_room.get(&rs.id).copied().unwrap_or(0);
            events.push(Event::RoomCreated {
                id: rs.id.clone(),
                base_price: rs.base_price,
                // Replaying the live bookings adds `replayed` back.
                bookings: rs.bookings.saturating_sub(replayed),
            });
        }
        events.extend(live.into_iter().map(Event::BookingConfirmed));

        let kept = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(kept)
    }
}
