use ulid::Ulid;

use crate::demand::{PriceQuote, SlotKey};
use crate::model::*;

use super::{Engine, EngineError};

/// Numeric ids in numeric order, then everything else lexically.
fn room_order(id: &str) -> (bool, usize, &str) {
    let numeric = !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit());
    if numeric {
        (false, id.trim_start_matches('0').len(), id)
    } else {
        (true, 0, id)
    }
}

impl Engine {
    pub async fn get_room(&self, id: &str) -> Option<RoomState> {
        let room = self.get_room_state(id)?;
        let guard = room.read().await;
        Some(guard.clone())
    }

    pub async fn list_rooms(&self) -> Vec<RoomState> {
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            out.push(room.read().await.clone());
        }
        out.sort_by(|a, b| room_order(&a.id).cmp(&room_order(&b.id)));
        out
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Live bookings in creation order, optionally only those of `user_id`.
    pub fn list_bookings(&self, user_id: Option<&str>) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| user_id.is_none_or(|u| e.value().user_id == u))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| b.id);
        out
    }

    /// Price a room would book at right now, without recording demand.
    pub async fn quote_room(&self, room_id: &str) -> Result<PriceQuote, EngineError> {
        let room = self
            .get_room(room_id)
            .await
            .ok_or_else(|| EngineError::RoomNotFound(room_id.to_string()))?;
        room_id.to_slot(self.demand.capacity())?;
        Ok(self.demand.quote(room.base_price))
    }
}
