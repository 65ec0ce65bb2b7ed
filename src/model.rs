use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// External room identifier. Numeric ids double as demand slots.
pub type RoomId = String;

/// Half-open stay `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub id: RoomId,
    pub base_price: f64,
    /// Bookings ever made on this room. Cancellation does not decrement it.
    pub bookings: u64,
}

impl RoomState {
    pub fn new(id: RoomId, base_price: f64) -> Self {
        Self {
            id,
            base_price,
            bookings: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: String,
    pub room_id: RoomId,
    pub stay: Span,
    /// Price quoted when the booking was made; never repriced.
    pub price: f64,
}

/// Everything that changes state goes through the log as one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        base_price: f64,
        /// Non-zero only in compacted logs, where it carries the part of the
        /// counter not accounted for by replayed live bookings.
        bookings: u64,
    },
    BookingConfirmed(Booking),
    BookingCancelled {
        id: Ulid,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> &str {
        match self {
            Event::RoomCreated { id, .. } => id,
            Event::BookingConfirmed(b) => &b.room_id,
            Event::BookingCancelled { room_id, .. } => room_id,
        }
    }
}

/// Default rooms inserted by `CALL setup_rooms()`.
pub const DEFAULT_ROOMS: &[(&str, f64)] = &[("1", 100.0), ("2", 120.0)];
