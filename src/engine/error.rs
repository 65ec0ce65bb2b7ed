use ulid::Ulid;

use crate::demand::DemandError;
use crate::model::{Ms, RoomId};

#[derive(Debug)]
pub enum EngineError {
    RoomNotFound(RoomId),
    BookingNotFound(Ulid),
    RoomExists(RoomId),
    BookingExists(Ulid),
    InvalidRoomId(String),
    InvalidPrice(f64),
    InvalidStay { check_in: Ms, check_out: Ms },
    Demand(DemandError),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::RoomExists(id) => write!(f, "room already exists: {id}"),
            EngineError::BookingExists(id) => write!(f, "booking already exists: {id}"),
            EngineError::InvalidRoomId(id) => write!(f, "invalid room id: {id:?}"),
            EngineError::InvalidPrice(p) => {
                write!(f, "invalid base price {p}: must be finite and non-negative")
            }
            EngineError::InvalidStay {
                check_in,
                check_out,
            } => write!(
                f,
                "invalid stay [{check_in}, {check_out}): check-out must follow check-in"
            ),
            EngineError::Demand(e) => write!(f, "{e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Demand(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DemandError> for EngineError {
    fn from(e: DemandError) -> Self {
        EngineError::Demand(e)
    }
}
