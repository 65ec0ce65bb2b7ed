use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_room(id: &str, base_price: f64) -> Result<(), EngineError> {
    if id.is_empty() || id.chars().any(char::is_control) {
        return Err(EngineError::InvalidRoomId(id.to_string()));
    }
    if id.len() > MAX_ROOM_ID_LEN {
        return Err(EngineError::LimitExceeded("room id too long"));
    }
    if !base_price.is_finite() || base_price < 0.0 {
        return Err(EngineError::InvalidPrice(base_price));
    }
    if base_price > MAX_BASE_PRICE {
        return Err(EngineError::LimitExceeded("base price too large"));
    }
    Ok(())
}

pub(crate) fn validate_stay(check_in: Ms, check_out: Ms) -> Result<Span, EngineError> {
    if check_in >= check_out {
        return Err(EngineError::InvalidStay {
            check_in,
            check_out,
        });
    }
    if check_in < MIN_VALID_TIMESTAMP_MS || check_out > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if check_out - check_in > MAX_STAY_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(Span::new(check_in, check_out))
}

pub(crate) fn validate_user(user_id: &str) -> Result<(), EngineError> {
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}
