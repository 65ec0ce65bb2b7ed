use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_ID_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_BOOKINGS: usize = 1_000_000;
pub const MAX_ROOMS_PER_INSERT: usize = 1_000;
pub const MAX_BASE_PRICE: f64 = 1_000_000_000.0;

/// Upper bound for the demand index; a tree this size is still a few MB.
pub const MAX_DEMAND_CAPACITY: usize = 1 << 20;

pub const MAX_STAY_MS: Ms = 366 * 24 * 3_600_000;
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
