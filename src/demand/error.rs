#[derive(Debug, Clone, PartialEq)]
pub enum DemandError {
    InvalidCapacity(usize),
    IndexOutOfRange { index: usize, capacity: usize },
    /// The key has no slot in `[0, capacity)`.
    KeyMapping { key: String, capacity: usize },
    InvalidCoefficient(f64),
}

impl std::fmt::Display for DemandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemandError::InvalidCapacity(cap) => {
                write!(f, "invalid index capacity {cap}: must be positive")
            }
            DemandError::IndexOutOfRange { index, capacity } => {
                write!(f, "slot {index} out of range [0, {capacity})")
            }
            DemandError::KeyMapping { key, capacity } => {
                write!(
                    f,
                    "room not recognized for pricing: {key:?} does not map into [0, {capacity})"
                )
            }
            DemandError::InvalidCoefficient(c) => {
                write!(f, "pricing coefficient must be finite, got {c}")
            }
        }
    }
}

impl std::error::Error for DemandError {}
