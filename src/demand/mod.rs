mod error;
mod index;
mod pricing;

pub use error::DemandError;
pub use index::AggregateIndex;
pub use pricing::{PriceQuote, PricingConfig, DEFAULT_PRICING_COEFFICIENT};

use parking_lot::Mutex;

pub const DEFAULT_DEMAND_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandConfig {
    /// Number of slots; must exceed the largest room id that should be priced.
    pub capacity: usize,
    pub pricing: PricingConfig,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DEMAND_CAPACITY,
            pricing: PricingConfig::default(),
        }
    }
}

/// Maps an external identifier to a slot of the index.
///
/// Mappings must be deterministic and injective within `capacity`.
pub trait SlotKey {
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError>;
}

impl SlotKey for str {
    /// Canonical decimal only: `"7"` maps to slot 7, while `"07"`, `"+7"`,
    /// `" 7"` and `"abc"` are rejected so no two strings share a slot.
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError> {
        let mapping_err = || DemandError::KeyMapping {
            key: self.to_string(),
            capacity,
        };
        let canonical = !self.is_empty()
            && self.bytes().all(|b| b.is_ascii_digit())
            && (self == "0" || !self.starts_with('0'));
        if !canonical {
            return Err(mapping_err());
        }
        let slot: usize = self.parse().map_err(|_| mapping_err())?;
        if slot >= capacity {
            return Err(mapping_err());
        }
        Ok(slot)
    }
}

impl SlotKey for String {
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError> {
        self.as_str().to_slot(capacity)
    }
}

impl SlotKey for usize {
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError> {
        if *self >= capacity {
            return Err(DemandError::KeyMapping {
                key: self.to_string(),
                capacity,
            });
        }
        Ok(*self)
    }
}

impl SlotKey for u32 {
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError> {
        (*self as usize).to_slot(capacity)
    }
}

impl SlotKey for i64 {
    fn to_slot(&self, capacity: usize) -> Result<usize, DemandError> {
        usize::try_from(*self)
            .map_err(|_| DemandError::KeyMapping {
                key: self.to_string(),
                capacity,
            })?
            .to_slot(capacity)
    }
}

/// Thread-safe demand tracker: one aggregate index behind one lock.
///
/// Every operation is a short, non-suspending critical section, so a plain
/// mutex is used even from async callers.
pub struct DemandService {
    index: Mutex<AggregateIndex>,
    pricing: PricingConfig,
}

impl DemandService {
    pub fn new(config: &DemandConfig) -> Result<Self, DemandError> {
        config.pricing.validate()?;
        Ok(Self {
            index: Mutex::new(AggregateIndex::new(config.capacity)?),
            pricing: config.pricing,
        })
    }

    pub fn capacity(&self) -> usize {
        self.index.lock().capacity()
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Apply `delta` to the slot `key` maps to.
    pub fn record_demand_change<K: SlotKey + ?Sized>(
        &self,
        key: &K,
        delta: i64,
    ) -> Result<(), DemandError> {
        let mut index = self.index.lock();
        let slot = key.to_slot(index.capacity())?;
        index.update(slot, delta)?;
        metrics::gauge!(crate::observability::AGGREGATE_DEMAND).set(index.total() as f64);
        Ok(())
    }

    pub fn current_aggregate_demand(&self) -> i64 {
        let index = self.index.lock();
        index.query(0, index.capacity() as i64 - 1)
    }

    pub fn demand_in_range(&self, lo: i64, hi: i64) -> i64 {
        self.index.lock().query(lo, hi)
    }

    pub fn price_for(&self, base_price: f64) -> f64 {
        self.quote(base_price).price
    }

    pub fn quote(&self, base_price: f64) -> PriceQuote {
        self.pricing.quote(base_price, self.current_aggregate_demand())
    }

    /// Apply `delta` and price against the resulting aggregate under a single
    /// lock acquisition. The quote always includes this caller's update, and
    /// two concurrent recorders never price against the same aggregate.
    pub fn record_and_quote<K: SlotKey + ?Sized>(
        &self,
        key: &K,
        delta: i64,
        base_price: f64,
    ) -> Result<PriceQuote, DemandError> {
        let mut index = self.index.lock();
        let slot = key.to_slot(index.capacity())?;
        index.update(slot, delta)?;
        let demand = index.total();
        drop(index);
        metrics::gauge!(crate::observability::AGGREGATE_DEMAND).set(demand as f64);
        Ok(self.pricing.quote(base_price, demand))
    }
}
