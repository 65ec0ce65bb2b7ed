use super::DemandError;

pub const DEFAULT_PRICING_COEFFICIENT: f64 = 0.1;

/// How aggregate demand turns into a price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingConfig {
    /// Fractional markup per unit of aggregate demand.
    pub coefficient: f64,
    /// Lower bound on quoted prices. `None` leaves prices unclamped, so heavy
    /// over-cancellation can push a quote below base price or below zero.
    pub floor: Option<f64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            coefficient: DEFAULT_PRICING_COEFFICIENT,
            floor: None,
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), DemandError> {
        if !self.coefficient.is_finite() {
            return Err(DemandError::InvalidCoefficient(self.coefficient));
        }
        Ok(())
    }

    pub fn multiplier(&self, demand: i64) -> f64 {
        1.0 + demand as f64 * self.coefficient
    }

    pub fn quote(&self, base_price: f64, demand: i64) -> PriceQuote {
        let multiplier = self.multiplier(demand);
        let mut price = base_price * multiplier;
        if let Some(floor) = self.floor {
            price = price.max(floor);
        }
        PriceQuote {
            base_price,
            demand,
            multiplier,
            price,
        }
    }
}

/// A price computed against one observed aggregate demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub base_price: f64,
    pub demand: i64,
    pub multiplier: f64,
    pub price: f64,
}
