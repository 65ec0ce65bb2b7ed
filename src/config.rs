use std::fmt::{Debug, Display};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use crate::demand::{DemandConfig, PricingConfig, DEFAULT_DEMAND_CAPACITY, DEFAULT_PRICING_COEFFICIENT};
use crate::limits::MAX_DEMAND_CAPACITY;

/// Runtime settings, read once at startup from `ROOMRATE_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name allowed to list everyone's bookings and cancel them.
    pub admin_user: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub seed_rooms: bool,
    pub demand: DemandConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "invalid {key}={value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults, malformed
    /// values are errors rather than silently defaulted.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let capacity: usize = vars.or("ROOMRATE_DEMAND_CAPACITY", DEFAULT_DEMAND_CAPACITY)?;
        if capacity == 0 || capacity > MAX_DEMAND_CAPACITY {
            return Err(ConfigError::Invalid {
                key: "ROOMRATE_DEMAND_CAPACITY",
                value: capacity.to_string(),
                reason: format!("must be in 1..={MAX_DEMAND_CAPACITY}"),
            });
        }
        let coefficient: f64 =
            vars.or("ROOMRATE_PRICING_COEFFICIENT", DEFAULT_PRICING_COEFFICIENT)?;
        if !coefficient.is_finite() {
            return Err(ConfigError::Invalid {
                key: "ROOMRATE_PRICING_COEFFICIENT",
                value: coefficient.to_string(),
                reason: "must be finite".into(),
            });
        }

        let config = Self {
            bind: vars.or("ROOMRATE_BIND", "0.0.0.0".to_string())?,
            port: vars.or("ROOMRATE_PORT", 5433)?,
            data_dir: vars.or("ROOMRATE_DATA_DIR", PathBuf::from("./data"))?,
            password: vars.or("ROOMRATE_PASSWORD", "roomrate".to_string())?,
            admin_user: vars.or("ROOMRATE_ADMIN_USER", "admin".to_string())?,
            max_connections: vars.or("ROOMRATE_MAX_CONNECTIONS", 256)?,
            compact_threshold: vars.or("ROOMRATE_COMPACT_THRESHOLD", 1000)?,
            metrics_port: vars.opt("ROOMRATE_METRICS_PORT")?,
            tls_cert: vars.opt("ROOMRATE_TLS_CERT")?,
            tls_key: vars.opt("ROOMRATE_TLS_KEY")?,
            seed_rooms: vars.or("ROOMRATE_SEED_ROOMS", false)?,
            demand: DemandConfig {
                capacity,
                pricing: PricingConfig {
                    coefficient,
                    floor: vars.opt("ROOMRATE_PRICE_FLOOR")?,
                },
            },
        };
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomrate.wal")
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn opt<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T::Err: Display,
    {
        let Some(raw) = (self.0)(key) else {
            return Ok(None);
        };
        raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn or<T: FromStr + Debug>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        match self.opt(key)? {
            Some(v) => Ok(v),
            None => {
                info!("{key} not set, using default: {default:?}");
                Ok(default)
            }
        }
    }
}
