//! Engine configuration.
//!
//! One explicit `EngineConfig` value is handed to `EngineBuilder`; nothing is
//! read from globals after construction. `from_env()` reads `SCOREFLOW_*`
//! variables (after loading `.env`), `from_lookup()` is the same parser over
//! an arbitrary key lookup so tests never touch the process environment.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "SCOREFLOW_";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Invalid { key: String, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("soft time limit ({soft}s) must be below hard time limit ({hard}s)")]
    LimitsOutOfOrder { soft: u64, hard: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Broker endpoint. Only `memory://` is built in.
    pub broker_url: String,

    /// Result store endpoint. Only `memory://` is built in.
    pub result_backend_url: String,

    /// Max unacknowledged deliveries per queue.
    pub prefetch: usize,

    pub retry_delay_secs: u64,
    pub max_attempts: u32,
    pub soft_time_limit_secs: u64,
    pub hard_time_limit_secs: u64,
    pub result_expiry_secs: u64,

    /// Extra time on top of the hard limit before a lease counts as abandoned.
    pub lease_grace_secs: u64,

    pub gc_interval_secs: u64,

    /// Periodic full rescore. 0 disables it.
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            broker_url: "memory://".to_string(),
            result_backend_url: "memory://".to_string(),
            prefetch: 1,
            retry_delay_secs: 60,
            max_attempts: 3,
            soft_time_limit_secs: 300,
            hard_time_limit_secs: 600,
            result_expiry_secs: 3600,
            lease_grace_secs: 30,
            gc_interval_secs: 300,
            sweep_interval_secs: 3600,
            sweep_batch_size: 100,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    let full = format!("{ENV_PREFIX}{key}");
    match lookup(&full).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: full,
            value: raw,
        }),
    }
}

impl EngineConfig {
    /// Build config from the environment (loads `.env` first) and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from any key lookup. Missing or empty keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            broker_url: parse_or(&lookup, "BROKER_URL", d.broker_url)?,
            result_backend_url: parse_or(&lookup, "RESULT_BACKEND_URL", d.result_backend_url)?,
            prefetch: parse_or(&lookup, "PREFETCH", d.prefetch)?,
            retry_delay_secs: parse_or(&lookup, "RETRY_DELAY_SECS", d.retry_delay_secs)?,
            max_attempts: parse_or(&lookup, "MAX_ATTEMPTS", d.max_attempts)?,
            soft_time_limit_secs: parse_or(&lookup, "SOFT_TIME_LIMIT_SECS", d.soft_time_limit_secs)?,
            hard_time_limit_secs: parse_or(&lookup, "HARD_TIME_LIMIT_SECS", d.hard_time_limit_secs)?,
            result_expiry_secs: parse_or(&lookup, "RESULT_EXPIRY_SECS", d.result_expiry_secs)?,
            lease_grace_secs: parse_or(&lookup, "LEASE_GRACE_SECS", d.lease_grace_secs)?,
            gc_interval_secs: parse_or(&lookup, "GC_INTERVAL_SECS", d.gc_interval_secs)?,
            sweep_interval_secs: parse_or(&lookup, "SWEEP_INTERVAL_SECS", d.sweep_interval_secs)?,
            sweep_batch_size: parse_or(&lookup, "SWEEP_BATCH_SIZE", d.sweep_batch_size)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefetch == 0 {
            return Err(ConfigError::Zero("prefetch"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.hard_time_limit_secs == 0 {
            return Err(ConfigError::Zero("hard_time_limit_secs"));
        }
        if self.result_expiry_secs == 0 {
            return Err(ConfigError::Zero("result_expiry_secs"));
        }
        if self.gc_interval_secs == 0 {
            return Err(ConfigError::Zero("gc_interval_secs"));
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Zero("sweep_batch_size"));
        }
        if self.soft_time_limit_secs >= self.hard_time_limit_secs {
            return Err(ConfigError::LimitsOutOfOrder {
                soft: self.soft_time_limit_secs,
                hard: self.hard_time_limit_secs,
            });
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    pub fn result_expiry(&self) -> Duration {
        Duration::from_secs(self.result_expiry_secs)
    }

    /// Age after which an unacknowledged lease is handed back to its queue.
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs + self.lease_grace_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
