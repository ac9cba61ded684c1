//! Configuration for time stores, query stores and the engine.
//!
//! All types deserialize from JSON (and TOML with the `toml` feature) with
//! every field optional.
//!
//! ```rust
//! use tempora::Config;
//!
//! let json = r#"{
//!     "store": { "period_secs": 120, "limit": 500 },
//!     "query": { "interval_secs": 30 }
//! }"#;
//! let config = Config::from_json_str(json).unwrap();
//! assert_eq!(config.store.limit, 500);
//! assert_eq!(config.query.limit, 1000);
//! ```
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemporaError};

/// Interval value meaning "run on every call over the whole store".
pub const ON_DEMAND: i64 = -1;

/// Bounds applied by a [`TimeStore`](crate::TimeStore) on every push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum age span between newest and oldest entry, in seconds
    #[serde(default = "StoreConfig::default_period_secs")]
    pub period_secs: u64,

    /// Maximum number of entries
    #[serde(default = "StoreConfig::default_limit")]
    pub limit: usize,
}

impl StoreConfig {
    const fn default_period_secs() -> u64 {
        60
    }

    const fn default_limit() -> usize {
        1000
    }

    pub fn with_period_secs(mut self, period_secs: u64) -> Self {
        self.period_secs = period_secs;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "Store limit must be greater than zero");
        self.limit = limit;
        self
    }

    /// Age bound in milliseconds.
    pub fn period_ms(&self) -> i64 {
        i64::try_from(self.period_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(TemporaError::Config(
                "Store limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            period_secs: Self::default_period_secs(),
            limit: Self::default_limit(),
        }
    }
}

/// Schedule and buffer bound of a [`QueryStore`](crate::QueryStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Refresh interval and window length in seconds, or [`ON_DEMAND`]
    #[serde(default = "QueryConfig::default_interval_secs")]
    pub interval_secs: i64,

    /// Maximum number of buffered results
    #[serde(default = "QueryConfig::default_limit")]
    pub limit: usize,
}

impl QueryConfig {
    const fn default_interval_secs() -> i64 {
        ON_DEMAND
    }

    const fn default_limit() -> usize {
        1000
    }

    pub fn with_interval_secs(mut self, interval_secs: i64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn is_periodic(&self) -> bool {
        self.interval_secs > 0
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_secs.saturating_mul(1000)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs != ON_DEMAND && self.interval_secs < 1 {
            return Err(TemporaError::value(format!(
                "interval must be -1 or at least 1, got {}",
                self.interval_secs
            )));
        }
        if self.limit == 0 {
            return Err(TemporaError::value("query limit must be at least 1"));
        }
        Ok(())
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            limit: Self::default_limit(),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Defaults for stores created without explicit bounds
    #[serde(default)]
    pub store: StoreConfig,

    /// Defaults for queries created without explicit schedule or bound
    #[serde(default)]
    pub query: QueryConfig,

    /// Upper cap on any store or query limit (None means uncapped)
    #[serde(default)]
    pub max_limit: Option<usize>,
}

impl Config {
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        assert!(max_limit > 0, "Max limit must be greater than zero");
        if max_limit > 1_000_000 {
            log::warn!(
                "Max limit of {} is very large; every buffered entry keeps its full record",
                max_limit
            );
        }
        self.max_limit = Some(max_limit);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| TemporaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.query
            .validate()
            .map_err(|e| TemporaError::Config(e.to_string()))?;
        if self.max_limit == Some(0) {
            return Err(TemporaError::Config(
                "Max limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Checks a requested limit against `max_limit`.
    pub(crate) fn check_limit(&self, limit: usize) -> Result<()> {
        match self.max_limit {
            Some(max) if limit > max => Err(TemporaError::value(format!(
                "limit {} exceeds configured maximum {}",
                limit, max
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.period_secs, 60);
        assert_eq!(config.store.limit, 1000);
        assert_eq!(config.store.period_ms(), 60_000);
        assert_eq!(config.query.interval_secs, ON_DEMAND);
        assert!(!config.query.is_periodic());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json_str(r#"{"query": {"limit": 5}}"#).unwrap();
        assert_eq!(config.query.limit, 5);
        assert_eq!(config.query.interval_secs, ON_DEMAND);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(Config::from_json_str(r#"{"store": {"size": 5}}"#).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(QueryConfig::default().with_interval_secs(0).validate().is_err());
        assert!(QueryConfig::default().with_interval_secs(-5).validate().is_err());
        assert!(QueryConfig::default().with_interval_secs(1).validate().is_ok());
        assert!(QueryConfig::default().with_limit(0).validate().is_err());
        assert!(Config::from_json_str(r#"{"store": {"limit": 0}}"#).is_err());
    }

    #[test]
    fn test_max_limit() {
        let config = Config::default().with_max_limit(10);
        assert!(config.check_limit(10).is_ok());
        assert!(config.check_limit(11).is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
            max_limit = 100

            [store]
            period_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.store.period_secs, 5);
        assert_eq!(config.max_limit, Some(100));
    }
}
