//! # Config Module
//!
//! Policy knobs for the cache engine. Defaults can be overridden through environment
//! variables and, in the binary, through command-line flags:
//! - `USAGE_CACHE_TTL_MINUTES` (default 5)
//! - `USAGE_CACHE_GRACE_MINUTES` (default 5)
//! - `USAGE_CACHE_RETENTION_DAYS` (default 365)
//! - `USAGE_CACHE_QUERY_TTL_SECONDS` (default 30)
//! - `USAGE_CACHE_DB_PATH`

use chrono::Duration;
use std::env;
use std::path::PathBuf;

use crate::error::{CacheError, Result};

pub const DEFAULT_TTL_MINUTES: i64 = 5;
pub const DEFAULT_GRACE_PERIOD_MINUTES: i64 = 5;
pub const DEFAULT_RETENTION_DAYS: i64 = 365;
pub const DEFAULT_QUERY_CACHE_TTL_SECONDS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// How long a current-day row stays fresh.
    pub ttl_minutes: i64,
    /// Window after midnight UTC during which yesterday is still "current".
    pub grace_period_minutes: i64,
    pub retention_days: i64,
    /// TTL of memoized range reports; 0 disables memoization.
    pub query_cache_ttl_seconds: i64,
    pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_TTL_MINUTES,
            grace_period_minutes: DEFAULT_GRACE_PERIOD_MINUTES,
            retention_days: DEFAULT_RETENTION_DAYS,
            query_cache_ttl_seconds: DEFAULT_QUERY_CACHE_TTL_SECONDS,
            db_path: None,
        }
    }
}

fn env_i64(var: &str, default: i64) -> i64 {
    env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

impl CacheConfig {
    /// Defaults with environment overrides applied. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let db_path = env::var("USAGE_CACHE_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        Self {
            ttl_minutes: env_i64("USAGE_CACHE_TTL_MINUTES", DEFAULT_TTL_MINUTES),
            grace_period_minutes: env_i64("USAGE_CACHE_GRACE_MINUTES", DEFAULT_GRACE_PERIOD_MINUTES),
            retention_days: env_i64("USAGE_CACHE_RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
            query_cache_ttl_seconds: env_i64(
                "USAGE_CACHE_QUERY_TTL_SECONDS",
                DEFAULT_QUERY_CACHE_TTL_SECONDS,
            ),
            db_path,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_minutes < 1 || Duration::try_minutes(self.ttl_minutes).is_none() {
            return Err(CacheError::InvalidConfig(format!(
                "ttl_minutes must be at least 1 and representable as a duration, got {}",
                self.ttl_minutes
            )));
        }
        if !(0..24 * 60).contains(&self.grace_period_minutes) {
            return Err(CacheError::InvalidConfig(format!(
                "grace_period_minutes must be within [0, 1440), got {}",
                self.grace_period_minutes
            )));
        }
        if self.retention_days < 1 {
            return Err(CacheError::InvalidConfig(format!(
                "retention_days must be at least 1, got {}",
                self.retention_days
            )));
        }
        if self.query_cache_ttl_seconds < 0
            || Duration::try_seconds(self.query_cache_ttl_seconds).is_none()
        {
            return Err(CacheError::InvalidConfig(format!(
                "query_cache_ttl_seconds must be non-negative and representable as a duration, got {}",
                self.query_cache_ttl_seconds
            )));
        }
        Ok(())
    }

    // The accessors saturate so an unvalidated config cannot panic; `validate` is
    // what rejects out-of-range values.
    pub fn ttl(&self) -> Duration {
        Duration::try_minutes(self.ttl_minutes).unwrap_or(Duration::MAX)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::try_minutes(self.grace_period_minutes).unwrap_or(Duration::MAX)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::try_seconds(self.query_cache_ttl_seconds).unwrap_or(Duration::MAX)
    }
}
