//! Error taxonomy for the cache engine.
//!
//! Validation errors are raised before the store is touched. Storage errors carry the
//! failing operation and are always propagated. A cache miss is not an error and never
//! shows up here.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid range: start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("retention days must be positive, got {0}")]
    InvalidRetention(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error during {operation} ({context}): {source}")]
    Storage {
        operation: &'static str,
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("corrupt cache row for {date}: {source}")]
    CorruptRow {
        date: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("day build failed for {date}: {message}")]
    Build { date: NaiveDate, message: String },
}

impl CacheError {
    pub fn storage(operation: &'static str, context: impl Into<String>, source: rusqlite::Error) -> Self {
        CacheError::Storage {
            operation,
            context: context.into(),
            source,
        }
    }

    /// True for input problems detected before any store access.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidDate(_)
                | CacheError::InvalidRange { .. }
                | CacheError::InvalidRetention(_)
                | CacheError::InvalidConfig(_)
        )
    }

    /// Storage failures may succeed on a later attempt; retrying is up to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Storage { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_validation_and_storage() {
        let e = CacheError::InvalidRetention(0);
        assert!(e.is_validation());
        assert!(!e.is_retryable());

        let e = CacheError::storage(
            "upsert",
            "date=2025-01-01",
            rusqlite::Error::InvalidQuery,
        );
        assert!(e.is_retryable());
        assert!(!e.is_validation());
        assert!(e.to_string().contains("upsert"));
    }
}
