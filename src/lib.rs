//! # Daily Usage Cache
//!
//! Day-granularity cache and range aggregation for LLM gateway usage analytics.
//!
//! ## Overview
//!
//! Raw usage is summarized per UTC calendar day by an external day builder. This crate
//! persists those summaries and decides when a stored day can be trusted:
//! - Finished days are marked complete and served forever
//! - Today (and yesterday, shortly after midnight) is provisional and expires after a TTL
//! - Arbitrary date ranges are merged into totals plus per-user, per-model and
//!   per-provider breakdowns
//!
//! ## Features
//!
//! - `colors` (default): Enables terminal color output via owo-colors

/// Range validation and breakdown merging
pub mod aggregate;

/// Day builder contract and a JSON-directory implementation
pub mod builder;

/// In-process memoization of range reports
pub mod cache;

/// Command-line argument parsing
pub mod cli;

/// Injectable source of the current time
pub mod clock;

/// Policy configuration and environment overrides
pub mod config;

/// SQLite-backed day store
pub mod db;

/// Text and JSON rendering
pub mod display;

/// Error taxonomy
pub mod error;

/// Hit/miss/stale decisions and the midnight grace window
pub mod freshness;

/// Retrieval, write, invalidation and retention entry points
pub mod manager;

/// Cache rows, metrics, breakdowns and reports
pub mod models;

/// Date parsing and formatting helpers
pub mod utils;

pub use error::{CacheError, Result};
pub use manager::DailyUsageCacheManager;
