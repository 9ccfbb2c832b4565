//! SQLite-backed store for daily usage summaries, one row per UTC calendar day.
//!
//! This module provides:
//! - The [`CacheStore`] seam the cache manager talks to
//! - Schema initialization with a versioned metadata table
//! - Upsert keyed on date, inclusive range scans, age-based deletes
//! - Concurrent access across processes via WAL mode and a busy timeout

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::models::{Breakdown, CacheEntry, UsageMetrics};
use crate::utils::format_date;

const SCHEMA_VERSION: &str = "1";
const MAX_OPEN_ATTEMPTS: u64 = 3;
const BUSY_TIMEOUT_MS: i64 = 5000;

/// Durable storage for cache rows. No freshness logic lives here.
pub trait CacheStore: Send + Sync {
    /// Exact lookup by date.
    fn get(&self, date: NaiveDate) -> Result<Option<CacheEntry>>;

    /// Insert or fully replace the row for `entry.date`.
    fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// Rows with `start <= date <= end`, ascending by date.
    fn scan_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CacheEntry>>;

    /// Delete rows with `date < cutoff`; returns how many were removed.
    fn delete_older_than(&self, cutoff: NaiveDate) -> Result<usize>;

    /// Delete a single row; returns whether it existed.
    fn delete(&self, date: NaiveDate) -> Result<bool>;

    fn count(&self) -> Result<usize>;
}

/// Columns as they come off disk, before the JSON blobs are decoded.
struct RawRow {
    date: String,
    raw_data: String,
    by_user: String,
    by_model: String,
    by_provider: String,
    total_metrics: String,
    updated_at: i64,
    is_complete: bool,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            date: row.get(0)?,
            raw_data: row.get(1)?,
            by_user: row.get(2)?,
            by_model: row.get(3)?,
            by_provider: row.get(4)?,
            total_metrics: row.get(5)?,
            updated_at: row.get(6)?,
            is_complete: row.get::<_, i64>(7)? != 0,
        })
    }

    fn decode(self) -> Result<CacheEntry> {
        let corrupt = |date: &str| {
            let date = date.to_string();
            move |source: serde_json::Error| CacheError::CorruptRow { date, source }
        };
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|_| CacheError::InvalidDate(self.date.clone()))?;
        let metrics: UsageMetrics =
            serde_json::from_str(&self.total_metrics).map_err(corrupt(&self.date))?;
        let breakdown = Breakdown {
            by_user: serde_json::from_str(&self.by_user).map_err(corrupt(&self.date))?,
            by_model: serde_json::from_str(&self.by_model).map_err(corrupt(&self.date))?,
            by_provider: serde_json::from_str(&self.by_provider).map_err(corrupt(&self.date))?,
        };
        let raw_data = serde_json::from_str(&self.raw_data).map_err(corrupt(&self.date))?;
        // Unrepresentable timestamps read as the epoch, which any TTL check treats as stale.
        let updated_at =
            DateTime::<Utc>::from_timestamp_millis(self.updated_at).unwrap_or_default();
        Ok(CacheEntry {
            date,
            metrics,
            breakdown,
            raw_data,
            updated_at,
            is_complete: self.is_complete,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT date, raw_data, aggregated_by_user, aggregated_by_model, \
     aggregated_by_provider, total_metrics, updated_at, is_complete FROM daily_usage_cache";

/// Log a storage failure with its context and wrap it.
fn storage_error(operation: &'static str, context: String) -> impl FnOnce(rusqlite::Error) -> CacheError {
    move |source| {
        tracing::error!(operation, context = %context, error = %source, "Cache store operation failed");
        CacheError::storage(operation, context, source)
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file with WAL mode and retry logic.
    ///
    /// "database is locked" errors during open are retried with linear backoff.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            // Let Connection::open surface the failure if this did not work.
            let _ = std::fs::create_dir_all(parent);
        }

        let mut attempts = 0;
        let conn = loop {
            let opened = Connection::open(path).and_then(|conn| {
                conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                Ok(conn)
            });
            match opened {
                Ok(conn) => break conn,
                Err(e) if e.to_string().contains("locked") && attempts < MAX_OPEN_ATTEMPTS => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(100 * attempts));
                }
                Err(e) => {
                    return Err(storage_error("open", path.display().to_string())(e));
                }
            }
        };

        init_schema(&conn).map_err(storage_error("init_schema", path.display().to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(storage_error("open", ":memory:".to_string()))?;
        init_schema(&conn).map_err(storage_error("init_schema", ":memory:".to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<String>> {
        self.lock()
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error("schema_version", String::new()))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard cannot leave the connection half-written:
        // every statement is atomic on the SQLite side.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_usage_cache (
            date TEXT PRIMARY KEY,
            raw_data TEXT NOT NULL,
            aggregated_by_user TEXT NOT NULL,
            aggregated_by_model TEXT NOT NULL,
            aggregated_by_provider TEXT NOT NULL,
            total_metrics TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            is_complete INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_daily_usage_cache_complete ON daily_usage_cache(is_complete);
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

fn encode<T: serde::Serialize>(value: &T, date: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|source| CacheError::CorruptRow {
        date: date.to_string(),
        source,
    })
}

impl CacheStore for SqliteStore {
    fn get(&self, date: NaiveDate) -> Result<Option<CacheEntry>> {
        let key = format_date(date);
        let raw = self
            .lock()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE date = ?1"),
                params![key],
                RawRow::from_row,
            )
            .optional()
            .map_err(storage_error("get", format!("date={key}")))?;
        raw.map(RawRow::decode).transpose()
    }

    fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let key = format_date(entry.date);
        let raw_data = encode(&entry.raw_data, &key)?;
        let by_user = encode(&entry.breakdown.by_user, &key)?;
        let by_model = encode(&entry.breakdown.by_model, &key)?;
        let by_provider = encode(&entry.breakdown.by_provider, &key)?;
        let total_metrics = encode(&entry.metrics, &key)?;

        self.lock()
            .execute(
                "INSERT INTO daily_usage_cache (date, raw_data, aggregated_by_user, aggregated_by_model, aggregated_by_provider, total_metrics, updated_at, is_complete)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(date) DO UPDATE SET
                     raw_data = excluded.raw_data,
                     aggregated_by_user = excluded.aggregated_by_user,
                     aggregated_by_model = excluded.aggregated_by_model,
                     aggregated_by_provider = excluded.aggregated_by_provider,
                     total_metrics = excluded.total_metrics,
                     updated_at = excluded.updated_at,
                     is_complete = excluded.is_complete",
                params![
                    key,
                    raw_data,
                    by_user,
                    by_model,
                    by_provider,
                    total_metrics,
                    entry.updated_at.timestamp_millis(),
                    entry.is_complete as i64
                ],
            )
            .map_err(storage_error("upsert", format!("date={key}")))?;
        Ok(())
    }

    fn scan_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CacheEntry>> {
        let (start_key, end_key) = (format_date(start), format_date(end));
        let context = format!("range={start_key}..={end_key}");
        let rows: Vec<RawRow> = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS} WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC"
                ))
                .map_err(storage_error("scan_range", context.clone()))?;
            let rows = stmt
                .query_map(params![start_key, end_key], RawRow::from_row)
                .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(storage_error("scan_range", context))?;
            rows
        };
        rows.into_iter().map(RawRow::decode).collect()
    }

    fn delete_older_than(&self, cutoff: NaiveDate) -> Result<usize> {
        let key = format_date(cutoff);
        self.lock()
            .execute("DELETE FROM daily_usage_cache WHERE date < ?1", params![key])
            .map_err(storage_error("delete_older_than", format!("cutoff={key}")))
    }

    fn delete(&self, date: NaiveDate) -> Result<bool> {
        let key = format_date(date);
        let n = self
            .lock()
            .execute("DELETE FROM daily_usage_cache WHERE date = ?1", params![key])
            .map_err(storage_error("delete", format!("date={key}")))?;
        Ok(n > 0)
    }

    fn count(&self) -> Result<usize> {
        self.lock()
            .query_row("SELECT COUNT(*) FROM daily_usage_cache", [], |row| {
                row.get::<_, i64>(0).map(|n| n as usize)
            })
            .map_err(storage_error("count", String::new()))
    }
}
