//! # Cache Module
//!
//! In-process memoization of range reports, keyed by the requested period.
//!
//! Entries expire after a TTL measured with the injected [`Clock`] and are dropped when
//! a write touches any date inside their period.
//!
//! Every invalidation bumps a generation counter. A report computed from a scan that
//! started before an invalidation is refused on insert, so a write that lands between
//! scan and insert cannot leave a pre-write report memoized.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::models::{Period, RangeReport};

#[derive(Clone, Debug)]
struct MemoEntry {
    report: RangeReport,
    expires_at: DateTime<Utc>,
}

type MemoKey = (NaiveDate, NaiveDate);

fn make_key(period: &Period) -> MemoKey {
    (period.start_date, period.end_date)
}

pub struct QueryCache {
    entries: Mutex<HashMap<MemoKey, MemoEntry>>,
    generation: AtomicU64,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl QueryCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
            clock,
        }
    }

    /// Memoized report for `period`, if present and not expired.
    pub fn get(&self, period: &Period) -> Option<RangeReport> {
        let now = self.clock.now();
        let cache = self.entries.lock().ok()?;
        let entry = cache.get(&make_key(period))?;
        (entry.expires_at > now).then(|| entry.report.clone())
    }

    /// Read before scanning the store; hand the value back to [`Self::insert`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Memoize `report` unless an invalidation happened since `observed_generation`.
    /// Returns whether the report was stored.
    pub fn insert(&self, report: RangeReport, observed_generation: u64) -> bool {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let Ok(mut cache) = self.entries.lock() else {
            return false;
        };
        if self.generation.load(Ordering::Acquire) != observed_generation {
            tracing::debug!(
                start = %report.period.start_date,
                end = %report.period.end_date,
                "Range report not memoized: cache invalidated during scan"
            );
            return false;
        }
        // Clean up expired entries while we have the lock
        cache.retain(|_, entry| entry.expires_at > now);
        cache.insert(make_key(&report.period), MemoEntry { report, expires_at });
        true
    }

    /// Drop every memoized report whose period covers `date`. Returns how many went.
    pub fn invalidate_date(&self, date: NaiveDate) -> usize {
        let Ok(mut cache) = self.entries.lock() else {
            return 0;
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = cache.len();
        cache.retain(|_, entry| !entry.report.period.contains(date));
        before - cache.len()
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.entries.lock() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            cache.clear();
        }
    }

    /// (total, unexpired)
    pub fn stats(&self) -> (usize, usize) {
        let now = self.clock.now();
        if let Ok(cache) = self.entries.lock() {
            let total = cache.len();
            let valid = cache.values().filter(|e| e.expires_at > now).count();
            (total, valid)
        } else {
            (0, 0)
        }
    }
}
