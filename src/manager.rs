//! # Manager Module
//!
//! [`DailyUsageCacheManager`] sits between callers and the store:
//! - `get_cached_daily_data`: lookup plus freshness decision, never rebuilds
//! - `save_to_daily_cache`: write-through of a built day
//! - `get_or_build`: lookup, and on miss a single-flight rebuild through a [`DayBuilder`]
//! - `get_date_range_data`: range report over whatever rows exist
//! - `invalidate_today_cache` / `cleanup_old_cache`: forced rebuilds and retention
//!
//! The manager does not retry. Storage errors go back to the caller untouched.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::aggregate::{aggregate, validate_range};
use crate::builder::DayBuilder;
use crate::cache::QueryCache;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::db::CacheStore;
use crate::error::{CacheError, Result};
use crate::freshness::{DayClass, Freshness, FreshnessPolicy};
use crate::models::{CacheEntry, DailyUsage, Period, RangeReport};
use crate::utils::days_before;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub grace_period_applications: u64,
    /// (total, unexpired) memoized range reports
    pub memoized_reports: (usize, usize),
}

fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct DailyUsageCacheManager {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    policy: FreshnessPolicy,
    retention_days: i64,
    query_cache: Option<Arc<QueryCache>>,
    rebuilds: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl DailyUsageCacheManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            policy: FreshnessPolicy::from_config(config),
            retention_days: config.retention_days,
            query_cache: None,
            rebuilds: Mutex::new(HashMap::new()),
        })
    }

    /// Memoize range reports in `cache`; every write invalidates the affected periods.
    pub fn with_query_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Whether `date` is still accumulating as of right now.
    pub fn is_current_day(&self, date: NaiveDate) -> bool {
        self.policy.is_current_day(date, self.clock.now())
    }

    /// The stored row for `date` if it can be served as-is; `None` on miss or stale.
    pub fn get_cached_daily_data(&self, date: NaiveDate) -> Result<Option<CacheEntry>> {
        let (entry, consulted) = self.lookup(date)?;
        self.policy.record_grace(date, consulted);
        Ok(entry)
    }

    /// Lookup plus freshness decision without touching the grace counter. The second
    /// value is the day class when the decision depended on it.
    fn lookup(&self, date: NaiveDate) -> Result<(Option<CacheEntry>, Option<DayClass>)> {
        let entry = self.store.get(date)?;
        let now = self.clock.now();
        let (freshness, consulted) = self.policy.decide(entry.as_ref(), date, now);
        match freshness {
            Freshness::Hit => {
                tracing::debug!(date = %date, "Daily cache hit");
                Ok((entry, consulted))
            }
            Freshness::Miss => {
                tracing::debug!(date = %date, "Daily cache miss: no entry");
                Ok((None, consulted))
            }
            Freshness::Stale => {
                let age_secs = entry
                    .as_ref()
                    .map(|e| (now - e.updated_at).num_seconds())
                    .unwrap_or_default();
                tracing::debug!(
                    date = %date,
                    age_secs,
                    ttl_secs = self.policy.ttl().num_seconds(),
                    "Daily cache stale: entry older than TTL"
                );
                Ok((None, consulted))
            }
        }
    }

    /// Persist a built day. `is_current_day == false` marks the row complete, after
    /// which it is served forever.
    pub fn save_to_daily_cache(
        &self,
        date: NaiveDate,
        data: DailyUsage,
        is_current_day: bool,
    ) -> Result<CacheEntry> {
        if !data.user_breakdown_consistent() {
            tracing::warn!(
                date = %date,
                total_requests = data.metrics.request_count,
                user_requests = data.breakdown.user_request_total(),
                "Per-user request counts do not add up to the daily total"
            );
        }

        if let Some(existing) = self.store.get(date)?
            && existing.is_complete
        {
            tracing::warn!(
                date = %date,
                closed_at = %existing.updated_at,
                new_is_complete = !is_current_day,
                "Replacing a complete daily cache entry"
            );
        }

        let entry = CacheEntry::from_usage(date, data, self.clock.now(), !is_current_day);
        self.store.upsert(&entry)?;
        if let Some(cache) = &self.query_cache {
            cache.invalidate_date(date);
        }

        tracing::debug!(date = %date, is_complete = entry.is_complete, "Saved daily cache entry");
        Ok(entry)
    }

    /// Serve `date` from cache, rebuilding through `builder` on miss or stale.
    ///
    /// At most one rebuild per date runs at a time through this manager; callers that
    /// queue behind it re-check the cache and usually get the fresh row. Completeness
    /// is decided with the clock read after the build finished. The grace counter moves
    /// at most once per call.
    pub fn get_or_build(&self, date: NaiveDate, builder: &dyn DayBuilder) -> Result<CacheEntry> {
        let (cached, consulted) = self.lookup(date)?;
        if let Some(entry) = cached {
            self.policy.record_grace(date, consulted);
            return Ok(entry);
        }

        let date_lock = {
            let mut rebuilds = lock_or_recover(&self.rebuilds);
            rebuilds.entry(date).or_default().clone()
        };

        let result = {
            let _guard = lock_or_recover(&*date_lock);
            self.rebuild_locked(date, builder)
        };

        {
            let mut rebuilds = lock_or_recover(&self.rebuilds);
            // Only the map and this handle left: nobody is waiting on the date.
            if Arc::strong_count(&date_lock) == 2 {
                rebuilds.remove(&date);
            }
        }

        let (entry, later) = result?;
        let grace = consulted
            .filter(|class| *class == DayClass::GraceYesterday)
            .or(later);
        self.policy.record_grace(date, grace);
        Ok(entry)
    }

    fn rebuild_locked(
        &self,
        date: NaiveDate,
        builder: &dyn DayBuilder,
    ) -> Result<(CacheEntry, Option<DayClass>)> {
        let (cached, consulted) = self.lookup(date)?;
        if let Some(entry) = cached {
            tracing::debug!(date = %date, "Rebuild skipped: another caller refreshed the entry");
            return Ok((entry, consulted));
        }

        tracing::debug!(date = %date, "Rebuilding daily usage");
        let data = builder.build_day(date).map_err(|e| CacheError::Build {
            date,
            message: format!("{e:#}"),
        })?;

        let class = self.policy.classify(date, self.clock.now());
        let entry = self.save_to_daily_cache(date, data, class.is_current())?;
        Ok((entry, Some(class)))
    }

    /// Report over `[start, end]` (`YYYY-MM-DD`). Days without rows add nothing.
    pub fn get_date_range_data(&self, start: &str, end: &str) -> Result<RangeReport> {
        let period = validate_range(start, end)?;
        self.range_report(period)
    }

    pub fn range_report(&self, period: Period) -> Result<RangeReport> {
        if let Some(report) = self.query_cache.as_ref().and_then(|c| c.get(&period)) {
            tracing::debug!(start = %period.start_date, end = %period.end_date, "Range report memo hit");
            return Ok(report);
        }

        let generation = self.query_cache.as_ref().map(|c| c.generation());
        let entries = self.store.scan_range(period.start_date, period.end_date)?;
        let report = aggregate(period, &entries);
        tracing::debug!(
            start = %report.period.start_date,
            end = %report.period.end_date,
            days_with_data = report.days_with_data,
            days_in_period = report.days_in_period,
            "Aggregated range report"
        );

        if let (Some(cache), Some(generation)) = (&self.query_cache, generation) {
            cache.insert(report.clone(), generation);
        }
        Ok(report)
    }

    /// Force today's row to be rebuilt on next access by deleting it.
    /// Returns whether a row was present.
    pub fn invalidate_today_cache(&self) -> Result<bool> {
        let today = self.today();
        let removed = self.store.delete(today)?;
        if let Some(cache) = &self.query_cache {
            cache.invalidate_date(today);
        }
        tracing::info!(date = %today, removed, "Invalidated today's cache entry");
        Ok(removed)
    }

    /// Delete rows dated before `today - retention_days`.
    pub fn cleanup_old_cache(&self, retention_days: i64) -> Result<usize> {
        if retention_days <= 0 {
            return Err(CacheError::InvalidRetention(retention_days));
        }
        let cutoff = days_before(self.today(), retention_days);
        let deleted = self.store.delete_older_than(cutoff)?;
        if deleted > 0
            && let Some(cache) = &self.query_cache
        {
            cache.clear();
        }

        if deleted > 0 {
            tracing::info!(cutoff = %cutoff, deleted, "Cleaned up old cache entries");
        } else {
            tracing::debug!(cutoff = %cutoff, "Cache cleanup found nothing to delete");
        }
        Ok(deleted)
    }

    /// [`Self::cleanup_old_cache`] with the configured retention window.
    pub fn cleanup_with_configured_retention(&self) -> Result<usize> {
        self.cleanup_old_cache(self.retention_days)
    }

    pub fn grace_period_applications(&self) -> u64 {
        self.policy.grace_period_applications()
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            entries: self.store.count()?,
            grace_period_applications: self.grace_period_applications(),
            memoized_reports: self
                .query_cache
                .as_ref()
                .map(|c| c.stats())
                .unwrap_or((0, 0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::db::SqliteStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, d, h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn usage(requests: u64) -> DailyUsage {
        let mut u = DailyUsage::default();
        u.metrics.request_count = requests;
        u
    }

    fn setup(now: DateTime<Utc>) -> (Arc<FakeClock>, Arc<SqliteStore>, DailyUsageCacheManager) {
        let clock = Arc::new(FakeClock::new(now));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager =
            DailyUsageCacheManager::new(store.clone(), clock.clone(), &CacheConfig::default())
                .unwrap();
        (clock, store, manager)
    }

    #[test]
    fn rejects_invalid_config() {
        let clock = Arc::new(FakeClock::new(at(18, 12, 0)));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cfg = CacheConfig {
            ttl_minutes: 0,
            ..Default::default()
        };
        assert!(DailyUsageCacheManager::new(store, clock, &cfg).is_err());
    }

    #[test]
    fn save_marks_completeness_from_flag() {
        let (_clock, store, m) = setup(at(18, 12, 0));
        let saved = m.save_to_daily_cache(day(18), usage(3), true).unwrap();
        assert!(!saved.is_complete);
        assert_eq!(saved.updated_at, at(18, 12, 0));

        m.save_to_daily_cache(day(17), usage(9), false).unwrap();
        assert!(store.get(day(17)).unwrap().unwrap().is_complete);
    }

    #[test]
    fn today_row_expires_after_ttl() {
        let (clock, _store, m) = setup(at(18, 12, 0));
        m.save_to_daily_cache(day(18), usage(1), true).unwrap();

        clock.advance(Duration::minutes(2));
        assert!(m.get_cached_daily_data(day(18)).unwrap().is_some());

        clock.set(at(18, 12, 6));
        assert!(m.get_cached_daily_data(day(18)).unwrap().is_none());
    }

    #[test]
    fn invalidate_today_forces_miss() {
        let (_clock, _store, m) = setup(at(18, 12, 0));
        m.save_to_daily_cache(day(18), usage(1), true).unwrap();
        assert!(m.invalidate_today_cache().unwrap());
        assert!(m.get_cached_daily_data(day(18)).unwrap().is_none());
        assert!(!m.invalidate_today_cache().unwrap());
    }

    #[test]
    fn cleanup_validates_and_counts() {
        let (_clock, _store, m) = setup(at(18, 12, 0));
        assert!(matches!(m.cleanup_old_cache(0), Err(CacheError::InvalidRetention(0))));
        assert!(matches!(m.cleanup_old_cache(-10), Err(CacheError::InvalidRetention(-10))));
        assert_eq!(m.cleanup_old_cache(365).unwrap(), 0);

        m.save_to_daily_cache(day(1), usage(1), false).unwrap();
        m.save_to_daily_cache(day(10), usage(1), false).unwrap();
        m.save_to_daily_cache(day(11), usage(1), false).unwrap();
        // cutoff = 2025-10-11; strictly older rows go
        assert_eq!(m.cleanup_old_cache(7).unwrap(), 2);
        assert_eq!(m.stats().unwrap().entries, 1);
    }

    #[test]
    fn get_or_build_skips_builder_on_hit() {
        let (_clock, _store, m) = setup(at(18, 12, 0));
        m.save_to_daily_cache(day(10), usage(5), false).unwrap();
        let builder = |_d: NaiveDate| -> anyhow::Result<DailyUsage> {
            anyhow::bail!("builder must not run on a hit")
        };
        assert_eq!(m.get_or_build(day(10), &builder).unwrap().metrics.request_count, 5);
    }

    #[test]
    fn get_or_build_failure_writes_nothing() {
        let (_clock, store, m) = setup(at(18, 12, 0));
        let builder = |_d: NaiveDate| -> anyhow::Result<DailyUsage> { anyhow::bail!("upstream down") };
        let err = m.get_or_build(day(18), &builder).unwrap_err();
        assert!(matches!(err, CacheError::Build { .. }));
        assert!(err.to_string().contains("upstream down"));
        assert!(store.get(day(18)).unwrap().is_none());
        assert!(m.rebuilds.lock().unwrap().is_empty());
    }

    #[test]
    fn memoized_range_is_invalidated_by_write() {
        let (clock, _store, m) = setup(at(18, 12, 0));
        let m = m.with_query_cache(Arc::new(QueryCache::new(Duration::seconds(30), clock.clone())));

        m.save_to_daily_cache(day(15), usage(10), false).unwrap();
        let first = m.get_date_range_data("2025-10-14", "2025-10-16").unwrap();
        assert_eq!(first.total_metrics.request_count, 10);
        assert_eq!(m.stats().unwrap().memoized_reports, (1, 1));

        m.save_to_daily_cache(day(16), usage(5), false).unwrap();
        let second = m.get_date_range_data("2025-10-14", "2025-10-16").unwrap();
        assert_eq!(second.total_metrics.request_count, 15);
    }

    #[test]
    fn future_date_build_stays_provisional() {
        let (clock, store, m) = setup(at(18, 12, 0));
        let builder = |_d: NaiveDate| -> anyhow::Result<DailyUsage> { Ok(usage(0)) };

        let built = m.get_or_build(day(19), &builder).unwrap();
        assert!(!built.is_complete);
        assert!(!store.get(day(19)).unwrap().unwrap().is_complete);

        // Once the day is underway the empty row expires like any other current row.
        clock.set(at(19, 18, 0));
        assert!(m.get_cached_daily_data(day(19)).unwrap().is_none());
    }

    #[test]
    fn cleanup_with_huge_retention_deletes_nothing() {
        let (_clock, _store, m) = setup(at(18, 12, 0));
        m.save_to_daily_cache(day(1), usage(1), false).unwrap();
        assert_eq!(m.cleanup_old_cache(i64::MAX).unwrap(), 0);
        assert_eq!(m.cleanup_old_cache(1_000_000_000).unwrap(), 0);
        assert_eq!(m.stats().unwrap().entries, 1);
    }

    #[test]
    fn unrepresentable_ttl_is_a_config_error() {
        let clock = Arc::new(FakeClock::new(at(18, 12, 0)));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cfg = CacheConfig {
            ttl_minutes: i64::MAX / 2,
            ..Default::default()
        };
        let err = DailyUsageCacheManager::new(store, clock, &cfg).err().unwrap();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn replacing_complete_row_still_writes() {
        let (_clock, store, m) = setup(at(18, 12, 0));
        m.save_to_daily_cache(day(10), usage(4), false).unwrap();
        let replaced = m.save_to_daily_cache(day(10), usage(6), true).unwrap();
        assert!(!replaced.is_complete);

        let stored = store.get(day(10)).unwrap().unwrap();
        assert_eq!(stored.metrics.request_count, 6);
        assert!(!stored.is_complete);
    }
}
