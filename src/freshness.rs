//! # Freshness Module
//!
//! Decides whether a stored row can be served without a rebuild.
//!
//! Rules, first match wins:
//! 1. no row: [`Freshness::Miss`]
//! 2. row marked complete: [`Freshness::Hit`], whatever its age
//! 3. date is current and the row is younger than the TTL: [`Freshness::Hit`]
//! 4. anything else: [`Freshness::Stale`]
//!
//! A date is current when it is today (UTC), or when it is yesterday and "now" is at
//! most `grace_period` past midnight UTC. The grace window covers builds of "today"
//! that finish just after the day rolls over. Dates after today are current too: they
//! have not closed, so nothing built for them may be marked complete.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::CacheConfig;
use crate::models::CacheEntry;
use crate::utils::previous_day;

/// How a calendar date relates to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayClass {
    Today,
    /// Yesterday, still inside the post-midnight grace window.
    GraceYesterday,
    Historical,
    /// After today; only reachable with skewed clocks or bad input. Treated as open.
    Future,
}

impl DayClass {
    /// Whether rows for the day can still change. A day that has not started yet is
    /// not closed either.
    pub fn is_current(self) -> bool {
        !matches!(self, DayClass::Historical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Hit,
    Miss,
    Stale,
}

#[derive(Debug)]
pub struct FreshnessPolicy {
    ttl: Duration,
    grace_period: Duration,
    grace_applications: AtomicU64,
}

impl FreshnessPolicy {
    pub fn new(ttl: Duration, grace_period: Duration) -> Self {
        Self {
            ttl,
            grace_period,
            grace_applications: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.grace_period())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Classify `date` against `now` without touching the grace counter.
    pub fn classify(&self, date: NaiveDate, now: DateTime<Utc>) -> DayClass {
        let today = now.date_naive();
        if date == today {
            return DayClass::Today;
        }
        if date > today {
            return DayClass::Future;
        }
        if date == previous_day(today) {
            let since_midnight = now - today.and_time(chrono::NaiveTime::MIN).and_utc();
            if since_midnight <= self.grace_period {
                return DayClass::GraceYesterday;
            }
        }
        DayClass::Historical
    }

    /// Whether `date` is still accumulating. Counts a grace application whenever the
    /// grace window is what made the date current.
    pub fn is_current_day(&self, date: NaiveDate, now: DateTime<Utc>) -> bool {
        let class = self.classify(date, now);
        self.record_grace(date, Some(class));
        class.is_current()
    }

    /// Bump the grace counter if `class` came from the grace window. Callers pass the
    /// class behind one logical decision, so a lookup that re-checks under a lock
    /// still counts once.
    pub fn record_grace(&self, date: NaiveDate, class: Option<DayClass>) {
        if class != Some(DayClass::GraceYesterday) {
            return;
        }
        let total = self.grace_applications.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            date = %date,
            grace_minutes = self.grace_period.num_minutes(),
            total,
            "Grace period applied: treating yesterday as current"
        );
    }

    /// Apply the freshness rules to a looked-up row and count any grace application.
    pub fn evaluate(
        &self,
        entry: Option<&CacheEntry>,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Freshness {
        let (freshness, consulted) = self.decide(entry, date, now);
        self.record_grace(date, consulted);
        freshness
    }

    /// The freshness rules without side effects. Also returns the day class when
    /// rule 3 had to look at it (row present but not complete).
    pub fn decide(
        &self,
        entry: Option<&CacheEntry>,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> (Freshness, Option<DayClass>) {
        let Some(entry) = entry else {
            return (Freshness::Miss, None);
        };
        if entry.is_complete {
            return (Freshness::Hit, None);
        }
        let class = self.classify(date, now);
        if class.is_current() && self.within_ttl(entry.updated_at, now) {
            return (Freshness::Hit, Some(class));
        }
        (Freshness::Stale, Some(class))
    }

    /// Rows written "in the future" (clock skew) count as fresh.
    pub fn within_ttl(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - updated_at < self.ttl
    }

    /// Number of times the grace window decided that a date was current.
    pub fn grace_period_applications(&self) -> u64 {
        self.grace_applications.load(Ordering::Relaxed)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DailyUsage;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: NaiveDate, updated_at: DateTime<Utc>, complete: bool) -> CacheEntry {
        CacheEntry::from_usage(date, DailyUsage::default(), updated_at, complete)
    }

    #[test]
    fn classify_today_yesterday_and_older() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 12, 0, 0);
        assert_eq!(p.classify(day(2025, 10, 18), now), DayClass::Today);
        assert_eq!(p.classify(day(2025, 10, 17), now), DayClass::Historical);
        assert_eq!(p.classify(day(2025, 10, 19), now), DayClass::Future);
    }

    #[test]
    fn grace_boundary_is_inclusive() {
        let p = FreshnessPolicy::default();
        let yesterday = day(2025, 10, 17);
        assert_eq!(p.classify(yesterday, at(2025, 10, 18, 0, 3, 0)), DayClass::GraceYesterday);
        assert_eq!(p.classify(yesterday, at(2025, 10, 18, 0, 5, 0)), DayClass::GraceYesterday);
        assert_eq!(p.classify(yesterday, at(2025, 10, 18, 0, 6, 0)), DayClass::Historical);
    }

    #[test]
    fn grace_never_reaches_two_days_back() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 0, 1, 0);
        assert_eq!(p.classify(day(2025, 10, 16), now), DayClass::Historical);
        assert!(!p.is_current_day(day(2025, 10, 16), now));
        assert_eq!(p.grace_period_applications(), 0);
    }

    #[test]
    fn zero_grace_only_covers_exact_midnight() {
        let p = FreshnessPolicy::new(Duration::minutes(5), Duration::zero());
        let yesterday = day(2025, 10, 17);
        assert!(p.is_current_day(yesterday, at(2025, 10, 18, 0, 0, 0)));
        assert!(!p.is_current_day(yesterday, at(2025, 10, 18, 0, 0, 1)));
    }

    #[test]
    fn counter_tracks_only_grace_decisions() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 0, 2, 0);
        assert!(p.is_current_day(day(2025, 10, 18), now));
        assert_eq!(p.grace_period_applications(), 0);
        assert!(p.is_current_day(day(2025, 10, 17), now));
        assert!(p.is_current_day(day(2025, 10, 17), now));
        assert_eq!(p.grace_period_applications(), 2);
    }

    #[test]
    fn evaluate_rules_in_order() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 15, 0, 0);
        let today = day(2025, 10, 18);

        assert_eq!(p.evaluate(None, today, now), Freshness::Miss);

        let fresh = row(today, now - Duration::minutes(2), false);
        assert_eq!(p.evaluate(Some(&fresh), today, now), Freshness::Hit);

        let old = row(today, now - Duration::minutes(6), false);
        assert_eq!(p.evaluate(Some(&old), today, now), Freshness::Stale);

        let ancient = day(2020, 1, 1);
        let complete = row(ancient, at(2020, 1, 2, 0, 0, 0), true);
        assert_eq!(p.evaluate(Some(&complete), ancient, now), Freshness::Hit);
    }

    #[test]
    fn incomplete_historical_row_is_stale() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 0, 6, 0);
        let yesterday = day(2025, 10, 17);
        let provisional = row(yesterday, now - Duration::minutes(1), false);
        assert_eq!(p.evaluate(Some(&provisional), yesterday, now), Freshness::Stale);
    }

    #[test]
    fn days_not_started_are_never_closed() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 12, 0, 0);
        let tomorrow = day(2025, 10, 19);
        assert!(DayClass::Future.is_current());
        assert!(p.is_current_day(tomorrow, now));
        assert_eq!(p.grace_period_applications(), 0);

        let provisional = row(tomorrow, now - Duration::minutes(1), false);
        assert_eq!(p.evaluate(Some(&provisional), tomorrow, now), Freshness::Hit);
        let old = row(tomorrow, now - Duration::minutes(10), false);
        assert_eq!(p.evaluate(Some(&old), tomorrow, now), Freshness::Stale);
    }

    #[test]
    fn decide_does_not_touch_counter() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 0, 2, 0);
        let yesterday = day(2025, 10, 17);
        let provisional = row(yesterday, now - Duration::minutes(1), false);

        let (freshness, class) = p.decide(Some(&provisional), yesterday, now);
        assert_eq!(freshness, Freshness::Hit);
        assert_eq!(class, Some(DayClass::GraceYesterday));
        assert_eq!(p.grace_period_applications(), 0);

        p.record_grace(yesterday, class);
        p.record_grace(yesterday, Some(DayClass::Today));
        p.record_grace(yesterday, None);
        assert_eq!(p.grace_period_applications(), 1);
    }

    #[test]
    fn future_dated_write_counts_as_fresh() {
        let p = FreshnessPolicy::default();
        let now = at(2025, 10, 18, 10, 0, 0);
        assert!(p.within_ttl(now + Duration::minutes(1), now));
    }
}
