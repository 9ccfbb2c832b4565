//! # Aggregate Module
//!
//! Folds cached day rows into a [`RangeReport`].
//!
//! Totals are a plain field-wise sum. The three breakdown dictionaries share a single
//! merge: numeric fields are summed per entity key, descriptive fields keep the first
//! occurrence, and nested per-user/per-model splits are merged the same way one level
//! down. Days without a row contribute nothing.

use chrono::NaiveDate;

use crate::error::{CacheError, Result};
use crate::models::{BreakdownMap, CacheEntry, EntityInfo, Period, RangeReport};
use crate::utils::parse_date;

/// Parse and order-check a `[start, end]` pair before any store access.
pub fn validate_range(start: &str, end: &str) -> Result<Period> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    check_order(start_date, end_date)
}

pub fn check_order(start_date: NaiveDate, end_date: NaiveDate) -> Result<Period> {
    if start_date > end_date {
        return Err(CacheError::InvalidRange {
            start: start_date,
            end: end_date,
        });
    }
    Ok(Period {
        start_date,
        end_date,
    })
}

/// Merge `from` into `into` by entity key.
pub fn merge_breakdown<D: EntityInfo>(into: &mut BreakdownMap<D>, from: &BreakdownMap<D>) {
    for (key, incoming) in from {
        match into.get_mut(key) {
            Some(existing) => {
                existing.metrics.add(&incoming.metrics);
                existing.info.absorb(&incoming.info);
            }
            None => {
                into.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Fold one day into the report.
pub fn accumulate(report: &mut RangeReport, entry: &CacheEntry) {
    report.total_metrics.add(&entry.metrics);
    merge_breakdown(&mut report.by_user, &entry.breakdown.by_user);
    merge_breakdown(&mut report.by_model, &entry.breakdown.by_model);
    merge_breakdown(&mut report.by_provider, &entry.breakdown.by_provider);
    report.days_with_data += 1;
}

/// Build a report for `period` from whatever rows were found. Rows outside the period
/// are ignored.
pub fn aggregate(period: Period, entries: &[CacheEntry]) -> RangeReport {
    let span = period.clone();
    let mut report = RangeReport::empty(period);
    for entry in entries.iter().filter(|e| span.contains(e.date)) {
        accumulate(&mut report, entry);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BreakdownEntry, DailyUsage, ModelInfo, UsageMetrics, UserInfo};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn metrics(requests: u64, spend: f64) -> UsageMetrics {
        UsageMetrics {
            request_count: requests,
            total_tokens: requests * 10,
            prompt_tokens: requests * 6,
            completion_tokens: requests * 4,
            spend,
            successful_requests: requests,
            failed_requests: 0,
        }
    }

    fn user(name: &str, requests: u64) -> BreakdownEntry<UserInfo> {
        BreakdownEntry::new(
            UserInfo {
                username: Some(name.to_string()),
                ..Default::default()
            },
            metrics(requests, requests as f64 / 100.0),
        )
    }

    fn entry(date: NaiveDate, usage: DailyUsage) -> CacheEntry {
        CacheEntry::from_usage(date, usage, Utc::now(), true)
    }

    #[test]
    fn validate_range_rejects_bad_input() {
        assert!(matches!(
            validate_range("2025-10-05", "2025-10-01"),
            Err(CacheError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range("2025-10-xx", "2025-10-01"),
            Err(CacheError::InvalidDate(_))
        ));
        assert!(matches!(
            validate_range("2025-10-01", "10/05/2025"),
            Err(CacheError::InvalidDate(_))
        ));
        let p = validate_range("2025-10-01", "2025-10-01").unwrap();
        assert_eq!(p.days(), 1);
    }

    #[test]
    fn empty_span_yields_zeroed_report() {
        let period = validate_range("2025-10-01", "2025-10-07").unwrap();
        let report = aggregate(period, &[]);
        assert!(report.total_metrics.is_zero());
        assert!(report.by_user.is_empty());
        assert!(report.by_model.is_empty());
        assert!(report.by_provider.is_empty());
        assert_eq!(report.days_in_period, 7);
        assert_eq!(report.days_with_data, 0);
    }

    #[test]
    fn totals_sum_across_days() {
        let mut usage = DailyUsage::default();
        usage.metrics = metrics(1000, 12.5);
        let rows = vec![entry(day(1), usage.clone()), entry(day(2), usage)];

        let report = aggregate(validate_range("2025-10-01", "2025-10-02").unwrap(), &rows);
        assert_eq!(report.total_metrics.request_count, 2000);
        assert_eq!(report.total_metrics.spend, 25.0);
        assert_eq!(report.total_metrics.total_tokens, 20_000);
        assert_eq!(report.days_with_data, 2);
    }

    #[test]
    fn same_user_merges_and_keeps_first_descriptive_fields() {
        let mut d1 = DailyUsage::default();
        d1.breakdown.by_user.insert("u1".into(), user("alice", 100));
        let mut d2 = DailyUsage::default();
        d2.breakdown.by_user.insert("u1".into(), user("alice.renamed", 150));
        d2.breakdown.by_user.insert("u2".into(), user("bob", 7));

        let report = aggregate(
            validate_range("2025-10-01", "2025-10-03").unwrap(),
            &[entry(day(1), d1), entry(day(3), d2)],
        );
        assert_eq!(report.by_user.len(), 2);
        assert_eq!(report.by_user["u1"].metrics.request_count, 250);
        assert_eq!(report.by_user["u1"].info.username.as_deref(), Some("alice"));
        assert_eq!(report.by_user["u2"].metrics.request_count, 7);
    }

    #[test]
    fn model_and_provider_use_same_merge() {
        let model = |n: u64| {
            BreakdownEntry::new(
                ModelInfo {
                    model_name: Some("gpt-4o".into()),
                    provider: Some("openai".into()),
                    ..Default::default()
                },
                metrics(n, 0.5),
            )
        };
        let mut a = BTreeMap::new();
        a.insert("gpt-4o".to_string(), model(3));
        merge_breakdown(&mut a, &BTreeMap::from([("gpt-4o".to_string(), model(4))]));
        assert_eq!(a["gpt-4o"].metrics.request_count, 7);
        assert_eq!(a["gpt-4o"].metrics.spend, 1.0);
    }

    #[test]
    fn rows_outside_period_are_ignored() {
        let mut usage = DailyUsage::default();
        usage.metrics = metrics(5, 1.0);
        let report = aggregate(
            validate_range("2025-10-02", "2025-10-02").unwrap(),
            &[entry(day(1), usage.clone()), entry(day(2), usage)],
        );
        assert_eq!(report.total_metrics.request_count, 5);
        assert_eq!(report.days_with_data, 1);
    }

    #[test]
    fn nested_splits_merge_recursively() {
        let split = |model: &str, n: u64| {
            BTreeMap::from([(
                model.to_string(),
                BreakdownEntry::new(
                    ModelInfo {
                        model_name: Some(model.to_string()),
                        ..Default::default()
                    },
                    metrics(n, 0.0),
                ),
            )])
        };
        let mut d1 = DailyUsage::default();
        let mut alice = user("alice", 10);
        alice.info.models = split("gpt-4o", 10);
        d1.breakdown.by_user.insert("u1".into(), alice);

        let mut d2 = DailyUsage::default();
        let mut alice = user("alice", 7);
        alice.info.models = split("gpt-4o", 4);
        alice.info.models.extend(split("claude-sonnet-4", 3));
        d2.breakdown.by_user.insert("u1".into(), alice);

        let mut model = BreakdownEntry::new(
            ModelInfo {
                model_name: Some("gpt-4o".into()),
                ..Default::default()
            },
            metrics(10, 0.0),
        );
        model.info.users.insert("u1".into(), user("alice", 10));
        d1.breakdown.by_model.insert("gpt-4o".into(), model.clone());
        d2.breakdown.by_model.insert("gpt-4o".into(), model);

        let report = aggregate(
            validate_range("2025-10-01", "2025-10-02").unwrap(),
            &[entry(day(1), d1), entry(day(2), d2)],
        );
        let models = &report.by_user["u1"].info.models;
        assert_eq!(report.by_user["u1"].metrics.request_count, 17);
        assert_eq!(models["gpt-4o"].metrics.request_count, 14);
        assert_eq!(models["claude-sonnet-4"].metrics.request_count, 3);
        assert_eq!(
            report.by_model["gpt-4o"].info.users["u1"].metrics.request_count,
            20
        );
    }
}
