use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Breakdown, UsageMetrics};

/// What the day builder hands over for a single date.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyUsage {
    pub metrics: UsageMetrics,
    pub breakdown: Breakdown,
    /// Opaque payload kept for audit; never interpreted here.
    pub raw_data: serde_json::Value,
}

impl DailyUsage {
    /// `sum(byUser.requestCount) == metrics.requestCount`. Empty user breakdowns are
    /// accepted, since some builders only report totals.
    pub fn user_breakdown_consistent(&self) -> bool {
        self.breakdown.by_user.is_empty()
            || self.breakdown.user_request_total() == self.metrics.request_count
    }
}

/// One persisted row: a calendar day (UTC) and its summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub date: NaiveDate,
    pub metrics: UsageMetrics,
    pub breakdown: Breakdown,
    pub raw_data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub is_complete: bool,
}

impl CacheEntry {
    pub fn from_usage(
        date: NaiveDate,
        usage: DailyUsage,
        updated_at: DateTime<Utc>,
        is_complete: bool,
    ) -> Self {
        Self {
            date,
            metrics: usage.metrics,
            breakdown: usage.breakdown,
            raw_data: usage.raw_data,
            updated_at,
            is_complete,
        }
    }
}
