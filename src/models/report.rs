use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{BreakdownMap, ModelInfo, ProviderInfo, UsageMetrics, UserInfo};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Inclusive number of calendar days.
    pub fn days(&self) -> u32 {
        ((self.end_date - self.start_date).num_days() + 1).max(0) as u32
    }
}

/// Totals and per-entity breakdowns for an arbitrary span of days.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeReport {
    pub period: Period,
    pub total_metrics: UsageMetrics,
    pub by_user: BreakdownMap<UserInfo>,
    pub by_model: BreakdownMap<ModelInfo>,
    pub by_provider: BreakdownMap<ProviderInfo>,
    pub days_in_period: u32,
    pub days_with_data: u32,
}

impl RangeReport {
    /// Zeroed report covering `period`.
    pub fn empty(period: Period) -> Self {
        let days_in_period = period.days();
        Self {
            period,
            total_metrics: UsageMetrics::default(),
            by_user: BTreeMap::new(),
            by_model: BTreeMap::new(),
            by_provider: BTreeMap::new(),
            days_in_period,
            days_with_data: 0,
        }
    }
}
