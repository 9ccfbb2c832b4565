use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::UsageMetrics;
use crate::aggregate::merge_breakdown;

/// Descriptive side of a breakdown entry.
///
/// When two entries for the same entity are merged, descriptive fields keep the first
/// occurrence; `absorb` only folds in nested breakdowns.
pub trait EntityInfo: Clone {
    fn absorb(&mut self, _other: &Self) {}
}

/// One entity's subtotal inside a breakdown dictionary.
///
/// `info` carries the descriptive fields (names, roles) and is flattened next to
/// `metrics` when serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry<D> {
    #[serde(flatten)]
    pub info: D,
    #[serde(default)]
    pub metrics: UsageMetrics,
}

impl<D> BreakdownEntry<D> {
    pub fn new(info: D, metrics: UsageMetrics) -> Self {
        Self { info, metrics }
    }
}

/// Entity id -> subtotal. Ordered so reports render deterministically.
pub type BreakdownMap<D> = BTreeMap<String, BreakdownEntry<D>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// This user's usage split by model.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BreakdownMap<ModelInfo>,
}

impl EntityInfo for UserInfo {
    fn absorb(&mut self, other: &Self) {
        merge_breakdown(&mut self.models, &other.models);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// This model's usage split by user.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BreakdownMap<UserInfo>,
}

impl EntityInfo for ModelInfo {
    fn absorb(&mut self, other: &Self) {
        merge_breakdown(&mut self.users, &other.users);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

impl EntityInfo for ProviderInfo {}

pub type UserUsage = BreakdownEntry<UserInfo>;
pub type ModelUsage = BreakdownEntry<ModelInfo>;
pub type ProviderUsage = BreakdownEntry<ProviderInfo>;

/// The three per-entity dictionaries kept for every day and every range report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakdown {
    pub by_user: BreakdownMap<UserInfo>,
    pub by_model: BreakdownMap<ModelInfo>,
    pub by_provider: BreakdownMap<ProviderInfo>,
}

impl Breakdown {
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty() && self.by_model.is_empty() && self.by_provider.is_empty()
    }

    /// Sum of `requestCount` across `byUser`.
    pub fn user_request_total(&self) -> u64 {
        self.by_user
            .values()
            .fold(0u64, |acc, u| acc.saturating_add(u.metrics.request_count))
    }
}
