use serde::{Deserialize, Serialize};

/// Aggregate counters for a day, a range, or a single breakdown entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMetrics {
    pub request_count: u64,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub spend: f64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl UsageMetrics {
    /// Field-wise sum. Counters saturate instead of wrapping.
    pub fn add(&mut self, other: &UsageMetrics) {
        self.request_count = self.request_count.saturating_add(other.request_count);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.spend += other.spend;
        self.successful_requests = self
            .successful_requests
            .saturating_add(other.successful_requests);
        self.failed_requests = self.failed_requests.saturating_add(other.failed_requests);
    }

    pub fn is_zero(&self) -> bool {
        *self == UsageMetrics::default()
    }

    /// Share of requests that succeeded, if any were made.
    pub fn success_rate(&self) -> Option<f64> {
        if self.request_count == 0 {
            return None;
        }
        Some(self.successful_requests as f64 / self.request_count as f64 * 100.0)
    }
}
