pub mod breakdown;
pub mod entry;
pub mod metrics;
pub mod report;

pub use breakdown::{
    Breakdown, BreakdownEntry, BreakdownMap, EntityInfo, ModelInfo, ModelUsage, ProviderInfo, ProviderUsage,
    UserInfo, UserUsage,
};
pub use entry::{CacheEntry, DailyUsage};
pub use metrics::UsageMetrics;
pub use report::{Period, RangeReport};
