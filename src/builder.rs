//! Day builder contract: given a date, produce that day's metrics and breakdowns.
//!
//! The cache engine only persists what a builder hands back; how the numbers are
//! computed lives elsewhere.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

use crate::models::DailyUsage;
use crate::utils::format_date;

pub trait DayBuilder: Send + Sync {
    fn build_day(&self, date: NaiveDate) -> Result<DailyUsage>;
}

impl<F> DayBuilder for F
where
    F: Fn(NaiveDate) -> Result<DailyUsage> + Send + Sync,
{
    fn build_day(&self, date: NaiveDate) -> Result<DailyUsage> {
        self(date)
    }
}

/// Reads pre-built day summaries from `<dir>/<YYYY-MM-DD>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirDayBuilder {
    dir: PathBuf,
}

impl JsonDirDayBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", format_date(date)))
    }
}

impl DayBuilder for JsonDirDayBuilder {
    fn build_day(&self, date: NaiveDate) -> Result<DailyUsage> {
        let path = self.path_for(date);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }
}
