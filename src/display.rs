use serde_json::Value;
use std::fmt::Write as _;

#[cfg(feature = "colors")]
use owo_colors::OwoColorize;

// Provide a no-op color shim when "colors" feature is disabled
#[cfg(not(feature = "colors"))]
pub mod color_shim {
    use std::fmt::{self, Display, Formatter};

    #[derive(Clone)]
    pub struct Plain(pub String);

    impl Display for Plain {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    pub trait ColorizeShim {
        fn as_str(&self) -> &str;

        fn bright_black(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bright_cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn red(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn yellow(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn green(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn bold(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn dimmed(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
        fn cyan(&self) -> Plain {
            Plain(self.as_str().to_string())
        }
    }

    impl ColorizeShim for &str {
        fn as_str(&self) -> &str {
            self
        }
    }
    impl ColorizeShim for String {
        fn as_str(&self) -> &str {
            self.as_str()
        }
    }
    impl ColorizeShim for Plain {
        fn as_str(&self) -> &str {
            &self.0
        }
    }
}

#[cfg(not(feature = "colors"))]
use color_shim::ColorizeShim as OwoColorize;

use crate::manager::CacheStats;
use crate::models::{BreakdownMap, CacheEntry, RangeReport, UsageMetrics};
use crate::utils::{format_currency, format_date, format_tokens};

fn colorize_success(rate: Option<f64>) -> String {
    match rate {
        None => "n/a".dimmed().to_string(),
        Some(pct) if pct < 90.0 => format!("{pct:.1}%").red().bold().to_string(),
        Some(pct) if pct < 99.0 => format!("{pct:.1}%").yellow().to_string(),
        Some(pct) => format!("{pct:.1}%").green().to_string(),
    }
}

fn metrics_line(m: &UsageMetrics) -> String {
    format!(
        "{} {}  {} {} ({} in / {} out)  {} {}  {} {}",
        "requests".dimmed(),
        format_tokens(m.request_count),
        "tokens".dimmed(),
        format_tokens(m.total_tokens),
        format_tokens(m.prompt_tokens),
        format_tokens(m.completion_tokens),
        "spend".dimmed(),
        format!("${}", format_currency(m.spend)).bold(),
        "success".dimmed(),
        colorize_success(m.success_rate()),
    )
}

/// Top `top` entries by spend (then request count, then key).
fn render_breakdown<D>(
    out: &mut String,
    title: &str,
    map: &BreakdownMap<D>,
    label: impl Fn(&str, &D) -> String,
    top: usize,
) {
    if map.is_empty() {
        return;
    }
    let mut rows: Vec<_> = map.iter().collect();
    rows.sort_by(|(ka, a), (kb, b)| {
        b.metrics
            .spend
            .total_cmp(&a.metrics.spend)
            .then(b.metrics.request_count.cmp(&a.metrics.request_count))
            .then(ka.cmp(kb))
    });

    let _ = writeln!(out, "{} ({})", title.bold(), map.len());
    for (key, item) in rows.into_iter().take(top) {
        let _ = writeln!(
            out,
            "  {:<28} {:>8} req  {:>8} tok  ${:>10}",
            label(key, &item.info),
            format_tokens(item.metrics.request_count),
            format_tokens(item.metrics.total_tokens),
            format_currency(item.metrics.spend),
        );
    }
}

pub fn render_report_text(report: &RangeReport, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} → {} {}",
        "Usage".bright_cyan().bold(),
        format_date(report.period.start_date),
        format_date(report.period.end_date),
        format!(
            "({}/{} days cached)",
            report.days_with_data, report.days_in_period
        )
        .dimmed(),
    );
    let _ = writeln!(out, "{}", metrics_line(&report.total_metrics));

    render_breakdown(
        &mut out,
        "Users",
        &report.by_user,
        |key, info| info.username.clone().unwrap_or_else(|| key.to_string()),
        top,
    );
    render_breakdown(
        &mut out,
        "Models",
        &report.by_model,
        |key, info| match (&info.model_name, &info.provider) {
            (Some(name), Some(provider)) => format!("{name} [{provider}]"),
            (Some(name), None) => name.clone(),
            _ => key.to_string(),
        },
        top,
    );
    render_breakdown(
        &mut out,
        "Providers",
        &report.by_provider,
        |key, info| info.provider_name.clone().unwrap_or_else(|| key.to_string()),
        top,
    );
    out
}

pub fn render_entry_text(entry: &CacheEntry) -> String {
    let state = if entry.is_complete {
        "complete".green().to_string()
    } else {
        "provisional".yellow().to_string()
    };
    format!(
        "{} {} {} {}\n{}\n",
        format_date(entry.date).bright_cyan().bold(),
        state,
        "updated".dimmed(),
        entry.updated_at.format("%Y-%m-%dT%H:%M:%SZ"),
        metrics_line(&entry.metrics),
    )
}

pub fn render_stats_text(stats: &CacheStats) -> String {
    format!(
        "{} {}\n{} {}\n{} {}/{}\n",
        "entries".dimmed(),
        stats.entries,
        "grace period applications".dimmed(),
        stats.grace_period_applications,
        "memoized reports (valid/total)".dimmed(),
        stats.memoized_reports.1,
        stats.memoized_reports.0,
    )
}

pub fn build_report_json(report: &RangeReport) -> Value {
    serde_json::to_value(report).unwrap_or(Value::Null)
}

pub fn build_entry_json(entry: &CacheEntry) -> Value {
    serde_json::to_value(entry).unwrap_or(Value::Null)
}

pub fn build_stats_json(stats: &CacheStats) -> Value {
    serde_json::json!({
        "entries": stats.entries,
        "gracePeriodApplications": stats.grace_period_applications,
        "memoizedReports": {
            "total": stats.memoized_reports.0,
            "valid": stats.memoized_reports.1,
        },
    })
}

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}
