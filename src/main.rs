use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use daily_usage_cache::builder::JsonDirDayBuilder;
use daily_usage_cache::cache::QueryCache;
use daily_usage_cache::cli::{Args, Command};
use daily_usage_cache::clock::SystemClock;
use daily_usage_cache::config::CacheConfig;
use daily_usage_cache::db::SqliteStore;
use daily_usage_cache::display::{
    build_entry_json, build_report_json, build_stats_json, print_json, render_entry_text,
    render_report_text, render_stats_text,
};
use daily_usage_cache::manager::DailyUsageCacheManager;
use daily_usage_cache::models::DailyUsage;
use daily_usage_cache::utils::{default_db_path, format_date, parse_date};

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(args: &Args) -> Result<CacheConfig> {
    let mut config = CacheConfig::from_env();
    if let Some(ttl) = args.ttl_minutes {
        config.ttl_minutes = ttl;
    }
    if let Some(grace) = args.grace_minutes {
        config.grace_period_minutes = grace;
    }
    if let Some(db) = &args.db {
        config.db_path = Some(db.clone());
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = resolve_config(&args)?;
    let db_path = match &config.db_path {
        Some(p) => p.clone(),
        None => default_db_path()?,
    };
    let store = Arc::new(
        SqliteStore::open(&db_path).with_context(|| format!("open {}", db_path.display()))?,
    );
    let clock = Arc::new(SystemClock);
    let query_cache = Arc::new(QueryCache::new(config.query_cache_ttl(), clock.clone()));
    let manager = DailyUsageCacheManager::new(store, clock, &config)?.with_query_cache(query_cache);

    match args.command {
        Command::Get { date } => {
            let date = parse_date(&date)?;
            match manager.get_cached_daily_data(date)? {
                Some(entry) if args.json => print_json(&build_entry_json(&entry)),
                Some(entry) => print!("{}", render_entry_text(&entry)),
                None if args.json => println!("null"),
                None => println!("{}: no fresh data", format_date(date)),
            }
        }
        Command::Build { date, source } => {
            let date = parse_date(&date)?;
            let builder = JsonDirDayBuilder::new(source);
            let entry = manager.get_or_build(date, &builder)?;
            if args.json {
                print_json(&build_entry_json(&entry));
            } else {
                print!("{}", render_entry_text(&entry));
            }
        }
        Command::Save {
            date,
            file,
            current,
        } => {
            let date = parse_date(&date)?;
            let bytes = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let usage: DailyUsage = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", file.display()))?;
            let entry = manager.save_to_daily_cache(date, usage, current)?;
            if args.json {
                print_json(&build_entry_json(&entry));
            } else {
                print!("{}", render_entry_text(&entry));
            }
        }
        Command::Range { start, end, top } => {
            let report = manager.get_date_range_data(&start, &end)?;
            if args.json {
                print_json(&build_report_json(&report));
            } else {
                print!("{}", render_report_text(&report, top));
            }
        }
        Command::InvalidateToday => {
            let removed = manager.invalidate_today_cache()?;
            if args.json {
                print_json(&serde_json::json!({ "removed": removed }));
            } else if removed {
                println!("{}: invalidated", format_date(manager.today()));
            } else {
                println!("{}: nothing cached", format_date(manager.today()));
            }
        }
        Command::Cleanup { retention_days } => {
            let days = retention_days.unwrap_or(config.retention_days);
            let deleted = manager.cleanup_old_cache(days)?;
            if args.json {
                print_json(&serde_json::json!({ "deleted": deleted, "retentionDays": days }));
            } else {
                println!("deleted {deleted} entries older than {days} days");
            }
        }
        Command::Stats => {
            let stats = manager.stats()?;
            if args.json {
                print_json(&build_stats_json(&stats));
            } else {
                print!("{}", render_stats_text(&stats));
            }
        }
    }

    Ok(())
}
