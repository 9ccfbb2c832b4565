use std::path::PathBuf;

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the cached entry for a date if it is fresh
    Get {
        /// Date (YYYY-MM-DD, UTC)
        date: String,
    },
    /// Serve a date from cache, rebuilding it from <source>/<date>.json on miss
    Build {
        date: String,
        /// Directory holding pre-built day summaries
        #[arg(long)]
        source: PathBuf,
    },
    /// Store a day summary read from a JSON file
    Save {
        date: String,
        #[arg(long)]
        file: PathBuf,
        /// Keep the row provisional (subject to TTL) instead of marking it complete
        #[arg(long)]
        current: bool,
    },
    /// Aggregate every cached day in [start, end]
    Range {
        start: String,
        end: String,
        /// Rows per breakdown in text output
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Drop today's entry so the next read rebuilds it
    InvalidateToday,
    /// Delete entries older than the retention window
    Cleanup {
        /// Overrides USAGE_CACHE_RETENTION_DAYS
        #[arg(long, allow_negative_numbers = true)]
        retention_days: Option<i64>,
    },
    /// Row count and policy counters
    Stats,
}

#[derive(clap::Parser, Debug)]
#[command(name = "usage-cache", about = "Daily usage cache and range aggregation")]
pub struct Args {
    /// Database path. Defaults to the platform data directory
    #[arg(long, env = "USAGE_CACHE_DB_PATH")]
    pub db: Option<PathBuf>,

    /// Freshness window for current-day rows, in minutes
    #[arg(long)]
    pub ttl_minutes: Option<i64>,

    /// Minutes after midnight UTC during which yesterday still counts as current
    #[arg(long)]
    pub grace_minutes: Option<i64>,

    /// Emit JSON instead of colored text
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging to stderr (or set RUST_LOG)
    #[arg(long, env = "USAGE_CACHE_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn parse() -> Self {
        <Args as clap::Parser>::parse()
    }
}
