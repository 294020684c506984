use anyhow::{anyhow, Error};
use clap::{Parser, Subcommand};
use meteo_mart_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_DATABASE, DEFAULT_DATA_DIR,
};
use slog::{o, Drain, Level, Logger};
use std::env;
use time::{macros::format_description, Date};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "meteo-mart pipeline - fetches daily city weather and builds KPI tables"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $METEO_PIPELINE_CONFIG, ./pipeline.toml,
    /// $XDG_CONFIG_HOME/meteo-mart/pipeline.toml, /etc/meteo-mart/pipeline.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "METEO_PIPELINE_LEVEL")]
    pub level: Option<String>,

    /// Base directory for the raw/clean/gold data zones
    #[arg(short, long, env = "METEO_PIPELINE_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Destination warehouse database file (DuckDB)
    #[arg(long, env = "METEO_PIPELINE_DATABASE")]
    pub database: Option<String>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Stage>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Stage {
    /// Fetch raw observations for the city roster
    Fetch,
    /// Flatten a raw batch into the silver (clean) table
    Clean {
        /// Raw partition to clean; defaults to the latest one
        #[arg(long)]
        run_date: Option<String>,
    },
    /// Build gold KPI tables from the full silver history
    Gold,
    /// Upsert silver/gold partitions into the warehouse
    Load,
    /// Run all four stages in order (the default)
    Run,
}

impl Cli {
    /// Get the effective configuration value with defaults
    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
    }

    pub fn database(&self) -> String {
        self.database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    // Determine config file path
    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("METEO_PIPELINE_CONFIG", "pipeline.toml")
    };

    // Load from config file
    let file_config: Cli = load_config(&source).unwrap_or_default();

    // CLI args override file config (env vars are handled by clap)
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        data_dir: cli_args.data_dir.or(file_config.data_dir),
        database: cli_args.database.or(file_config.database),
        command: cli_args.command,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = if let Some(level) = cli.level.as_ref() {
        parse_log_level(level)
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_default();
        parse_log_level(&rust_log)
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

/// Format a date the way partition names and record dates are stored
pub fn format_date(date: Date) -> Result<String, Error> {
    let iso_date = format_description!("[year]-[month]-[day]");
    date.format(&iso_date)
        .map_err(|e| anyhow!("error formatting date: {}", e))
}

/// Parse a YYYY-MM-DD date string
pub fn parse_date(value: &str) -> Result<Date, Error> {
    let iso_date = format_description!("[year]-[month]-[day]");
    Date::parse(value, &iso_date).map_err(|e| anyhow!("error parsing date '{}': {}", value, e))
}
