//! meteo-mart Core Library
//!
//! Shared utilities for the weather pipeline stages:
//! - Configuration loading (XDG-compliant)
//! - Data-zone partition helpers
//! - Common constants

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::{create_dir_all, latest_partition, list_partitions, partition_dir};

/// Application name used for XDG paths
pub const APP_NAME: &str = "meteo-mart";

/// Default base directory for the raw/clean/gold zones
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default destination warehouse file
pub const DEFAULT_DATABASE: &str = "./data/warehouse.duckdb";

/// Data-zone directory names under the base data dir; each zone holds one
/// partition directory per pipeline run, named by run_date (YYYY-MM-DD).
pub const RAW_ZONE: &str = "raw";
pub const CLEAN_ZONE: &str = "clean";
pub const GOLD_ZONE: &str = "gold";
