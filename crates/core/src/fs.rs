//! Filesystem utilities for the data-zone partition layout
//!
//! Every pipeline run writes its output under `<data_dir>/<zone>/<run_date>/`,
//! so "find the latest run" is a directory-name sort, not a file-mtime scan.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

/// Create a directory and all parent directories if they don't exist
///
/// This is a wrapper around `std::fs::create_dir_all` with logging.
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Path of one run's partition directory inside a data zone
pub fn partition_dir(data_dir: &str, zone: &str, run_date: &str) -> PathBuf {
    Path::new(data_dir).join(zone).join(run_date)
}

/// Partition directory names present in a zone, sorted ascending
///
/// Partition names are run_dates in YYYY-MM-DD form, so the lexicographic
/// sort is also the chronological one. A missing zone directory is treated
/// as an empty zone.
pub fn list_partitions(data_dir: &str, zone: &str) -> io::Result<Vec<String>> {
    let zone_dir = Path::new(data_dir).join(zone);
    if !zone_dir.is_dir() {
        return Ok(vec![]);
    }

    let mut partitions = vec![];
    for entry in fs::read_dir(&zone_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                partitions.push(name.to_owned());
            }
        }
    }
    partitions.sort();
    Ok(partitions)
}

/// The most recent partition name in a zone, if any
pub fn latest_partition(data_dir: &str, zone: &str) -> io::Result<Option<String>> {
    Ok(list_partitions(data_dir, zone)?.pop())
}
