use std::fs;
use std::path::{Path, PathBuf};

use duckdb::Connection;
use glob::glob;
use itertools::Itertools;
use meteo_mart_core::{CLEAN_ZONE, GOLD_ZONE};
use slog::{info, warn, Logger};

use crate::{DAILY_ENRICHED_FILE, DAILY_KPIS_FILE, MONTHLY_KPIS_FILE, SILVER_FILE};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid partition glob '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("partition file {0} has no run_date directory")]
    BadPartitionPath(String),
}

/// What to do when an incoming row collides with an existing conflict key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Keep the existing row (idempotent insert)
    Skip,
    /// Refresh every non-key column from the incoming row
    UpdateNonKeyColumns,
}

/// Conflict handling for one bulk upsert, passed explicitly into
/// [`Warehouse::load_table`].
#[derive(Debug, Clone)]
pub struct UpsertSpec {
    pub conflict_keys: Vec<String>,
    pub on_conflict: OnConflict,
}

impl UpsertSpec {
    pub fn new(conflict_keys: &[&str], on_conflict: OnConflict) -> Self {
        Self {
            conflict_keys: conflict_keys.iter().map(|key| key.to_string()).collect(),
            on_conflict,
        }
    }

    pub fn skip(conflict_keys: &[&str]) -> Self {
        Self::new(conflict_keys, OnConflict::Skip)
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS weather_silver (
    run_date   TEXT,
    city_code  TEXT NOT NULL,
    date       TEXT NOT NULL,
    temp_min   DOUBLE,
    temp_max   DOUBLE,
    temp_avg   DOUBLE,
    precip_mm  DOUBLE,
    UNIQUE (city_code, date)
);
CREATE TABLE IF NOT EXISTS weather_daily (
    run_date   TEXT,
    city_code  TEXT NOT NULL,
    date       TEXT NOT NULL,
    temp_min   DOUBLE,
    temp_max   DOUBLE,
    temp_avg   DOUBLE,
    temp_range DOUBLE,
    precip_mm  DOUBLE,
    UNIQUE (city_code, date)
);
CREATE TABLE IF NOT EXISTS weather_monthly_kpis (
    run_date     TEXT,
    city_code    TEXT NOT NULL,
    month        TEXT NOT NULL,
    avg_temp_min DOUBLE,
    avg_temp_max DOUBLE,
    avg_temp_avg DOUBLE,
    total_precip DOUBLE,
    UNIQUE (city_code, month)
);
CREATE TABLE IF NOT EXISTS weather_daily_kpis (
    run_date      TEXT NOT NULL,
    city_code     TEXT NOT NULL,
    avg_temp_min  DOUBLE,
    avg_temp_max  DOUBLE,
    avg_precip_mm DOUBLE,
    UNIQUE (city_code, run_date)
);
"#;

/// Handle to the destination warehouse.
///
/// Owns the one connection a pipeline run shares across all its load calls;
/// dropping it releases the database.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open (creating if missing) the warehouse database file and make sure
    /// the destination tables exist.
    pub fn open(path: &str) -> Result<Self, LoadError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let warehouse = Self { conn };
        warehouse.ensure_schema()?;
        Ok(warehouse)
    }

    pub fn open_in_memory() -> Result<Self, LoadError> {
        let conn = Connection::open_in_memory()?;
        let warehouse = Self { conn };
        warehouse.ensure_schema()?;
        Ok(warehouse)
    }

    fn ensure_schema(&self) -> Result<(), LoadError> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Column names of a destination table, in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, LoadError> {
        let sql = format!("SELECT name FROM pragma_table_info('{}')", table);
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn table_row_count(&self, table: &str) -> Result<i64, LoadError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Column names present in a parquet file
    fn parquet_columns(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let sql = format!(
            "DESCRIBE SELECT * FROM read_parquet('{}')",
            sql_path(path)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Bulk-upsert every partition file matching `pattern` into `table`.
    ///
    /// Per file: derives run_date from the partition directory name and
    /// injects it when the file lacks the column, restricts to the
    /// allowlisted columns actually present, dedups on the conflict keys
    /// within the file, and resolves collisions per the upsert spec. The
    /// conflict clause is built from the destination table's live column
    /// set. Returns the number of rows the engine actually changed; no
    /// matching files is not an error.
    pub fn load_table(
        &self,
        logger: &Logger,
        data_dir: &str,
        pattern: &str,
        table: &str,
        columns: &[&str],
        spec: &UpsertSpec,
    ) -> Result<usize, LoadError> {
        let full_pattern = format!("{}/{}", data_dir, pattern);
        let mut paths: Vec<PathBuf> = glob(&full_pattern)
            .map_err(|source| LoadError::Pattern {
                pattern: full_pattern.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .collect();
        paths.sort();

        if paths.is_empty() {
            warn!(logger, "no files found for pattern: {}", full_pattern);
            return Ok(0);
        }
        info!(
            logger,
            "loading table '{}' from {} partition files",
            table,
            paths.len()
        );

        let table_columns = self.table_columns(table)?;
        let mut total = 0;
        for path in &paths {
            let run_date = path
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
                .map(str::to_owned)
                .ok_or_else(|| LoadError::BadPartitionPath(path.display().to_string()))?;
            let file_columns = self.parquet_columns(path)?;

            let mut insert_columns: Vec<&str> = vec![];
            let mut select_exprs: Vec<String> = vec![];
            for &column in columns {
                if file_columns.iter().any(|c| c == column) {
                    insert_columns.push(column);
                    if column == "run_date" {
                        // Partition-derived fallback for files carrying nulls
                        select_exprs
                            .push(format!("COALESCE(run_date, '{}') AS run_date", run_date));
                    } else {
                        select_exprs.push(column.to_string());
                    }
                } else if column == "run_date" {
                    insert_columns.push(column);
                    select_exprs.push(format!("'{}' AS run_date", run_date));
                }
            }
            if insert_columns.is_empty() {
                warn!(
                    logger,
                    "no allowlisted columns present in {}, skipping",
                    path.display()
                );
                continue;
            }

            let conflict_keys: Vec<&str> = spec
                .conflict_keys
                .iter()
                .map(String::as_str)
                .filter(|key| insert_columns.contains(key))
                .collect();

            let source_sql = if conflict_keys.is_empty() {
                format!(
                    "SELECT {} FROM read_parquet('{}')",
                    select_exprs.iter().join(", "),
                    sql_path(path)
                )
            } else {
                format!(
                    "SELECT DISTINCT ON ({keys}) {exprs} FROM read_parquet('{path}') ORDER BY {keys}",
                    keys = conflict_keys.iter().join(", "),
                    exprs = select_exprs.iter().join(", "),
                    path = sql_path(path)
                )
            };

            let conflict_sql = conflict_clause(&conflict_keys, &insert_columns, &table_columns, spec);
            let sql = format!(
                "INSERT INTO {} ({}) {}{}",
                table,
                insert_columns.iter().join(", "),
                source_sql,
                conflict_sql
            );
            let changed = self.conn.execute(&sql, [])?;
            info!(logger, "loaded {} rows from {}", changed, path.display());
            total += changed;
        }

        info!(logger, "loaded {} rows into {}", total, table);
        Ok(total)
    }
}

/// The ON CONFLICT clause for one upsert, derived from the destination
/// table's actual column set rather than a hardcoded list.
fn conflict_clause(
    conflict_keys: &[&str],
    insert_columns: &[&str],
    table_columns: &[String],
    spec: &UpsertSpec,
) -> String {
    if conflict_keys.is_empty() {
        return String::new();
    }
    let keys = conflict_keys.iter().join(", ");
    match spec.on_conflict {
        OnConflict::Skip => format!(" ON CONFLICT ({}) DO NOTHING", keys),
        OnConflict::UpdateNonKeyColumns => {
            let updates: Vec<String> = table_columns
                .iter()
                .filter(|column| {
                    !conflict_keys.contains(&column.as_str())
                        && insert_columns.contains(&column.as_str())
                })
                .map(|column| format!("{0} = excluded.{0}", column))
                .collect();
            if updates.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", keys)
            } else {
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    keys,
                    updates.join(", ")
                )
            }
        }
    }
}

fn sql_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

/// The standard four loads of one pipeline run, sharing one connection.
pub fn run_load_stage(
    logger: &Logger,
    data_dir: &str,
    warehouse: &Warehouse,
) -> Result<usize, LoadError> {
    let mut total = 0;
    total += warehouse.load_table(
        logger,
        data_dir,
        &format!("{}/*/{}", CLEAN_ZONE, SILVER_FILE),
        "weather_silver",
        &[
            "run_date",
            "city_code",
            "date",
            "temp_min",
            "temp_max",
            "temp_avg",
            "precip_mm",
        ],
        &UpsertSpec::skip(&["city_code", "date"]),
    )?;
    total += warehouse.load_table(
        logger,
        data_dir,
        &format!("{}/*/{}", GOLD_ZONE, DAILY_ENRICHED_FILE),
        "weather_daily",
        &[
            "run_date",
            "city_code",
            "date",
            "temp_min",
            "temp_max",
            "temp_avg",
            "temp_range",
            "precip_mm",
        ],
        &UpsertSpec::skip(&["city_code", "date"]),
    )?;
    total += warehouse.load_table(
        logger,
        data_dir,
        &format!("{}/*/{}", GOLD_ZONE, MONTHLY_KPIS_FILE),
        "weather_monthly_kpis",
        &[
            "run_date",
            "city_code",
            "month",
            "avg_temp_min",
            "avg_temp_max",
            "avg_temp_avg",
            "total_precip",
        ],
        &UpsertSpec::skip(&["city_code", "month"]),
    )?;
    total += warehouse.load_table(
        logger,
        data_dir,
        &format!("{}/*/{}", GOLD_ZONE, DAILY_KPIS_FILE),
        "weather_daily_kpis",
        &[
            "run_date",
            "city_code",
            "avg_temp_min",
            "avg_temp_max",
            "avg_precip_mm",
        ],
        &UpsertSpec::skip(&["city_code", "run_date"]),
    )?;
    Ok(total)
}
