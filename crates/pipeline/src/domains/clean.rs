use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Error};
use meteo_mart_core::{create_dir_all, latest_partition, partition_dir, CLEAN_ZONE, RAW_ZONE};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::schema::types::Type;
use parquet_derive::ParquetRecordWriter;
use slog::{info, warn, Logger};

use crate::{
    double_field, field_f64, field_str, utf8_field, write_csv_sample, write_parquet, RawBatch,
    RAW_FILE,
};

/// Silver table filename inside a clean partition
pub const SILVER_FILE: &str = "weather.parquet";
const SILVER_SAMPLE_FILE: &str = "weather_sample.csv";

const SILVER_CSV_HEADER: &str =
    "run_date,city_code,date,temp_max,temp_min,temp_avg,temp_range,precip_mm";

/// One silver row: a single city-date observation with derived metrics.
///
/// temp_avg and temp_range are always recomputed from temp_max/temp_min,
/// never taken from the source.
#[derive(Debug, Clone, PartialEq, ParquetRecordWriter)]
pub struct TidyRecord {
    pub run_date: String,
    pub city_code: String,
    pub date: String,
    pub temp_max: f64,
    pub temp_min: f64,
    pub temp_avg: f64,
    pub temp_range: f64,
    pub precip_mm: f64,
}

impl TidyRecord {
    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.run_date,
            self.city_code,
            self.date,
            self.temp_max,
            self.temp_min,
            self.temp_avg,
            self.temp_range,
            self.precip_mm
        )
    }
}

pub fn silver_schema() -> Type {
    Type::group_type_builder("tidy_record")
        .with_fields(vec![
            utf8_field("run_date"),
            utf8_field("city_code"),
            utf8_field("date"),
            double_field("temp_max"),
            double_field("temp_min"),
            double_field("temp_avg"),
            double_field("temp_range"),
            double_field("precip_mm"),
        ])
        .build()
        .unwrap()
}

/// Flatten a raw batch into one row per (city, date).
///
/// The parallel daily arrays are zipped positionally; misaligned lengths
/// truncate to the shortest array, and a date entry with a null metric is
/// skipped.
pub fn flatten_batch(batch: &RawBatch) -> Vec<TidyRecord> {
    let mut rows = vec![];
    for city in &batch.data {
        let daily = &city.daily;
        let len = daily
            .time
            .len()
            .min(daily.temperature_2m_max.len())
            .min(daily.temperature_2m_min.len())
            .min(daily.precipitation_sum.len());
        for i in 0..len {
            let (Some(temp_max), Some(temp_min), Some(precip_mm)) = (
                daily.temperature_2m_max[i],
                daily.temperature_2m_min[i],
                daily.precipitation_sum[i],
            ) else {
                continue;
            };
            rows.push(TidyRecord {
                run_date: batch.run_date.clone(),
                city_code: city.city_code.clone(),
                date: daily.time[i].clone(),
                temp_max,
                temp_min,
                temp_avg: (temp_max + temp_min) / 2.0,
                temp_range: temp_max - temp_min,
                precip_mm,
            });
        }
    }
    rows
}

/// Clean one raw partition into the silver zone.
///
/// `run_date` defaults to the latest raw partition. Returns the silver file
/// path, or None when there is nothing to clean. An empty raw batch still
/// produces a (zero-row) silver partition.
pub fn run_clean_stage(
    logger: &Logger,
    data_dir: &str,
    run_date: Option<&str>,
) -> Result<Option<PathBuf>, Error> {
    let run_date = match run_date {
        Some(value) => value.to_string(),
        None => match latest_partition(data_dir, RAW_ZONE)? {
            Some(value) => value,
            None => {
                warn!(logger, "no raw partitions found, nothing to clean");
                return Ok(None);
            }
        },
    };

    let raw_path = partition_dir(data_dir, RAW_ZONE, &run_date).join(RAW_FILE);
    let content = fs::read_to_string(&raw_path)
        .map_err(|e| anyhow!("failed to read raw batch {}: {}", raw_path.display(), e))?;
    let batch: RawBatch = serde_json::from_str(&content)
        .map_err(|e| anyhow!("failed to parse raw batch {}: {}", raw_path.display(), e))?;

    let rows = flatten_batch(&batch);

    let out_dir = partition_dir(data_dir, CLEAN_ZONE, &run_date);
    create_dir_all(&out_dir)
        .map_err(|e| anyhow!("error creating clean partition {}: {}", out_dir.display(), e))?;
    let out_path = out_dir.join(SILVER_FILE);
    write_parquet(&rows, silver_schema(), &out_path)?;
    write_csv_sample(
        &out_dir.join(SILVER_SAMPLE_FILE),
        SILVER_CSV_HEADER,
        rows.iter().map(TidyRecord::csv_line),
    )?;

    info!(
        logger,
        "clean saved: {} rows={}",
        out_path.display(),
        rows.len()
    );
    Ok(Some(out_path))
}

/// Read one silver parquet file back into rows.
pub fn read_silver_partition(path: &Path) -> Result<Vec<TidyRecord>, Error> {
    let file = File::open(path)
        .map_err(|e| anyhow!("failed to open silver file {}: {}", path.display(), e))?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| anyhow!("failed to read silver file {}: {}", path.display(), e))?;

    let mut records = vec![];
    for row in reader
        .get_row_iter(None)
        .map_err(|e| anyhow!("failed to iterate silver rows: {}", e))?
    {
        let row = row.map_err(|e| anyhow!("failed to decode silver row: {}", e))?;
        let mut run_date = None;
        let mut city_code = None;
        let mut date = None;
        let mut temp_max = None;
        let mut temp_min = None;
        let mut temp_avg = None;
        let mut temp_range = None;
        let mut precip_mm = None;
        for (name, field) in row.get_column_iter() {
            match name.as_str() {
                "run_date" => run_date = field_str(field),
                "city_code" => city_code = field_str(field),
                "date" => date = field_str(field),
                "temp_max" => temp_max = field_f64(field),
                "temp_min" => temp_min = field_f64(field),
                "temp_avg" => temp_avg = field_f64(field),
                "temp_range" => temp_range = field_f64(field),
                "precip_mm" => precip_mm = field_f64(field),
                _ => {}
            }
        }
        match (
            run_date, city_code, date, temp_max, temp_min, temp_avg, temp_range, precip_mm,
        ) {
            (
                Some(run_date),
                Some(city_code),
                Some(date),
                Some(temp_max),
                Some(temp_min),
                Some(temp_avg),
                Some(temp_range),
                Some(precip_mm),
            ) => records.push(TidyRecord {
                run_date,
                city_code,
                date,
                temp_max,
                temp_min,
                temp_avg,
                temp_range,
                precip_mm,
            }),
            _ => {
                return Err(anyhow!(
                    "silver row in {} has missing or mistyped values",
                    path.display()
                ))
            }
        }
    }
    Ok(records)
}
