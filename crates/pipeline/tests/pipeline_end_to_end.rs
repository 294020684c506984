//! Full pipeline scenario: a raw batch is cleaned, aggregated, and loaded
//! into the warehouse, and re-loading the same partitions changes nothing.

use std::fs;

use meteo_mart_core::{partition_dir, CLEAN_ZONE, RAW_ZONE};
use pipeline::{
    read_silver_partition, run_clean_stage, run_gold_stage, run_load_stage, Warehouse,
    DAILY_ENRICHED_FILE, DAILY_KPIS_FILE, MONTHLY_KPIS_FILE, RAW_FILE, SILVER_FILE,
};
use slog::{o, Discard, Logger};

fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

const RAW_BATCH: &str = r#"{
    "run_date": "2025-01-15",
    "data": [{
        "_city_code": "BUE",
        "_start_date": "2024-12-16",
        "_end_date": "2025-01-14",
        "daily": {
            "time": ["2025-01-10", "2025-01-11"],
            "temperature_2m_max": [30.0, 28.0],
            "temperature_2m_min": [20.0, 18.0],
            "precipitation_sum": [0.0, 5.2]
        }
    }]
}"#;

#[test]
fn scenario_raw_to_warehouse_and_idempotent_reload() {
    let logger = test_logger();
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().to_str().unwrap();

    // Seed the raw zone the way the fetch stage would
    let raw_dir = partition_dir(data_dir, RAW_ZONE, "2025-01-15");
    fs::create_dir_all(&raw_dir).unwrap();
    fs::write(raw_dir.join(RAW_FILE), RAW_BATCH).unwrap();

    // Clean
    let silver_path = run_clean_stage(&logger, data_dir, None).unwrap().unwrap();
    assert_eq!(
        silver_path,
        partition_dir(data_dir, CLEAN_ZONE, "2025-01-15").join(SILVER_FILE)
    );
    let silver = read_silver_partition(&silver_path).unwrap();
    assert_eq!(silver.len(), 2);
    assert_eq!(silver[0].temp_avg, 25.0);
    assert_eq!(silver[0].temp_range, 10.0);
    assert_eq!(silver[1].temp_avg, 23.0);
    assert_eq!(silver[1].temp_range, 10.0);

    // Gold (aggregation run tagged with its own run_date)
    let gold_dir = run_gold_stage(&logger, data_dir, "2025-01-16")
        .unwrap()
        .unwrap();
    for file in [DAILY_ENRICHED_FILE, DAILY_KPIS_FILE, MONTHLY_KPIS_FILE] {
        assert!(gold_dir.join(file).exists(), "missing gold file {file}");
    }
    assert!(gold_dir.join("weather_daily_enriched_sample.csv").exists());
    assert!(gold_dir.join("weather_monthly_kpis_sample.csv").exists());

    // Load
    let db_path = tmp.path().join("warehouse.duckdb");
    let warehouse = Warehouse::open(db_path.to_str().unwrap()).unwrap();
    let loaded = run_load_stage(&logger, data_dir, &warehouse).unwrap();
    assert_eq!(loaded, 6);
    assert_eq!(warehouse.table_row_count("weather_silver").unwrap(), 2);
    assert_eq!(warehouse.table_row_count("weather_daily").unwrap(), 2);
    assert_eq!(warehouse.table_row_count("weather_monthly_kpis").unwrap(), 1);
    assert_eq!(warehouse.table_row_count("weather_daily_kpis").unwrap(), 1);

    // Re-running the load against the same partitions is a no-op
    let reloaded = run_load_stage(&logger, data_dir, &warehouse).unwrap();
    assert_eq!(reloaded, 0);
    assert_eq!(warehouse.table_row_count("weather_silver").unwrap(), 2);
    assert_eq!(warehouse.table_row_count("weather_daily").unwrap(), 2);
    assert_eq!(warehouse.table_row_count("weather_monthly_kpis").unwrap(), 1);
    assert_eq!(warehouse.table_row_count("weather_daily_kpis").unwrap(), 1);
}

#[test]
fn scenario_empty_raw_batch_yields_empty_silver() {
    let logger = test_logger();
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().to_str().unwrap();

    let raw_dir = partition_dir(data_dir, RAW_ZONE, "2025-01-16");
    fs::create_dir_all(&raw_dir).unwrap();
    fs::write(
        raw_dir.join(RAW_FILE),
        r#"{"run_date": "2025-01-16", "data": []}"#,
    )
    .unwrap();

    let silver_path = run_clean_stage(&logger, data_dir, None).unwrap().unwrap();
    assert!(silver_path.exists());
    assert!(read_silver_partition(&silver_path).unwrap().is_empty());
}
