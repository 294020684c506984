use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use anyhow::anyhow;
use meteo_mart_core::{create_dir_all, partition_dir, CLEAN_ZONE, GOLD_ZONE};
use parquet::schema::types::Type;
use parquet_derive::ParquetRecordWriter;
use slog::{info, warn, Logger};
use time::Date;

use crate::{
    csv_opt, double_field, file_columns, format_date, optional_double_field, parse_date,
    read_silver_partition, utf8_field, write_csv_sample, write_parquet, SILVER_FILE,
};

pub const DAILY_ENRICHED_FILE: &str = "weather_daily_enriched.parquet";
pub const DAILY_KPIS_FILE: &str = "weather_daily_kpis.parquet";
pub const MONTHLY_KPIS_FILE: &str = "weather_monthly_kpis.parquet";

const DAILY_ENRICHED_SAMPLE_FILE: &str = "weather_daily_enriched_sample.csv";
const DAILY_KPIS_SAMPLE_FILE: &str = "weather_daily_kpis_sample.csv";
const MONTHLY_KPIS_SAMPLE_FILE: &str = "weather_monthly_kpis_sample.csv";

/// Columns every silver file must carry before aggregation may start
pub const REQUIRED_COLUMNS: &[&str] = &[
    "run_date",
    "city_code",
    "date",
    "temp_max",
    "temp_min",
    "temp_avg",
    "temp_range",
    "precip_mm",
];

const ROLLING_SHORT: usize = 7;
const ROLLING_LONG: usize = 14;

#[derive(thiserror::Error, Debug)]
pub enum GoldError {
    #[error("silver file {file} is missing required columns: {missing:?}")]
    MissingColumns { file: String, missing: Vec<String> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One silver observation with its date parsed, ready to aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub city_code: String,
    pub date: Date,
    pub temp_max: f64,
    pub temp_min: f64,
    pub temp_avg: f64,
    pub temp_range: f64,
    pub precip_mm: f64,
}

/// One enriched daily KPI row per (city, date).
#[derive(Debug, Clone, PartialEq)]
pub struct DailyKpi {
    pub city_code: String,
    pub date: Date,
    pub temp_max: f64,
    pub temp_min: f64,
    pub temp_avg: f64,
    pub temp_range: f64,
    pub precip_mm: f64,
    pub avg_max_7d: f64,
    pub avg_min_7d: f64,
    pub avg_max_14d: f64,
    pub avg_min_14d: f64,
    pub temp_min_ly: Option<f64>,
    pub temp_max_ly: Option<f64>,
    pub temp_min_yoy_pct: Option<f64>,
    pub temp_max_yoy_pct: Option<f64>,
}

impl DailyKpi {
    fn round_metrics(&mut self) {
        self.temp_max = round1(self.temp_max);
        self.temp_min = round1(self.temp_min);
        self.temp_avg = round1(self.temp_avg);
        self.temp_range = round1(self.temp_range);
        self.precip_mm = round1(self.precip_mm);
        self.avg_max_7d = round1(self.avg_max_7d);
        self.avg_min_7d = round1(self.avg_min_7d);
        self.avg_max_14d = round1(self.avg_max_14d);
        self.avg_min_14d = round1(self.avg_min_14d);
        self.temp_min_ly = self.temp_min_ly.map(round1);
        self.temp_max_ly = self.temp_max_ly.map(round1);
        self.temp_min_yoy_pct = self.temp_min_yoy_pct.map(round1);
        self.temp_max_yoy_pct = self.temp_max_yoy_pct.map(round1);
    }
}

/// Persisted form of [`DailyKpi`], with the date formatted for storage.
#[derive(Debug, Clone, PartialEq, ParquetRecordWriter)]
pub struct DailyKpiRow {
    pub city_code: String,
    pub date: String,
    pub temp_max: f64,
    pub temp_min: f64,
    pub temp_avg: f64,
    pub temp_range: f64,
    pub precip_mm: f64,
    pub avg_max_7d: f64,
    pub avg_min_7d: f64,
    pub avg_max_14d: f64,
    pub avg_min_14d: f64,
    pub temp_min_ly: Option<f64>,
    pub temp_max_ly: Option<f64>,
    pub temp_min_yoy_pct: Option<f64>,
    pub temp_max_yoy_pct: Option<f64>,
}

impl TryFrom<&DailyKpi> for DailyKpiRow {
    type Error = anyhow::Error;
    fn try_from(kpi: &DailyKpi) -> Result<Self, Self::Error> {
        Ok(DailyKpiRow {
            city_code: kpi.city_code.clone(),
            date: format_date(kpi.date)?,
            temp_max: kpi.temp_max,
            temp_min: kpi.temp_min,
            temp_avg: kpi.temp_avg,
            temp_range: kpi.temp_range,
            precip_mm: kpi.precip_mm,
            avg_max_7d: kpi.avg_max_7d,
            avg_min_7d: kpi.avg_min_7d,
            avg_max_14d: kpi.avg_max_14d,
            avg_min_14d: kpi.avg_min_14d,
            temp_min_ly: kpi.temp_min_ly,
            temp_max_ly: kpi.temp_max_ly,
            temp_min_yoy_pct: kpi.temp_min_yoy_pct,
            temp_max_yoy_pct: kpi.temp_max_yoy_pct,
        })
    }
}

impl DailyKpiRow {
    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.city_code,
            self.date,
            self.temp_max,
            self.temp_min,
            self.temp_avg,
            self.temp_range,
            self.precip_mm,
            self.avg_max_7d,
            self.avg_min_7d,
            self.avg_max_14d,
            self.avg_min_14d,
            csv_opt(self.temp_min_ly),
            csv_opt(self.temp_max_ly),
            csv_opt(self.temp_min_yoy_pct),
            csv_opt(self.temp_max_yoy_pct),
        )
    }
}

/// One monthly KPI row per (city, month).
#[derive(Debug, Clone, PartialEq, ParquetRecordWriter)]
pub struct MonthlyKpi {
    pub city_code: String,
    pub month: String,
    pub avg_temp_min: f64,
    pub avg_temp_max: f64,
    pub avg_temp_avg: f64,
    pub total_precip: f64,
}

impl MonthlyKpi {
    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.city_code,
            self.month,
            self.avg_temp_min,
            self.avg_temp_max,
            self.avg_temp_avg,
            self.total_precip
        )
    }
}

/// Per-city daily summary flattened for the load schema, one row per
/// (city, aggregation run_date).
#[derive(Debug, Clone, PartialEq, ParquetRecordWriter)]
pub struct DailyKpiSummary {
    pub run_date: String,
    pub city_code: String,
    pub avg_temp_min: f64,
    pub avg_temp_max: f64,
    pub avg_precip_mm: f64,
}

impl DailyKpiSummary {
    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.run_date, self.city_code, self.avg_temp_min, self.avg_temp_max, self.avg_precip_mm
        )
    }
}

pub fn daily_enriched_schema() -> Type {
    Type::group_type_builder("daily_kpi")
        .with_fields(vec![
            utf8_field("city_code"),
            utf8_field("date"),
            double_field("temp_max"),
            double_field("temp_min"),
            double_field("temp_avg"),
            double_field("temp_range"),
            double_field("precip_mm"),
            double_field("avg_max_7d"),
            double_field("avg_min_7d"),
            double_field("avg_max_14d"),
            double_field("avg_min_14d"),
            optional_double_field("temp_min_ly"),
            optional_double_field("temp_max_ly"),
            optional_double_field("temp_min_yoy_pct"),
            optional_double_field("temp_max_yoy_pct"),
        ])
        .build()
        .unwrap()
}

pub fn monthly_schema() -> Type {
    Type::group_type_builder("monthly_kpi")
        .with_fields(vec![
            utf8_field("city_code"),
            utf8_field("month"),
            double_field("avg_temp_min"),
            double_field("avg_temp_max"),
            double_field("avg_temp_avg"),
            double_field("total_precip"),
        ])
        .build()
        .unwrap()
}

pub fn daily_summary_schema() -> Type {
    Type::group_type_builder("daily_kpi_summary")
        .with_fields(vec![
            utf8_field("run_date"),
            utf8_field("city_code"),
            double_field("avg_temp_min"),
            double_field("avg_temp_max"),
            double_field("avg_precip_mm"),
        ])
        .build()
        .unwrap()
}

/// Trailing simple moving average over at most `window` values ending at
/// `idx`. Early positions use whatever is available (minimum one value).
fn trailing_mean(values: &[f64], idx: usize, window: usize) -> f64 {
    let start = (idx + 1).saturating_sub(window);
    let slice = &values[start..=idx];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// The same calendar day one year earlier; None when it does not exist
/// (Feb 29 looking back into a non-leap year).
fn prior_year_same_day(date: Date) -> Option<Date> {
    Date::from_calendar_date(date.year() - 1, date.month(), date.day()).ok()
}

/// Signed percentage change against the prior-year value. None when the
/// prior value is absent or exactly zero.
fn pct_change(current: f64, prior: Option<f64>) -> Option<f64> {
    match prior {
        Some(prior) if prior != 0.0 => Some((current - prior) / prior * 100.0),
        _ => None,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn month_key(date: Date) -> String {
    format!("{:04}-{:02}", date.year(), date.month() as u8)
}

/// Build the enriched daily KPI table from the full silver history.
///
/// Groups duplicate (city, date) observations, attaches 7/14-day trailing
/// means per city, joins the prior-year same-day values and derives the
/// YoY percentage deltas, then rounds every metric to one decimal.
pub fn build_daily_kpis(observations: &[Observation]) -> Vec<DailyKpi> {
    // BTreeMap keeps rows sorted by city then date, which the rolling pass
    // relies on.
    let mut grouped: BTreeMap<(String, Date), Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry((obs.city_code.clone(), obs.date))
            .or_default()
            .push(obs);
    }

    let mut daily: Vec<DailyKpi> = grouped
        .into_iter()
        .map(|((city_code, date), group)| {
            let count = group.len() as f64;
            DailyKpi {
                city_code,
                date,
                temp_max: group.iter().map(|o| o.temp_max).fold(f64::MIN, f64::max),
                temp_min: group.iter().map(|o| o.temp_min).fold(f64::MAX, f64::min),
                temp_avg: group.iter().map(|o| o.temp_avg).sum::<f64>() / count,
                temp_range: group.iter().map(|o| o.temp_range).sum::<f64>() / count,
                precip_mm: group.iter().map(|o| o.precip_mm).sum(),
                avg_max_7d: 0.0,
                avg_min_7d: 0.0,
                avg_max_14d: 0.0,
                avg_min_14d: 0.0,
                temp_min_ly: None,
                temp_max_ly: None,
                temp_min_yoy_pct: None,
                temp_max_yoy_pct: None,
            }
        })
        .collect();

    // Rolling means, one contiguous city run at a time; state never crosses
    // a city boundary.
    let mut start = 0;
    while start < daily.len() {
        let mut end = start + 1;
        while end < daily.len() && daily[end].city_code == daily[start].city_code {
            end += 1;
        }
        let max_values: Vec<f64> = daily[start..end].iter().map(|r| r.temp_max).collect();
        let min_values: Vec<f64> = daily[start..end].iter().map(|r| r.temp_min).collect();
        for (offset, row) in daily[start..end].iter_mut().enumerate() {
            row.avg_max_7d = trailing_mean(&max_values, offset, ROLLING_SHORT);
            row.avg_min_7d = trailing_mean(&min_values, offset, ROLLING_SHORT);
            row.avg_max_14d = trailing_mean(&max_values, offset, ROLLING_LONG);
            row.avg_min_14d = trailing_mean(&min_values, offset, ROLLING_LONG);
        }
        start = end;
    }

    // Year-over-year join against the table itself.
    let prior_year: HashMap<(String, Date), (f64, f64)> = daily
        .iter()
        .map(|row| {
            (
                (row.city_code.clone(), row.date),
                (row.temp_min, row.temp_max),
            )
        })
        .collect();
    for row in daily.iter_mut() {
        if let Some(prior_date) = prior_year_same_day(row.date) {
            if let Some(&(ly_min, ly_max)) = prior_year.get(&(row.city_code.clone(), prior_date)) {
                row.temp_min_ly = Some(ly_min);
                row.temp_max_ly = Some(ly_max);
            }
        }
        row.temp_min_yoy_pct = pct_change(row.temp_min, row.temp_min_ly);
        row.temp_max_yoy_pct = pct_change(row.temp_max, row.temp_max_ly);
    }

    for row in daily.iter_mut() {
        row.round_metrics();
    }
    daily
}

/// Monthly KPIs from the full per-observation history (not the daily KPI
/// table), so months with duplicate raw rows weigh by observation count.
pub fn build_monthly_kpis(observations: &[Observation]) -> Vec<MonthlyKpi> {
    let mut grouped: BTreeMap<(String, String), Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry((obs.city_code.clone(), month_key(obs.date)))
            .or_default()
            .push(obs);
    }

    grouped
        .into_iter()
        .map(|((city_code, month), group)| {
            let count = group.len() as f64;
            MonthlyKpi {
                city_code,
                month,
                avg_temp_min: round1(group.iter().map(|o| o.temp_min).sum::<f64>() / count),
                avg_temp_max: round1(group.iter().map(|o| o.temp_max).sum::<f64>() / count),
                avg_temp_avg: round1(group.iter().map(|o| o.temp_avg).sum::<f64>() / count),
                total_precip: round1(group.iter().map(|o| o.precip_mm).sum()),
            }
        })
        .collect()
}

/// Flatten the daily KPI table to one row per city for the load schema,
/// tagged with the aggregation run_date.
pub fn build_daily_summary(daily: &[DailyKpi], run_date: &str) -> Vec<DailyKpiSummary> {
    let mut grouped: BTreeMap<&str, Vec<&DailyKpi>> = BTreeMap::new();
    for row in daily {
        grouped.entry(&row.city_code).or_default().push(row);
    }

    grouped
        .into_iter()
        .map(|(city_code, group)| {
            let count = group.len() as f64;
            DailyKpiSummary {
                run_date: run_date.to_string(),
                city_code: city_code.to_string(),
                avg_temp_min: round1(group.iter().map(|r| r.temp_min).sum::<f64>() / count),
                avg_temp_max: round1(group.iter().map(|r| r.temp_max).sum::<f64>() / count),
                avg_precip_mm: round1(group.iter().map(|r| r.precip_mm).sum::<f64>() / count),
            }
        })
        .collect()
}

/// Build the gold partition for `run_date` from all silver partitions.
///
/// Always recomputes from the full silver history. Returns the gold
/// partition directory, or None when there is no silver data at all.
/// A silver file missing required columns aborts with nothing written.
pub fn run_gold_stage(
    logger: &Logger,
    data_dir: &str,
    run_date: &str,
) -> Result<Option<PathBuf>, GoldError> {
    let pattern = format!("{}/{}/*/{}", data_dir, CLEAN_ZONE, SILVER_FILE);
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| anyhow!("invalid silver glob {}: {}", pattern, e))?
        .filter_map(Result::ok)
        .collect();
    paths.sort();

    if paths.is_empty() {
        warn!(logger, "no clean (silver) partitions found");
        return Ok(None);
    }

    // Validate every file before reading anything, so a bad partition can
    // never leave a half-written gold run behind.
    for path in &paths {
        let present = file_columns(path)?;
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|column| !present.iter().any(|p| p == *column))
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(GoldError::MissingColumns {
                file: path.display().to_string(),
                missing,
            });
        }
    }

    let mut tidy = vec![];
    for path in &paths {
        tidy.extend(read_silver_partition(path)?);
    }
    info!(
        logger,
        "aggregating {} silver rows from {} partitions",
        tidy.len(),
        paths.len()
    );

    // Rows with unparseable dates are dropped, mirroring the cleaner's
    // malformed-input tolerance.
    let observations: Vec<Observation> = tidy
        .iter()
        .filter_map(|record| {
            parse_date(&record.date).ok().map(|date| Observation {
                city_code: record.city_code.clone(),
                date,
                temp_max: record.temp_max,
                temp_min: record.temp_min,
                temp_avg: record.temp_avg,
                temp_range: record.temp_range,
                precip_mm: record.precip_mm,
            })
        })
        .collect();

    let daily = build_daily_kpis(&observations);
    let monthly = build_monthly_kpis(&observations);
    let summary = build_daily_summary(&daily, run_date);

    let daily_rows: Vec<DailyKpiRow> = daily
        .iter()
        .map(DailyKpiRow::try_from)
        .collect::<Result<_, _>>()?;

    let out_dir = partition_dir(data_dir, GOLD_ZONE, run_date);
    create_dir_all(&out_dir)
        .map_err(|e| anyhow!("error creating gold partition {}: {}", out_dir.display(), e))?;

    write_parquet(
        &daily_rows,
        daily_enriched_schema(),
        &out_dir.join(DAILY_ENRICHED_FILE),
    )?;
    write_csv_sample(
        &out_dir.join(DAILY_ENRICHED_SAMPLE_FILE),
        "city_code,date,temp_max,temp_min,temp_avg,temp_range,precip_mm,avg_max_7d,avg_min_7d,avg_max_14d,avg_min_14d,temp_min_ly,temp_max_ly,temp_min_yoy_pct,temp_max_yoy_pct",
        daily_rows.iter().map(DailyKpiRow::csv_line),
    )?;

    write_parquet(
        &summary,
        daily_summary_schema(),
        &out_dir.join(DAILY_KPIS_FILE),
    )?;
    write_csv_sample(
        &out_dir.join(DAILY_KPIS_SAMPLE_FILE),
        "run_date,city_code,avg_temp_min,avg_temp_max,avg_precip_mm",
        summary.iter().map(DailyKpiSummary::csv_line),
    )?;

    write_parquet(&monthly, monthly_schema(), &out_dir.join(MONTHLY_KPIS_FILE))?;
    write_csv_sample(
        &out_dir.join(MONTHLY_KPIS_SAMPLE_FILE),
        "city_code,month,avg_temp_min,avg_temp_max,avg_temp_avg,total_precip",
        monthly.iter().map(MonthlyKpi::csv_line),
    )?;

    info!(
        logger,
        "gold saved: {} daily={} monthly={}",
        out_dir.display(),
        daily_rows.len(),
        monthly.len()
    );
    Ok(Some(out_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{silver_schema, TidyRecord};
    use slog::o;
    use std::fs;
    use time::Month;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    fn obs(city: &str, d: Date, temp_max: f64, temp_min: f64, precip_mm: f64) -> Observation {
        Observation {
            city_code: city.to_string(),
            date: d,
            temp_max,
            temp_min,
            temp_avg: (temp_max + temp_min) / 2.0,
            temp_range: temp_max - temp_min,
            precip_mm,
        }
    }

    #[test]
    fn test_trailing_mean_partial_and_full_windows() {
        let values = [10.0, 20.0, 30.0, 40.0];
        // Partial window at the start of the series
        assert_eq!(trailing_mean(&values, 0, 7), 10.0);
        assert_eq!(trailing_mean(&values, 2, 7), 20.0);

        // With at least 7 observations the window is exactly the trailing 7
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(trailing_mean(&values, 9, 7), (4 + 5 + 6 + 7 + 8 + 9 + 10) as f64 / 7.0);
    }

    #[test]
    fn test_daily_grouping_merges_duplicate_city_dates() {
        let d = date(2025, Month::January, 10);
        let observations = vec![
            obs("BUE", d, 30.0, 20.0, 1.0),
            obs("BUE", d, 32.0, 18.0, 2.5),
        ];
        let daily = build_daily_kpis(&observations);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].temp_max, 32.0);
        assert_eq!(daily[0].temp_min, 18.0);
        assert_eq!(daily[0].temp_avg, 25.0);
        assert_eq!(daily[0].temp_range, 12.0);
        assert_eq!(daily[0].precip_mm, 3.5);
    }

    #[test]
    fn test_rolling_window_does_not_cross_cities() {
        let mut observations = vec![];
        for (i, temp) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
            observations.push(obs("BUE", date(2025, Month::January, 10 + i as u8), *temp, 0.0, 0.0));
        }
        observations.push(obs("SCL", date(2025, Month::January, 10), 100.0, 0.0, 0.0));

        let daily = build_daily_kpis(&observations);
        let bue: Vec<&DailyKpi> = daily.iter().filter(|r| r.city_code == "BUE").collect();
        assert_eq!(bue[2].avg_max_7d, 20.0);
        assert_eq!(bue[3].avg_max_7d, 25.0);

        // The other city's series starts fresh
        let scl: Vec<&DailyKpi> = daily.iter().filter(|r| r.city_code == "SCL").collect();
        assert_eq!(scl[0].avg_max_7d, 100.0);
    }

    #[test]
    fn test_yoy_join_and_pct_delta() {
        let observations = vec![
            obs("BUE", date(2024, Month::January, 10), 20.0, 10.0, 0.0),
            obs("BUE", date(2025, Month::January, 10), 25.0, 8.0, 0.0),
        ];
        let daily = build_daily_kpis(&observations);

        let last_year = &daily[0];
        assert_eq!(last_year.temp_max_ly, None);
        assert_eq!(last_year.temp_max_yoy_pct, None);

        let this_year = &daily[1];
        assert_eq!(this_year.temp_max_ly, Some(20.0));
        assert_eq!(this_year.temp_min_ly, Some(10.0));
        assert_eq!(this_year.temp_max_yoy_pct, Some(25.0));
        assert_eq!(this_year.temp_min_yoy_pct, Some(-20.0));
    }

    #[test]
    fn test_yoy_pct_is_null_when_prior_is_zero() {
        let observations = vec![
            obs("BUE", date(2024, Month::January, 10), 20.0, 0.0, 0.0),
            obs("BUE", date(2025, Month::January, 10), 25.0, 5.0, 0.0),
        ];
        let daily = build_daily_kpis(&observations);
        let this_year = &daily[1];
        assert_eq!(this_year.temp_min_ly, Some(0.0));
        assert_eq!(this_year.temp_min_yoy_pct, None);
        assert_eq!(this_year.temp_max_yoy_pct, Some(25.0));
    }

    #[test]
    fn test_pct_change_guards() {
        assert_eq!(pct_change(10.0, None), None);
        assert_eq!(pct_change(10.0, Some(0.0)), None);
        assert_eq!(pct_change(15.0, Some(10.0)), Some(50.0));
        assert_eq!(pct_change(5.0, Some(10.0)), Some(-50.0));
    }

    #[test]
    fn test_monthly_kpis_means_and_sums() {
        let observations = vec![
            obs("BUE", date(2025, Month::January, 10), 30.0, 20.0, 1.0),
            obs("BUE", date(2025, Month::January, 11), 28.0, 18.0, 5.2),
            obs("BUE", date(2025, Month::February, 1), 40.0, 30.0, 0.0),
        ];
        let monthly = build_monthly_kpis(&observations);
        assert_eq!(monthly.len(), 2);

        let january = &monthly[0];
        assert_eq!(january.month, "2025-01");
        assert_eq!(january.avg_temp_max, 29.0);
        assert_eq!(january.avg_temp_min, 19.0);
        assert_eq!(january.avg_temp_avg, 24.0);
        assert_eq!(january.total_precip, 6.2);

        assert_eq!(monthly[1].month, "2025-02");
        assert_eq!(monthly[1].total_precip, 0.0);
    }

    #[test]
    fn test_daily_summary_is_one_row_per_city() {
        let observations = vec![
            obs("BUE", date(2025, Month::January, 10), 30.0, 20.0, 1.0),
            obs("BUE", date(2025, Month::January, 11), 28.0, 18.0, 3.0),
            obs("SCL", date(2025, Month::January, 10), 25.0, 15.0, 0.0),
        ];
        let daily = build_daily_kpis(&observations);
        let summary = build_daily_summary(&daily, "2025-01-20");
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].city_code, "BUE");
        assert_eq!(summary[0].run_date, "2025-01-20");
        assert_eq!(summary[0].avg_temp_max, 29.0);
        assert_eq!(summary[0].avg_temp_min, 19.0);
        assert_eq!(summary[0].avg_precip_mm, 2.0);
        assert_eq!(summary[1].city_code, "SCL");
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(25.0499), 25.0);
        assert_eq!(round1(25.05), 25.1);
        assert_eq!(round1(-3.14), -3.1);
    }

    #[test]
    fn test_gold_stage_without_silver_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_str().unwrap();
        let out = run_gold_stage(&test_logger(), data_dir, "2025-01-20").unwrap();
        assert!(out.is_none());
        assert!(!tmp.path().join("gold").exists());
    }

    #[test]
    fn test_gold_stage_aborts_on_missing_columns() {
        #[derive(ParquetRecordWriter)]
        struct PartialRecord {
            run_date: String,
            city_code: String,
            date: String,
        }
        let partial_schema = Type::group_type_builder("tidy_record")
            .with_fields(vec![
                utf8_field("run_date"),
                utf8_field("city_code"),
                utf8_field("date"),
            ])
            .build()
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_str().unwrap();
        let dir = partition_dir(data_dir, CLEAN_ZONE, "2025-01-15");
        fs::create_dir_all(&dir).unwrap();
        let rows = vec![PartialRecord {
            run_date: "2025-01-15".to_string(),
            city_code: "BUE".to_string(),
            date: "2025-01-10".to_string(),
        }];
        write_parquet(&rows, partial_schema, &dir.join(SILVER_FILE)).unwrap();

        let err = run_gold_stage(&test_logger(), data_dir, "2025-01-20").unwrap_err();
        match err {
            GoldError::MissingColumns { missing, .. } => {
                assert!(missing.contains(&"temp_max".to_string()));
                assert!(missing.contains(&"precip_mm".to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
        // Hard abort: nothing may have been written
        assert!(!tmp.path().join("gold").exists());
    }

    #[test]
    fn test_gold_stage_writes_all_three_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_str().unwrap();
        let dir = partition_dir(data_dir, CLEAN_ZONE, "2025-01-15");
        fs::create_dir_all(&dir).unwrap();
        let rows = vec![
            TidyRecord {
                run_date: "2025-01-15".to_string(),
                city_code: "BUE".to_string(),
                date: "2025-01-10".to_string(),
                temp_max: 30.0,
                temp_min: 20.0,
                temp_avg: 25.0,
                temp_range: 10.0,
                precip_mm: 0.0,
            },
            TidyRecord {
                run_date: "2025-01-15".to_string(),
                city_code: "BUE".to_string(),
                date: "2025-01-11".to_string(),
                temp_max: 28.0,
                temp_min: 18.0,
                temp_avg: 23.0,
                temp_range: 10.0,
                precip_mm: 5.2,
            },
        ];
        write_parquet(&rows, silver_schema(), &dir.join(SILVER_FILE)).unwrap();

        let out_dir = run_gold_stage(&test_logger(), data_dir, "2025-01-20")
            .unwrap()
            .unwrap();
        for file in [DAILY_ENRICHED_FILE, DAILY_KPIS_FILE, MONTHLY_KPIS_FILE] {
            assert!(out_dir.join(file).exists(), "missing {file}");
        }

        let enriched_columns = file_columns(&out_dir.join(DAILY_ENRICHED_FILE)).unwrap();
        for column in ["avg_max_7d", "avg_min_14d", "temp_max_yoy_pct"] {
            assert!(enriched_columns.iter().any(|c| c == column));
        }
        let monthly_columns = file_columns(&out_dir.join(MONTHLY_KPIS_FILE)).unwrap();
        assert!(monthly_columns.iter().any(|c| c == "month"));
    }
}
