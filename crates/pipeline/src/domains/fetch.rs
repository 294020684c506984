use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Error};
use meteo_mart_core::{create_dir_all, partition_dir, RAW_ZONE};
use serde::{Deserialize, Serialize};
use slog::{info, Logger};
use time::Date;

use crate::{format_date, City, CITY_ROSTER};

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Metric list requested from the `daily` endpoint
pub const DAILY_METRICS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum";

/// Raw batch filename inside a raw partition
pub const RAW_FILE: &str = "weather.json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch window: trailing 30 days ending yesterday
const LOOKBACK_DAYS: i64 = 30;

/// Parallel per-day arrays exactly as the API returns them. Entries can be
/// null and the arrays are not guaranteed equal length; the cleaner deals
/// with both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailySeries {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    daily: DailySeries,
}

/// One city's API payload tagged with the pipeline metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityObservations {
    #[serde(rename = "_city_code")]
    pub city_code: String,
    #[serde(rename = "_start_date")]
    pub start_date: String,
    #[serde(rename = "_end_date")]
    pub end_date: String,
    pub daily: DailySeries,
}

/// One fetch run: every roster city's payload under a single run_date tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub run_date: String,
    pub data: Vec<CityObservations>,
}

pub struct FetchService {
    logger: Logger,
    client: reqwest::Client,
    base_url: String,
}

impl FetchService {
    pub fn new(logger: Logger, base_url: impl Into<String>) -> Self {
        Self {
            logger,
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch daily weather for one city over an inclusive date range.
    ///
    /// Propagates network errors and non-success statuses; retrying is the
    /// orchestrator's job.
    pub async fn fetch_city(
        &self,
        city: &City,
        start_date: &str,
        end_date: &str,
    ) -> Result<CityObservations, Error> {
        info!(
            self.logger,
            "fetching city={} lat={} lon={}", city.code, city.latitude, city.longitude
        );
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", city.latitude.to_string()),
                ("longitude", city.longitude.to_string()),
                ("daily", DAILY_METRICS.to_string()),
                ("timezone", "auto".to_string()),
                ("start_date", start_date.to_string()),
                ("end_date", end_date.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| anyhow!("error requesting weather for {}: {}", city.code, e))?
            .error_for_status()
            .map_err(|e| anyhow!("weather api rejected request for {}: {}", city.code, e))?;

        let payload: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("error parsing weather response for {}: {}", city.code, e))?;

        Ok(CityObservations {
            city_code: city.code.to_string(),
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            daily: payload.daily,
        })
    }
}

/// Fetch the whole roster and persist the raw batch for `run_date`.
///
/// Creates (or overwrites) `<data_dir>/raw/<run_date>/weather.json` and
/// returns its path. The JSON document is fully serialized in memory before
/// anything touches the disk.
pub async fn run_fetch_stage(
    logger: &Logger,
    data_dir: &str,
    run_date: Date,
) -> Result<PathBuf, Error> {
    let (start, end) = fetch_window(run_date);
    let run_date = format_date(run_date)?;
    let start_date = format_date(start)?;
    let end_date = format_date(end)?;
    info!(
        logger,
        "starting fetch run_date={} range={} -> {}", run_date, start_date, end_date
    );

    let service = FetchService::new(logger.clone(), OPEN_METEO_URL);
    let mut data = Vec::with_capacity(CITY_ROSTER.len());
    for city in CITY_ROSTER {
        let payload = service.fetch_city(city, &start_date, &end_date).await?;
        info!(
            logger,
            "{}: retrieved {} days",
            city.code,
            payload.daily.time.len()
        );
        data.push(payload);
    }

    let batch = RawBatch {
        run_date: run_date.clone(),
        data,
    };
    let document = serde_json::to_string(&batch)
        .map_err(|e| anyhow!("error serializing raw batch: {}", e))?;

    let partition = partition_dir(data_dir, RAW_ZONE, &run_date);
    create_dir_all(&partition)
        .map_err(|e| anyhow!("error creating raw partition {}: {}", partition.display(), e))?;
    let out_path = partition.join(RAW_FILE);
    fs::write(&out_path, document)
        .map_err(|e| anyhow!("error writing raw batch {}: {}", out_path.display(), e))?;

    info!(logger, "raw batch saved: {}", out_path.display());
    Ok(out_path)
}

/// The [start, end] fetch window for a run date: trailing 30 days up to
/// yesterday.
fn fetch_window(run_date: Date) -> (Date, Date) {
    let start = run_date - time::Duration::days(LOOKBACK_DAYS);
    let end = run_date - time::Duration::days(1);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    #[test]
    fn test_open_meteo_response_parsing() {
        let body = r#"{
            "latitude": -34.61,
            "longitude": -58.38,
            "daily_units": {"time": "iso8601"},
            "daily": {
                "time": ["2025-01-10", "2025-01-11"],
                "temperature_2m_max": [30.0, null],
                "temperature_2m_min": [20.0, 18.0],
                "precipitation_sum": [0.0, 5.2]
            }
        }"#;
        let parsed: OpenMeteoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.daily.time.len(), 2);
        assert_eq!(parsed.daily.temperature_2m_max[0], Some(30.0));
        assert_eq!(parsed.daily.temperature_2m_max[1], None);
        assert_eq!(parsed.daily.precipitation_sum[1], Some(5.2));
    }

    #[test]
    fn test_raw_batch_metadata_field_names() {
        let batch = RawBatch {
            run_date: "2025-01-15".to_string(),
            data: vec![CityObservations {
                city_code: "BUE".to_string(),
                start_date: "2024-12-16".to_string(),
                end_date: "2025-01-14".to_string(),
                daily: DailySeries::default(),
            }],
        };
        let json = serde_json::to_string(&batch).unwrap();
        // The raw file contract uses underscore-prefixed metadata keys
        assert!(json.contains("\"_city_code\":\"BUE\""));
        assert!(json.contains("\"_start_date\":\"2024-12-16\""));
        assert!(json.contains("\"_end_date\":\"2025-01-14\""));

        let parsed: RawBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data[0].city_code, "BUE");
    }

    #[test]
    fn test_fetch_window_is_trailing_month() {
        let run_date = Date::from_calendar_date(2025, Month::January, 15).unwrap();
        let (start, end) = fetch_window(run_date);
        assert_eq!(
            start,
            Date::from_calendar_date(2024, Month::December, 16).unwrap()
        );
        assert_eq!(
            end,
            Date::from_calendar_date(2025, Month::January, 14).unwrap()
        );
    }
}
