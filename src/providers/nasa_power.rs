//! NASA POWER hourly point API (`CLOUD_AMT`, percent).
//!
//! POWER is an analysis product, so it mostly fills the recent-history hours;
//! the end date is capped at today. Missing hours come back as the fill value
//! `-999`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FetchWindow, SeriesProvider, unavailable};
use crate::catalog::SamplePoint;
use crate::error::BulletinError;
use crate::fetch::{HttpClient, fetch_json};
use crate::pipeline::types::{FetchedSeries, ProviderSeries, SeriesPoint, nearest_ist_hour};
use crate::pipeline::utility::sanitize_percent;

const BASE_URL: &str = "https://power.larc.nasa.gov/api/temporal/hourly/point";
const PARAMETER: &str = "CLOUD_AMT";
const NAME: &str = "nasa-power";

#[derive(Debug, Deserialize)]
pub(crate) struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    parameter: BTreeMap<String, BTreeMap<String, f64>>,
}

pub struct NasaPower {
    client: Arc<dyn HttpClient>,
}

impl NasaPower {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    fn url(point: SamplePoint, window: &FetchWindow) -> anyhow::Result<String> {
        let start = window.start().date_naive();
        let end = window.end().date_naive().min(Utc::now().date_naive()).max(start);
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            &[
                ("parameters", PARAMETER.to_string()),
                ("community", "RE".to_string()),
                ("latitude", format!("{:.4}", point.lat)),
                ("longitude", format!("{:.4}", point.lon)),
                ("start", start.format("%Y%m%d").to_string()),
                ("end", end.format("%Y%m%d").to_string()),
                ("time-standard", "UTC".to_string()),
                ("format", "JSON".to_string()),
            ],
        )?;
        Ok(url.into())
    }
}

/// Keys are `YYYYMMDDHH` in UTC, snapped to the nearest IST hour. Negative
/// values are fill values.
pub(crate) fn parse_response(body: PowerResponse) -> ProviderSeries {
    let values = body
        .properties
        .parameter
        .get(PARAMETER)
        .cloned()
        .unwrap_or_default();

    let points = values
        .into_iter()
        .filter_map(|(key, value)| {
            if key.len() != 10 {
                return None;
            }
            let date = NaiveDate::parse_from_str(&key[..8], "%Y%m%d").ok()?;
            let hour: u32 = key[8..].parse().ok()?;
            let time = Utc.from_utc_datetime(&date.and_time(NaiveTime::from_hms_opt(hour, 0, 0)?));
            let value = if value < 0.0 { None } else { sanitize_percent(Some(value)) };
            Some(SeriesPoint::new(nearest_ist_hour(time), value))
        })
        .collect();
    ProviderSeries::new(NAME, points)
}

#[async_trait]
impl SeriesProvider for NasaPower {
    fn name(&self) -> &str {
        NAME
    }

    #[tracing::instrument(skip(self, window), fields(provider = NAME, lat = point.lat, lon = point.lon))]
    async fn fetch(
        &self,
        point: SamplePoint,
        window: &FetchWindow,
    ) -> Result<FetchedSeries, BulletinError> {
        let url = Self::url(point, window).map_err(|e| unavailable(NAME, point, e))?;
        let body: PowerResponse = fetch_json(self.client.as_ref(), &url)
            .await
            .map_err(|e| unavailable(NAME, point, e))?;

        let mut series = parse_response(body);
        series.points = window.clip(series.points);
        Ok(FetchedSeries::Total(series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snaps_to_ist_hour_and_drops_fill() {
        let body: PowerResponse = serde_json::from_str(
            r#"{"properties":{"parameter":{"CLOUD_AMT":{
                "2026101803": 41.7, "2026101804": -999.0, "garbage": 5.0
            }}}}"#,
        )
        .unwrap();
        let s = parse_response(body);

        assert_eq!(s.points.len(), 2);
        assert_eq!(s.points[0].time.to_rfc3339(), "2026-10-18T09:00:00+05:30");
        assert_eq!(s.points[0].value, Some(42.0));
        assert_eq!(s.points[1].value, None);
    }

    #[test]
    fn test_parse_without_parameter_is_empty() {
        let body: PowerResponse =
            serde_json::from_str(r#"{"properties":{"parameter":{}}}"#).unwrap();
        assert!(parse_response(body).points.is_empty());
    }
}
