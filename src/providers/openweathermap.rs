//! OpenWeatherMap 5-day / 3-hour forecast (`clouds.all`).
//!
//! The key is attached by the [`UrlParam`](crate::fetch::auth::UrlParam)
//! wrapper. Each 3-hour step is held across its three hours so the series
//! lines up with the hourly providers.

use async_trait::async_trait;
use chrono::{DateTime, Duration};
use serde::Deserialize;
use std::sync::Arc;

use super::{FetchWindow, SeriesProvider, unavailable};
use crate::catalog::SamplePoint;
use crate::error::BulletinError;
use crate::fetch::{HttpClient, fetch_json};
use crate::pipeline::types::{FetchedSeries, ProviderSeries, SeriesPoint, nearest_ist_hour};
use crate::pipeline::utility::sanitize_percent;

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";
const NAME: &str = "openweathermap";
const STEP_HOURS: i64 = 3;

#[derive(Debug, Deserialize)]
pub(crate) struct ForecastResponse {
    #[serde(default)]
    list: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    dt: i64,
    #[serde(default)]
    clouds: Option<Clouds>,
}

#[derive(Debug, Deserialize)]
struct Clouds {
    all: Option<f64>,
}

pub struct OpenWeatherMap {
    client: Arc<dyn HttpClient>,
}

impl OpenWeatherMap {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    fn url(point: SamplePoint) -> anyhow::Result<String> {
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            &[
                ("lat", format!("{:.4}", point.lat)),
                ("lon", format!("{:.4}", point.lon)),
                ("units", "metric".to_string()),
            ],
        )?;
        Ok(url.into())
    }
}

pub(crate) fn parse_response(body: ForecastResponse) -> ProviderSeries {
    let mut points = Vec::new();
    for entry in body.list {
        let Some(start) = DateTime::from_timestamp(entry.dt, 0) else {
            continue;
        };
        let start = nearest_ist_hour(start);
        let value = sanitize_percent(entry.clouds.and_then(|c| c.all));
        for h in 0..STEP_HOURS {
            points.push(SeriesPoint::new(start + Duration::hours(h), value));
        }
    }
    points.sort_by_key(|p| p.time);
    points.dedup_by_key(|p| p.time);
    ProviderSeries::new(NAME, points)
}

#[async_trait]
impl SeriesProvider for OpenWeatherMap {
    fn name(&self) -> &str {
        NAME
    }

    #[tracing::instrument(skip(self, window), fields(provider = NAME, lat = point.lat, lon = point.lon))]
    async fn fetch(
        &self,
        point: SamplePoint,
        window: &FetchWindow,
    ) -> Result<FetchedSeries, BulletinError> {
        let url = Self::url(point).map_err(|e| unavailable(NAME, point, e))?;
        let body: ForecastResponse = fetch_json(self.client.as_ref(), &url)
            .await
            .map_err(|e| unavailable(NAME, point, e))?;

        let mut series = parse_response(body);
        series.points = window.clip(series.points);
        Ok(FetchedSeries::Total(series))
    }
}
