//! Open-Meteo forecast API, one instance per weather model.
//!
//! API: `https://api.open-meteo.com/v1/forecast`. No key required.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{FetchWindow, SeriesProvider, unavailable};
use crate::catalog::SamplePoint;
use crate::error::BulletinError;
use crate::fetch::{HttpClient, fetch_json};
use crate::pipeline::types::{
    CloudLayers, FetchedSeries, LayeredPoint, LayeredSeries, ProviderSeries, SeriesPoint, Timestamp,
    ist,
};
use crate::pipeline::utility::{sanitize_irradiance, sanitize_percent};

const BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
const TIMEZONE: &str = "Asia/Kolkata";

#[derive(Debug, Deserialize)]
pub(crate) struct OpenMeteoResponse {
    #[serde(default)]
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover_low: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover_mid: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover_high: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
}

pub struct OpenMeteo {
    client: Arc<dyn HttpClient>,
    model: String,
    layered: bool,
    name: String,
}

impl OpenMeteo {
    pub fn new(client: Arc<dyn HttpClient>, model: &str, layered: bool) -> Self {
        Self {
            client,
            model: model.to_string(),
            layered,
            name: format!("open-meteo:{model}"),
        }
    }

    fn url(&self, point: SamplePoint, window: &FetchWindow) -> anyhow::Result<String> {
        let hourly = if self.layered {
            "cloud_cover_low,cloud_cover_mid,cloud_cover_high,shortwave_radiation"
        } else {
            "cloud_cover,shortwave_radiation"
        };
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            &[
                ("latitude", format!("{:.4}", point.lat)),
                ("longitude", format!("{:.4}", point.lon)),
                ("hourly", hourly.to_string()),
                ("timezone", TIMEZONE.to_string()),
                ("past_hours", window.past_hours.to_string()),
                ("forecast_hours", window.forecast_hours.to_string()),
                ("models", self.model.clone()),
            ],
        )?;
        Ok(url.into())
    }
}

/// Open-Meteo local times look like `2026-10-19T09:00` and are already IST
/// because the request pins the timezone.
fn parse_local_time(raw: &str) -> Option<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").ok()?;
    ist().from_local_datetime(&naive).single()
}

/// Converts a decoded response into a series. Unparseable timestamps are
/// dropped; missing or null values stay absent. `shortwave_radiation` rides
/// along as the irradiance series.
pub(crate) fn parse_response(provider: &str, layered: bool, body: OpenMeteoResponse) -> FetchedSeries {
    let hourly = body.hourly.unwrap_or_default();
    let at = |v: &[Option<f64>], i: usize| sanitize_percent(v.get(i).copied().flatten());

    let irradiance: Vec<SeriesPoint> = hourly
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            let value = sanitize_irradiance(hourly.shortwave_radiation.get(i).copied().flatten());
            Some(SeriesPoint::new(parse_local_time(t)?, value))
        })
        .filter(|p| p.value.is_some())
        .collect();

    if layered {
        let points = hourly
            .time
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                Some(LayeredPoint {
                    time: parse_local_time(t)?,
                    layers: CloudLayers {
                        low: at(&hourly.cloud_cover_low, i),
                        mid: at(&hourly.cloud_cover_mid, i),
                        high: at(&hourly.cloud_cover_high, i),
                    },
                })
            })
            .collect();
        return FetchedSeries::Layered(LayeredSeries {
            provider: provider.to_string(),
            points,
            irradiance,
        });
    }

    let points = hourly
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, t)| Some(SeriesPoint::new(parse_local_time(t)?, at(&hourly.cloud_cover, i))))
        .collect();
    FetchedSeries::Total(ProviderSeries::new(provider, points).with_irradiance(irradiance))
}

#[async_trait]
impl SeriesProvider for OpenMeteo {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, window), fields(provider = %self.name, lat = point.lat, lon = point.lon))]
    async fn fetch(
        &self,
        point: SamplePoint,
        window: &FetchWindow,
    ) -> Result<FetchedSeries, BulletinError> {
        let url = self
            .url(point, window)
            .map_err(|e| unavailable(&self.name, point, e))?;
        let body: OpenMeteoResponse = fetch_json(self.client.as_ref(), &url)
            .await
            .map_err(|e| unavailable(&self.name, point, e))?;

        let series = parse_response(&self.name, self.layered, body);
        let series = match series {
            FetchedSeries::Total(mut s) => {
                s.points = window.clip(s.points);
                s.irradiance = window.clip(s.irradiance);
                FetchedSeries::Total(s)
            }
            FetchedSeries::Layered(mut s) => {
                s.points.retain(|p| window.contains(p.time));
                s.irradiance = window.clip(s.irradiance);
                FetchedSeries::Layered(s)
            }
        };
        debug!("Open-Meteo series received");
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(body: &str) -> OpenMeteoResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_parse_total_cloud_cover() {
        let body = decode(
            r#"{"hourly":{"time":["2026-10-19T09:00","2026-10-19T10:00","bad"],
                "cloud_cover":[12.4, null, 50]}}"#,
        );
        let FetchedSeries::Total(s) = parse_response("open-meteo:best_match", false, body) else {
            panic!("expected total series");
        };
        assert_eq!(s.points.len(), 2);
        assert_eq!(s.points[0].value, Some(12.0));
        assert_eq!(s.points[1].value, None);
        assert_eq!(s.points[0].time.to_rfc3339(), "2026-10-19T09:00:00+05:30");
    }

    #[test]
    fn test_parse_shortwave_radiation() {
        let body = decode(
            r#"{"hourly":{"time":["2026-10-19T06:00","2026-10-19T12:00","2026-10-19T13:00"],
                "cloud_cover":[10, 20, 30],"shortwave_radiation":[-1.5, 742.0, null]}}"#,
        );
        let FetchedSeries::Total(s) = parse_response("om", false, body) else {
            panic!("expected total series");
        };
        assert_eq!(s.points.len(), 3);
        // the null hour is left out so GHI falls back to the proxy there
        assert_eq!(s.irradiance.len(), 2);
        assert_eq!(s.irradiance[0].value, Some(0.0));
        assert_eq!(s.irradiance[1].value, Some(742.0));
        assert_eq!(s.irradiance[1].time.to_rfc3339(), "2026-10-19T12:00:00+05:30");
    }

    #[test]
    fn test_parse_layered() {
        let body = decode(
            r#"{"hourly":{"time":["2026-10-19T09:00"],
                "cloud_cover_low":[80],"cloud_cover_mid":[20],"cloud_cover_high":[120]}}"#,
        );
        let FetchedSeries::Layered(s) = parse_response("om", true, body) else {
            panic!("expected layered series");
        };
        assert_eq!(s.points[0].layers.low, Some(80.0));
        assert_eq!(s.points[0].layers.high, Some(100.0));
    }

    #[test]
    fn test_missing_hourly_block_is_empty() {
        let FetchedSeries::Total(s) = parse_response("om", false, decode("{}")) else {
            panic!("expected total series");
        };
        assert!(s.points.is_empty());
    }

    #[test]
    fn test_url_carries_model_and_timezone() {
        use crate::fetch::BasicClient;
        use chrono::Utc;

        let om = OpenMeteo::new(Arc::new(BasicClient::new()), "icon_seamless", false);
        let url = om
            .url(SamplePoint::new(31.1, 75.4), &FetchWindow::new(Utc::now(), 12, 48))
            .unwrap();
        assert!(url.contains("models=icon_seamless"));
        assert!(url.contains("timezone=Asia%2FKolkata"));
        assert!(url.contains("forecast_hours=48"));
        assert!(url.contains("shortwave_radiation"));
        assert_eq!(om.name(), "open-meteo:icon_seamless");
    }
}
