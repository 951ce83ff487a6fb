//! Upstream weather providers.
//!
//! Each provider turns one sample point into an hourly cloud-cover series in
//! IST. HTTP goes through [`HttpClient`]; response parsing is split out so it
//! can be tested on canned bodies.

pub mod nasa_power;
pub mod open_meteo;
pub mod openweathermap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::SamplePoint;
use crate::config::ProviderConfig;
use crate::error::BulletinError;
use crate::fetch::HttpClient;
use crate::fetch::auth::UrlParam;
use crate::pipeline::types::{FetchedSeries, SeriesPoint, Timestamp, ist_hour_floor};

pub use nasa_power::NasaPower;
pub use open_meteo::OpenMeteo;
pub use openweathermap::OpenWeatherMap;

/// Hours requested around the cycle time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub now: DateTime<Utc>,
    pub past_hours: u32,
    pub forecast_hours: u32,
}

impl FetchWindow {
    pub fn new(now: DateTime<Utc>, past_hours: u32, forecast_hours: u32) -> Self {
        Self {
            now,
            past_hours,
            forecast_hours,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.current_hour() - Duration::hours(self.past_hours as i64)
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.current_hour() + Duration::hours(self.forecast_hours as i64)
    }

    /// Start of the current IST hour.
    fn current_hour(&self) -> DateTime<Utc> {
        ist_hour_floor(self.now).with_timezone(&Utc)
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        let t = time.with_timezone(&Utc);
        t >= self.start() && t < self.end()
    }

    /// Keeps points inside `[start, end)`.
    pub fn clip(&self, points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
        points.into_iter().filter(|p| self.contains(p.time)).collect()
    }
}

#[async_trait]
pub trait SeriesProvider: Send + Sync {
    /// Stable identifier used as the ensemble key, e.g. `open-meteo:icon_seamless`.
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        point: SamplePoint,
        window: &FetchWindow,
    ) -> Result<FetchedSeries, BulletinError>;
}

pub(crate) fn unavailable(provider: &str, point: SamplePoint, err: impl std::fmt::Display) -> BulletinError {
    BulletinError::ProviderUnavailable {
        provider: provider.to_string(),
        lat: point.lat,
        lon: point.lon,
        reason: err.to_string(),
    }
}

/// Instantiates the configured providers over a shared client. OpenWeatherMap
/// is skipped with a warning when no key is available.
pub fn build_providers(
    configs: &[ProviderConfig],
    client: Arc<dyn HttpClient>,
    openweathermap_key: Option<String>,
) -> Vec<Arc<dyn SeriesProvider>> {
    let mut providers: Vec<Arc<dyn SeriesProvider>> = Vec::new();
    for config in configs {
        match config {
            ProviderConfig::OpenMeteo { model, layered } => {
                providers.push(Arc::new(OpenMeteo::new(client.clone(), model, *layered)));
            }
            ProviderConfig::NasaPower => {
                providers.push(Arc::new(NasaPower::new(client.clone())));
            }
            ProviderConfig::OpenWeatherMap => match &openweathermap_key {
                Some(key) => {
                    let keyed = UrlParam::appid(client.clone(), key.clone());
                    providers.push(Arc::new(OpenWeatherMap::new(Arc::new(keyed))));
                }
                None => warn!("OPENWEATHERMAP_API_KEY not set, skipping OpenWeatherMap"),
            },
        }
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use chrono::TimeZone;

    #[test]
    fn test_fetch_window_bounds() {
        // 12:10 IST, so the window is anchored at 12:00 IST (06:30 UTC)
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 6, 40, 0).unwrap();
        let w = FetchWindow::new(now, 12, 48);
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2026, 10, 18, 18, 30, 0).unwrap());
        assert_eq!(w.end(), Utc.with_ymd_and_hms(2026, 10, 21, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_openweathermap_needs_key() {
        let client: Arc<dyn HttpClient> = Arc::new(BasicClient::new());
        let configs = vec![
            ProviderConfig::OpenMeteo {
                model: "best_match".into(),
                layered: false,
            },
            ProviderConfig::OpenWeatherMap,
        ];
        assert_eq!(build_providers(&configs, client.clone(), None).len(), 1);
        assert_eq!(build_providers(&configs, client, Some("k".into())).len(), 2);
    }
}
