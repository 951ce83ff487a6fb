//! Data types flowing through the forecast pipeline and the bulletin it emits.

use chrono::{DateTime, Duration, DurationRound, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::classify::Bucket;

/// IST, UTC+05:30. Every series timestamp is expressed in this offset.
pub const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub type Timestamp = DateTime<FixedOffset>;

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).expect("IST offset is within one day")
}

pub fn to_ist(time: DateTime<Utc>) -> Timestamp {
    time.with_timezone(&ist())
}

/// Start of the IST hour containing `time`.
pub fn ist_hour_floor(time: DateTime<Utc>) -> Timestamp {
    let local = to_ist(time);
    local.duration_trunc(Duration::hours(1)).unwrap_or(local)
}

/// Nearest whole IST hour, ties going up. UTC-hourly sources sit on the
/// half hour in IST and are snapped so they line up with IST-hourly ones.
pub fn nearest_ist_hour(time: DateTime<Utc>) -> Timestamp {
    ist_hour_floor(time + Duration::minutes(30))
}

/// One hourly value; `None` means the provider had nothing for that hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: Timestamp,
    pub value: Option<f64>,
}

impl SeriesPoint {
    pub fn new(time: Timestamp, value: Option<f64>) -> Self {
        Self { time, value }
    }
}

/// Total cloud cover from one provider at one sample point, ascending by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSeries {
    pub provider: String,
    pub points: Vec<SeriesPoint>,
    /// Model shortwave irradiance (W/m²), when the provider reports it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irradiance: Vec<SeriesPoint>,
}

impl ProviderSeries {
    pub fn new(provider: impl Into<String>, points: Vec<SeriesPoint>) -> Self {
        Self {
            provider: provider.into(),
            points,
            irradiance: Vec::new(),
        }
    }

    pub fn with_irradiance(mut self, irradiance: Vec<SeriesPoint>) -> Self {
        self.irradiance = irradiance;
        self
    }

    pub fn has_values(&self) -> bool {
        self.points.iter().any(|p| p.value.is_some())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudLayers {
    pub low: Option<f64>,
    pub mid: Option<f64>,
    pub high: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayeredPoint {
    pub time: Timestamp,
    pub layers: CloudLayers,
}

/// Low/mid/high cloud split from one provider at one sample point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayeredSeries {
    pub provider: String,
    pub points: Vec<LayeredPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irradiance: Vec<SeriesPoint>,
}

/// What a provider hands back: a single total, or a layer split that the
/// ensemble flattens with fixed weights.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedSeries {
    Total(ProviderSeries),
    Layered(LayeredSeries),
}

impl FetchedSeries {
    pub fn provider(&self) -> &str {
        match self {
            FetchedSeries::Total(s) => &s.provider,
            FetchedSeries::Layered(s) => &s.provider,
        }
    }
}

/// The combined series for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSeries {
    pub region_id: String,
    /// Providers that contributed at least one value.
    pub providers: Vec<String>,
    pub points: Vec<SeriesPoint>,
    /// Median model irradiance; hours no model reported are absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub irradiance: Vec<SeriesPoint>,
}

/// Solar-window mean for one IST calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub percent: Option<f64>,
    pub ghi_wm2: Option<f64>,
    pub samples: usize,
}

/// Mean over one 24-hour half of the short horizon (day 1 = hours 0-23).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonValue {
    pub day: u8,
    pub percent: Option<f64>,
    pub samples: usize,
}

/// A percentage after bias correction and its bucket. Every field is `None`
/// when the region had no data; there is no fabricated default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Classified {
    pub raw_percent: Option<f64>,
    pub percent: Option<f64>,
    pub bucket: Option<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: NaiveDate,
    pub value: Classified,
    pub ghi_wm2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub day: u8,
    pub value: Classified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: Timestamp,
    /// Inside the display window (04:00-19:00 IST by default).
    pub daylight: bool,
    pub value: Classified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    Fresh,
    /// The latest cycle failed; values are from an earlier cycle.
    Stale,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionForecast {
    pub region_id: String,
    pub state: String,
    pub name: String,
    pub status: RegionStatus,
    pub computed_at: Option<DateTime<Utc>>,
    pub providers: Vec<String>,
    pub bias: f64,
    pub days: Vec<DayForecast>,
    pub horizon: Vec<HorizonForecast>,
    pub hourly: Vec<HourlyForecast>,
    /// Full raw ensemble series, past and forecast hours.
    pub series: Vec<SeriesPoint>,
    /// Recent ensemble values before the cycle time, for sparklines.
    pub history: Vec<SeriesPoint>,
}

impl RegionForecast {
    pub fn no_data(region_id: &str, state: &str, name: &str) -> Self {
        Self {
            region_id: region_id.to_string(),
            state: state.to_string(),
            name: name.to_string(),
            status: RegionStatus::NoData,
            computed_at: None,
            providers: Vec::new(),
            bias: 0.0,
            days: Vec::new(),
            horizon: Vec::new(),
            hourly: Vec::new(),
            series: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Raw (uncorrected) ensemble value at `time`.
    pub fn raw_at(&self, time: Timestamp) -> Option<f64> {
        self.series
            .iter()
            .find(|p| p.time == time)
            .and_then(|p| p.value)
    }
}

/// Merged view of a state made of several regions (cloudier wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateForecast {
    pub state: String,
    pub members: Vec<String>,
    pub days: Vec<DayForecast>,
    pub horizon: Vec<HorizonForecast>,
}

/// Full result set handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bulletin {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub cycle: String,
    pub regions: BTreeMap<String, RegionForecast>,
    pub states: BTreeMap<String, StateForecast>,
}
