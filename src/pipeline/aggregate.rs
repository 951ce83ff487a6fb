//! Reduces an hourly ensemble series to daily and short-horizon values.
//!
//! Two modes: solar-window daily means (per IST calendar day) and fixed
//! 24-hour horizon halves over the first forecast hours. Parent areas built
//! from several regions merge by maximum, never by average.

use chrono::{NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::SamplePoint;
use crate::pipeline::solar::ghi_proxy;
use crate::pipeline::types::{Classified, DailyValue, HorizonValue, SeriesPoint, Timestamp, ist};
use crate::pipeline::utility::{mean, round_to};

pub const HOURS_PER_DAY: usize = 24;

/// Inclusive range of IST hours, e.g. 09..=16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Solar window used for daily means.
    pub fn solar() -> Self {
        Self::new(9, 16)
    }

    /// Daylight window used for the hourly view.
    pub fn daylight() -> Self {
        Self::new(4, 19)
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        let hour = time.with_timezone(&ist()).hour();
        hour >= self.start_hour && hour <= self.end_hour
    }
}

/// Every IST calendar date present in the series, ascending.
pub fn dates(points: &[SeriesPoint]) -> Vec<NaiveDate> {
    points
        .iter()
        .map(|p| p.time.with_timezone(&ist()).date_naive())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Mean of the window hours of `date`. `percent` is `None` when the window
/// holds no values.
///
/// GHI averages the same hours: the model irradiance where `irradiance`
/// has that hour, otherwise a clear-sky proxy scaled by cloud cover at
/// `ghi_point`.
pub fn daily_mean(
    points: &[SeriesPoint],
    irradiance: &[SeriesPoint],
    date: NaiveDate,
    window: HourWindow,
    ghi_point: Option<SamplePoint>,
) -> DailyValue {
    let in_window: Vec<&SeriesPoint> = points
        .iter()
        .filter(|p| p.time.with_timezone(&ist()).date_naive() == date && window.contains(p.time))
        .collect();

    let values: Vec<Option<f64>> = in_window.iter().map(|p| p.value).collect();
    let samples = values.iter().flatten().count();
    let percent = mean(&values).map(|v| round_to(v, 0));

    let modelled: BTreeMap<Timestamp, f64> = irradiance
        .iter()
        .filter_map(|p| Some((p.time, p.value?)))
        .collect();
    let ghis: Vec<Option<f64>> = in_window
        .iter()
        .map(|p| {
            modelled.get(&p.time).copied().or_else(|| {
                let point = ghi_point?;
                p.value.map(|c| ghi_proxy(p.time.with_timezone(&Utc), point, c))
            })
        })
        .collect();
    let ghi_wm2 = mean(&ghis).map(|v| round_to(v, 0));

    DailyValue {
        date,
        percent,
        ghi_wm2,
        samples,
    }
}

pub fn daily_means(
    points: &[SeriesPoint],
    irradiance: &[SeriesPoint],
    window: HourWindow,
    ghi_point: Option<SamplePoint>,
) -> Vec<DailyValue> {
    dates(points)
        .into_iter()
        .map(|date| daily_mean(points, irradiance, date, window, ghi_point))
        .collect()
}

/// Splits the first `horizon_hours` values into consecutive 24-hour halves
/// (day 1 = hours 0-23, day 2 = hours 24-47) and averages each.
pub fn horizon_buckets(forward: &[SeriesPoint], horizon_hours: usize) -> Vec<HorizonValue> {
    let days = horizon_hours.div_ceil(HOURS_PER_DAY);
    let head = &forward[..forward.len().min(horizon_hours)];
    (0..days)
        .map(|d| {
            let start = (d * HOURS_PER_DAY).min(head.len());
            let end = ((d + 1) * HOURS_PER_DAY).min(head.len());
            let values: Vec<Option<f64>> = head[start..end].iter().map(|p| p.value).collect();
            HorizonValue {
                day: (d + 1) as u8,
                percent: mean(&values).map(|v| round_to(v, 0)),
                samples: values.iter().flatten().count(),
            }
        })
        .collect()
}

fn floor_to_hour(now: Timestamp) -> Timestamp {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Points from the current hour onwards.
pub fn forward_from(points: &[SeriesPoint], now: Timestamp) -> &[SeriesPoint] {
    let start = floor_to_hour(now);
    let idx = points.partition_point(|p| p.time < start);
    &points[idx..]
}

/// Up to `hours` points strictly before the current hour.
pub fn history_before(points: &[SeriesPoint], now: Timestamp, hours: usize) -> Vec<SeriesPoint> {
    let start = floor_to_hour(now);
    let idx = points.partition_point(|p| p.time < start);
    points[idx.saturating_sub(hours)..idx].to_vec()
}

/// Cloudier-wins merge of sub-region values: the member with the highest
/// corrected percentage is taken whole, so the merged percent and bucket
/// always belong to the same region. Ties go to the higher bucket. Missing
/// members are ignored; all missing gives no data.
pub fn merge_cloudiest<'a, I: IntoIterator<Item = &'a Classified>>(values: I) -> Classified {
    values
        .into_iter()
        .filter(|v| v.percent.is_some())
        .max_by(|a, b| {
            a.percent
                .partial_cmp(&b.percent)
                .unwrap_or(Ordering::Equal)
                .then(a.bucket.cmp(&b.bucket))
        })
        .copied()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::Bucket;
    use chrono::{Duration, TimeZone};

    fn start() -> Timestamp {
        ist().with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap()
    }

    fn hourly(values: &[Option<f64>]) -> Vec<SeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(h, v)| SeriesPoint::new(start() + Duration::hours(h as i64), *v))
            .collect()
    }

    #[test]
    fn test_daily_mean_uses_solar_window_only() {
        let values: Vec<Option<f64>> = (0..24)
            .map(|h| Some(if (9..=16).contains(&h) { 40.0 } else { 100.0 }))
            .collect();
        let points = hourly(&values);
        let daily = daily_mean(&points, &[], start().date_naive(), HourWindow::solar(), None);
        assert_eq!(daily.percent, Some(40.0));
        assert_eq!(daily.samples, 8);
    }

    #[test]
    fn test_daily_mean_empty_window_is_no_data() {
        let points = hourly(&[Some(10.0); 8]); // 00:00-07:00 only
        let daily = daily_mean(&points, &[], start().date_naive(), HourWindow::solar(), None);
        assert_eq!(daily.percent, None);
        assert_eq!(daily.samples, 0);
    }

    #[test]
    fn test_daily_mean_is_idempotent() {
        let points = hourly(&(0..48).map(|h| Some((h * 7 % 100) as f64)).collect::<Vec<_>>());
        let a = daily_means(&points, &[], HourWindow::solar(), None);
        let b = daily_means(&points, &[], HourWindow::solar(), None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_daily_mean_with_ghi() {
        let points = hourly(&[Some(0.0); 24]);
        let point = SamplePoint::new(26.9, 75.8);
        let daily = daily_mean(&points, &[], start().date_naive(), HourWindow::solar(), Some(point));
        assert!(daily.ghi_wm2.unwrap() > 300.0);
    }

    #[test]
    fn test_daily_ghi_prefers_model_irradiance() {
        let points = hourly(&[Some(0.0); 24]);
        // model irradiance for 09:00-15:00 only; 16:00 falls back to the proxy
        let irradiance: Vec<SeriesPoint> = hourly(&[Some(500.0); 16])
            .into_iter()
            .filter(|p| p.time.hour() >= 9)
            .collect();
        let modelled = daily_mean(&points, &irradiance, start().date_naive(), HourWindow::solar(), None);
        assert_eq!(modelled.ghi_wm2, Some(500.0));

        let point = SamplePoint::new(26.9, 75.8);
        let mixed = daily_mean(&points, &irradiance, start().date_naive(), HourWindow::solar(), Some(point));
        let proxy_16 = ghi_proxy(
            (start() + Duration::hours(16)).with_timezone(&Utc),
            point,
            0.0,
        );
        let expected = round_to((500.0 * 7.0 + proxy_16) / 8.0, 0);
        assert_eq!(mixed.ghi_wm2, Some(expected));
    }

    #[test]
    fn test_horizon_halves() {
        let mut values = vec![Some(5.0); 24];
        values.extend(vec![Some(80.0); 24]);
        let buckets = horizon_buckets(&hourly(&values), 48);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].percent, Some(5.0));
        assert_eq!(buckets[1].percent, Some(80.0));
        assert_eq!(buckets[1].day, 2);
    }

    #[test]
    fn test_horizon_short_series() {
        let buckets = horizon_buckets(&hourly(&[Some(50.0); 10]), 48);
        assert_eq!(buckets[0].percent, Some(50.0));
        assert_eq!(buckets[1].percent, None);
    }

    #[test]
    fn test_forward_and_history() {
        let points = hourly(&(0..30).map(|h| Some(h as f64)).collect::<Vec<_>>());
        let now = start() + Duration::minutes(14 * 60 + 25);
        let fwd = forward_from(&points, now);
        assert_eq!(fwd[0].value, Some(14.0));
        let hist = history_before(&points, now, 12);
        assert_eq!(hist.len(), 12);
        assert_eq!(hist.first().unwrap().value, Some(2.0));
        assert_eq!(hist.last().unwrap().value, Some(13.0));
    }

    fn classified(percent: Option<f64>, bucket: Option<Bucket>) -> Classified {
        Classified {
            raw_percent: percent,
            percent,
            bucket,
        }
    }

    #[test]
    fn test_merge_cloudiest_takes_whole_member() {
        let west = classified(Some(20.0), Some(Bucket::Low));
        let east = classified(Some(70.0), Some(Bucket::High));
        assert_eq!(merge_cloudiest([&west, &east]), east);

        let missing = Classified::default();
        assert_eq!(merge_cloudiest([&missing, &west]), west);
        assert_eq!(merge_cloudiest([&missing, &missing]), Classified::default());
    }

    #[test]
    fn test_merge_cloudiest_keeps_held_bucket_with_its_percent() {
        // 32% held at Low by hysteresis beside 28% still at Medium
        let held = classified(Some(32.0), Some(Bucket::Low));
        let other = classified(Some(28.0), Some(Bucket::Medium));
        let merged = merge_cloudiest([&other, &held]);
        assert_eq!(merged.percent, Some(32.0));
        assert_eq!(merged.bucket, Some(Bucket::Low));
    }
}
