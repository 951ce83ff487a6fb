//! Combines per-point, per-provider series into one series per region.
//!
//! Order is fixed: average across a provider's sample points per timestamp,
//! then take the median across providers per timestamp.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::BulletinError;
use crate::pipeline::types::{
    CloudLayers, EnsembleSeries, FetchedSeries, ProviderSeries, SeriesPoint, Timestamp,
};
use crate::pipeline::utility::{mean, median, round_to};

/// Weights turning a low/mid/high split into one effective percentage.
/// Low cloud attenuates irradiance the most.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            low: 0.6,
            mid: 0.3,
            high: 0.1,
        }
    }
}

impl LayerWeights {
    /// Weighted combination of the present layers, renormalised over the
    /// weights of the layers that are present.
    pub fn combine(&self, layers: &CloudLayers) -> Option<f64> {
        let parts = [
            (layers.low, self.low),
            (layers.mid, self.mid),
            (layers.high, self.high),
        ];
        let (sum, weight) = parts
            .iter()
            .filter_map(|(v, w)| v.map(|v| (v * w, *w)))
            .fold((0.0, 0.0), |(s, ws), (v, w)| (s + v, ws + w));
        if weight <= 0.0 {
            return None;
        }
        Some(sum / weight)
    }
}

impl FetchedSeries {
    /// Flattens to a single-percentage series using `weights` for layered data.
    pub fn effective(self, weights: &LayerWeights) -> ProviderSeries {
        match self {
            FetchedSeries::Total(series) => series,
            FetchedSeries::Layered(series) => ProviderSeries {
                provider: series.provider,
                points: series
                    .points
                    .iter()
                    .map(|p| SeriesPoint::new(p.time, weights.combine(&p.layers).map(f64::round)))
                    .collect(),
                irradiance: series.irradiance,
            },
        }
    }
}

fn mean_by_time<'a>(series: impl Iterator<Item = &'a [SeriesPoint]>) -> Vec<SeriesPoint> {
    let mut by_time: BTreeMap<Timestamp, Vec<Option<f64>>> = BTreeMap::new();
    for points in series {
        for p in points {
            by_time.entry(p.time).or_default().push(p.value);
        }
    }
    by_time
        .into_iter()
        .map(|(time, values)| SeriesPoint::new(time, mean(&values)))
        .collect()
}

fn median_by_time<'a>(series: impl Iterator<Item = &'a [SeriesPoint]>) -> Vec<SeriesPoint> {
    let mut by_time: BTreeMap<Timestamp, Vec<f64>> = BTreeMap::new();
    for points in series {
        for p in points {
            let slot = by_time.entry(p.time).or_default();
            if let Some(v) = p.value {
                slot.push(v);
            }
        }
    }
    by_time
        .into_iter()
        .map(|(time, values)| SeriesPoint::new(time, median(&values).map(|v| round_to(v, 0))))
        .collect()
}

/// Index-wise mean across the sample points of one provider, matched by
/// timestamp. Missing values are skipped, not counted as zero. Irradiance
/// is averaged the same way.
pub fn average_points(provider: &str, per_point: &[ProviderSeries]) -> ProviderSeries {
    let points = mean_by_time(per_point.iter().map(|s| s.points.as_slice()));
    let irradiance = mean_by_time(per_point.iter().map(|s| s.irradiance.as_slice()));
    ProviderSeries::new(provider, points).with_irradiance(irradiance)
}

/// Per-timestamp median across providers. A single provider passes through.
pub fn median_across(per_provider: &[ProviderSeries]) -> Vec<SeriesPoint> {
    median_by_time(per_provider.iter().map(|s| s.points.as_slice()))
}

/// Per-timestamp median of model irradiance. Hours no provider reported
/// are left out.
pub fn median_irradiance(per_provider: &[ProviderSeries]) -> Vec<SeriesPoint> {
    let mut merged = median_by_time(per_provider.iter().map(|s| s.irradiance.as_slice()));
    merged.retain(|p| p.value.is_some());
    merged
}

/// 3-point running median; endpoints and windows with a gap are left as is.
pub fn smooth_median3(points: &mut [SeriesPoint]) {
    if points.len() < 3 {
        return;
    }
    let original: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
    for i in 1..points.len() - 1 {
        if let (Some(a), Some(b), Some(c)) = (original[i - 1], original[i], original[i + 1]) {
            points[i].value = median(&[a, b, c]);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ensembler {
    pub weights: LayerWeights,
    pub smoothing: bool,
}

impl Ensembler {
    pub fn new(weights: LayerWeights, smoothing: bool) -> Self {
        Self { weights, smoothing }
    }

    /// Builds the region ensemble from every successful fetch, keyed by provider.
    ///
    /// # Errors
    ///
    /// [`BulletinError::NoDataForRegion`] when no provider/point contributed a
    /// single value.
    pub fn ensemble(
        &self,
        region_id: &str,
        fetched: BTreeMap<String, Vec<FetchedSeries>>,
    ) -> Result<EnsembleSeries, BulletinError> {
        let mut per_provider = Vec::new();
        let mut providers = Vec::new();

        for (provider, series) in fetched {
            let per_point: Vec<ProviderSeries> = series
                .into_iter()
                .map(|s| s.effective(&self.weights))
                .filter(ProviderSeries::has_values)
                .collect();
            if per_point.is_empty() {
                continue;
            }
            let averaged = average_points(&provider, &per_point);
            debug!(
                region_id,
                provider = %provider,
                points = per_point.len(),
                hours = averaged.points.len(),
                "Provider averaged across sample points"
            );
            providers.push(provider);
            per_provider.push(averaged);
        }

        if per_provider.is_empty() {
            return Err(BulletinError::no_data(region_id, "every provider/point failed or was empty"));
        }

        let mut points = median_across(&per_provider);
        let mut irradiance = median_irradiance(&per_provider);
        if self.smoothing {
            smooth_median3(&mut points);
            smooth_median3(&mut irradiance);
        }

        Ok(EnsembleSeries {
            region_id: region_id.to_string(),
            providers,
            points,
            irradiance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{LayeredPoint, LayeredSeries, ist};
    use chrono::TimeZone;

    fn at(hour: u32) -> Timestamp {
        ist().with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    fn series(provider: &str, values: &[Option<f64>]) -> ProviderSeries {
        ProviderSeries::new(
            provider,
            values
                .iter()
                .enumerate()
                .map(|(h, v)| SeriesPoint::new(at(h as u32), *v))
                .collect(),
        )
    }

    #[test]
    fn test_median_resists_outlier() {
        let merged = median_across(&[
            series("a", &[Some(10.0)]),
            series("b", &[Some(12.0)]),
            series("c", &[Some(95.0)]),
        ]);
        assert_eq!(merged[0].value, Some(12.0));
    }

    #[test]
    fn test_single_provider_passes_through() {
        let merged = median_across(&[series("a", &[Some(37.0), None])]);
        assert_eq!(merged[0].value, Some(37.0));
        assert_eq!(merged[1].value, None);
    }

    #[test]
    fn test_average_points_skips_missing() {
        let avg = average_points(
            "a",
            &[series("a", &[Some(20.0), None]), series("a", &[Some(40.0), Some(50.0)])],
        );
        assert_eq!(avg.points[0].value, Some(30.0));
        assert_eq!(avg.points[1].value, Some(50.0));
    }

    #[test]
    fn test_layer_weights_default() {
        let w = LayerWeights::default();
        let layers = CloudLayers {
            low: Some(100.0),
            mid: Some(0.0),
            high: Some(0.0),
        };
        assert!((w.combine(&layers).unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(w.combine(&CloudLayers::default()), None);
    }

    #[test]
    fn test_layered_series_flattened() {
        let layered = FetchedSeries::Layered(LayeredSeries {
            provider: "om".into(),
            points: vec![LayeredPoint {
                time: at(0),
                layers: CloudLayers {
                    low: Some(50.0),
                    mid: Some(50.0),
                    high: Some(50.0),
                },
            }],
            irradiance: series("om", &[Some(610.0)]).points,
        });
        let flat = layered.effective(&LayerWeights::default());
        assert_eq!(flat.points[0].value, Some(50.0));
        assert_eq!(flat.irradiance[0].value, Some(610.0));
    }

    #[test]
    fn test_ensemble_points_then_providers() {
        let mut fetched = BTreeMap::new();
        fetched.insert(
            "a".to_string(),
            vec![
                FetchedSeries::Total(series("a", &[Some(10.0)])),
                FetchedSeries::Total(series("a", &[Some(30.0)])),
            ],
        );
        fetched.insert("b".to_string(), vec![FetchedSeries::Total(series("b", &[Some(22.0)]))]);
        fetched.insert("c".to_string(), vec![FetchedSeries::Total(series("c", &[Some(90.0)]))]);

        let e = Ensembler::default().ensemble("R", fetched).unwrap();
        // provider a averages to 20; median of [20, 22, 90] = 22
        assert_eq!(e.points[0].value, Some(22.0));
        assert_eq!(e.providers, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ensemble_irradiance_median_of_models() {
        let with_sw = |provider: &str, cloud: f64, sw: &[Option<f64>]| {
            FetchedSeries::Total(
                series(provider, &[Some(cloud), Some(cloud)]).with_irradiance(series(provider, sw).points),
            )
        };
        let mut fetched = BTreeMap::new();
        // two points for a: irradiance averages to 500 at hour 0
        fetched.insert(
            "a".to_string(),
            vec![with_sw("a", 10.0, &[Some(400.0)]), with_sw("a", 10.0, &[Some(600.0)])],
        );
        fetched.insert("b".to_string(), vec![with_sw("b", 20.0, &[Some(520.0)])]);
        fetched.insert("c".to_string(), vec![with_sw("c", 30.0, &[Some(900.0)])]);
        // d reports cloud only
        fetched.insert("d".to_string(), vec![FetchedSeries::Total(series("d", &[Some(40.0)]))]);

        let e = Ensembler::default().ensemble("R", fetched).unwrap();
        assert_eq!(e.irradiance.len(), 1);
        assert_eq!(e.irradiance[0].time, at(0));
        assert_eq!(e.irradiance[0].value, Some(520.0));
    }

    #[test]
    fn test_ensemble_all_failed_is_no_data() {
        let mut fetched = BTreeMap::new();
        fetched.insert("a".to_string(), vec![FetchedSeries::Total(series("a", &[None, None]))]);
        let err = Ensembler::default().ensemble("R", fetched).unwrap_err();
        assert!(matches!(err, BulletinError::NoDataForRegion { .. }));
    }

    #[test]
    fn test_smooth_median3() {
        let mut points = series("a", &[Some(10.0), Some(90.0), Some(12.0), Some(14.0)]).points;
        smooth_median3(&mut points);
        let values: Vec<_> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(10.0), Some(12.0), Some(14.0), Some(14.0)]);
    }
}
