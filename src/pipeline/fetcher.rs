//! Fan-out of provider requests for one region.
//!
//! Every (sample point, provider) pair runs as its own task and all of them
//! are awaited together. A failed pair contributes nothing, not zero.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, warn};

use crate::catalog::{Region, SamplePoint};
use crate::error::BulletinError;
use crate::pipeline::types::FetchedSeries;
use crate::providers::{FetchWindow, SeriesProvider};

/// Successful series grouped by provider, plus every isolated failure.
#[derive(Debug, Default)]
pub struct RegionFetch {
    pub by_provider: BTreeMap<String, Vec<FetchedSeries>>,
    pub failures: Vec<BulletinError>,
}

impl RegionFetch {
    pub fn succeeded(&self) -> usize {
        self.by_provider.values().map(Vec::len).sum()
    }
}

#[derive(Clone)]
pub struct SeriesFetcher {
    providers: Vec<Arc<dyn SeriesProvider>>,
}

impl SeriesFetcher {
    pub fn new(providers: Vec<Arc<dyn SeriesProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[tracing::instrument(skip(self, region, window), fields(region_id = %region.id))]
    pub async fn fetch_region(&self, region: &Region, window: FetchWindow) -> RegionFetch {
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, (String, SamplePoint)> = HashMap::new();

        for point in &region.points {
            for provider in &self.providers {
                let provider = provider.clone();
                let point = *point;
                let span = tracing::debug_span!(
                    "fetch_series",
                    provider = %provider.name(),
                    lat = point.lat,
                    lon = point.lon,
                );
                let name = provider.name().to_string();
                let handle = tasks.spawn(
                    async move {
                        let result = provider.fetch(point, &window).await;
                        (provider.name().to_string(), result)
                    }
                    .instrument(span),
                );
                pending.insert(handle.id(), (name, point));
            }
        }

        let mut out = RegionFetch::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((provider, Ok(series))) => {
                    debug!(provider = %provider, "Series fetched");
                    out.by_provider.entry(provider).or_default().push(series);
                }
                Ok((provider, Err(e))) => {
                    warn!(provider = %provider, error = %e, "Provider fetch failed");
                    out.failures.push(e);
                }
                Err(e) => {
                    let (provider, point) = pending
                        .remove(&e.id())
                        .unwrap_or_else(|| ("unknown".to_string(), SamplePoint::new(f64::NAN, f64::NAN)));
                    warn!(provider = %provider, lat = point.lat, lon = point.lon, error = %e, "Fetch task aborted");
                    out.failures.push(BulletinError::ProviderUnavailable {
                        provider,
                        lat: point.lat,
                        lon: point.lon,
                        reason: e.to_string(),
                    });
                }
            }
        }
        out
    }
}
