//! Static catalog of monitored regions and their sample points.
//!
//! Stored as a JSON array on disk:
//! ```json
//! [
//!   { "state": "Punjab", "name": "Punjab", "points": [{ "lat": 31.1, "lon": 75.4 }] },
//!   { "state": "Rajasthan", "name": "West Rajasthan",
//!     "points": [{ "lat": 26.9, "lon": 71.2 }, { "lat": 27.6, "lon": 73.4 }] }
//! ]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use crate::error::BulletinError;
use crate::fetch::{HttpClient, fallback::first_success, load_source};

/// A (latitude, longitude) pair used to query a provider on behalf of a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub lat: f64,
    pub lon: f64,
}

impl SamplePoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// `"<state>:<name>"` unless given explicitly.
    #[serde(default)]
    pub id: String,
    pub state: String,
    pub name: String,
    #[serde(default)]
    pub points: Vec<SamplePoint>,
}

impl Region {
    pub fn new(state: &str, name: &str, points: Vec<SamplePoint>) -> Self {
        Self {
            id: region_id(state, name),
            state: state.to_string(),
            name: name.to_string(),
            points,
        }
    }

    /// Checks the at-least-one-point and coordinate-range invariants.
    pub fn validate(&self) -> Result<(), BulletinError> {
        if self.points.is_empty() {
            return Err(BulletinError::configuration(&self.id, "region has no sample points"));
        }
        if let Some(bad) = self.points.iter().find(|p| !p.is_valid()) {
            return Err(BulletinError::configuration(
                &self.id,
                format!("sample point ({}, {}) out of range", bad.lat, bad.lon),
            ));
        }
        Ok(())
    }
}

pub fn region_id(state: &str, name: &str) -> String {
    format!("{state}:{name}")
}

#[derive(Debug, Clone, Default)]
pub struct RegionCatalog {
    regions: Vec<Region>,
}

impl RegionCatalog {
    pub fn new(regions: Vec<Region>) -> Self {
        let regions = regions
            .into_iter()
            .map(|mut r| {
                if r.id.is_empty() {
                    r.id = region_id(&r.state, &r.name);
                }
                r
            })
            .collect();
        Self { regions }
    }

    /// Punjab plus the two Rajasthan sub-divisions.
    pub fn builtin() -> Self {
        Self::new(vec![
            Region::new("Punjab", "Punjab", vec![SamplePoint::new(31.1, 75.4)]),
            Region::new(
                "Rajasthan",
                "West Rajasthan",
                vec![SamplePoint::new(26.9, 71.2), SamplePoint::new(27.6, 73.4)],
            ),
            Region::new("Rajasthan", "East Rajasthan", vec![SamplePoint::new(26.0, 75.6)]),
        ])
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let regions: Vec<Region> =
            serde_json::from_slice(bytes).context("region catalog is not a JSON array of regions")?;
        Ok(Self::new(regions))
    }

    /// Loads the first source (file path or URL) that yields a parseable catalog.
    pub async fn load_first<C: HttpClient + ?Sized>(client: &C, sources: &[String]) -> Result<Self> {
        let (source, catalog) = first_success(sources, |source| async move {
            let bytes = load_source(client, source).await?;
            Self::from_json(&bytes)
        })
        .await
        .context("no region catalog source could be loaded")?;
        info!(source = %source, regions = catalog.len(), "Region catalog loaded");
        Ok(catalog)
    }

    /// Drops regions that break the catalog invariants, logging each one.
    pub fn validated(self) -> (Self, Vec<BulletinError>) {
        let mut ok = Vec::new();
        let mut rejected = Vec::new();
        for region in self.regions {
            match region.validate() {
                Ok(()) => ok.push(region),
                Err(e) => {
                    error!(region_id = %region.id, error = %e, "Region rejected");
                    rejected.push(e);
                }
            }
        }
        (Self { regions: ok }, rejected)
    }

    /// Fills regions that have no sample points from a GeoJSON
    /// FeatureCollection, matching features by `"<state>:<name>"`.
    pub fn fill_missing_from_geojson(&mut self, collection: &Value) -> usize {
        let mut by_key = BTreeMap::new();
        for feature in collection["features"].as_array().into_iter().flatten() {
            let props = &feature["properties"];
            let state = ["ST_NM", "state"]
                .iter()
                .find_map(|k| props[*k].as_str())
                .unwrap_or("-")
                .trim();
            let name = ["name", "NAME_1", "district"]
                .iter()
                .find_map(|k| props[*k].as_str())
                .unwrap_or("")
                .trim();
            by_key.insert(region_id(state, name).to_lowercase(), feature);
        }

        let mut filled = 0;
        for region in self.regions.iter_mut().filter(|r| r.points.is_empty()) {
            let Some(feature) = by_key.get(&region.id.to_lowercase()) else {
                continue;
            };
            if let Some(point) = feature_centroid(feature) {
                debug!(region_id = %region.id, lat = point.lat, lon = point.lon, "Centroid from GeoJSON");
                region.points.push(point);
                filled += 1;
            }
        }
        filled
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// States with more than one region, in catalog order, with their member ids.
    pub fn merge_groups(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for region in &self.regions {
            match groups.iter_mut().find(|(state, _)| *state == region.state) {
                Some((_, ids)) => ids.push(region.id.clone()),
                None => groups.push((region.state.clone(), vec![region.id.clone()])),
            }
        }
        groups.retain(|(_, ids)| ids.len() > 1);
        groups
    }
}

/// Vertex-average centroid of a Polygon or MultiPolygon feature
/// (GeoJSON coordinates are `[lon, lat]`).
pub fn feature_centroid(feature: &Value) -> Option<SamplePoint> {
    let geometry = &feature["geometry"];
    let coords = &geometry["coordinates"];
    let polygons: Vec<&Value> = match geometry["type"].as_str()? {
        "Polygon" => vec![coords],
        "MultiPolygon" => coords.as_array()?.iter().collect(),
        _ => return None,
    };

    let (mut sum_lon, mut sum_lat, mut count) = (0.0, 0.0, 0usize);
    for polygon in polygons {
        for ring in polygon.as_array()? {
            for pt in ring.as_array()? {
                let (Some(lon), Some(lat)) = (pt[0].as_f64(), pt[1].as_f64()) else {
                    continue;
                };
                sum_lon += lon;
                sum_lat += lat;
                count += 1;
            }
        }
    }

    if count == 0 {
        return None;
    }
    Some(SamplePoint::new(sum_lat / count as f64, sum_lon / count as f64))
}
