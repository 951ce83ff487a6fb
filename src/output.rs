//! Bulletin outputs: log views, the JSON file, and CSV rows.
//!
//! Anything that consumes a finished [`Bulletin`] implements [`Renderer`];
//! the driver calls each one after every cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::types::{Bulletin, Classified, RegionStatus};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;
    async fn render(&self, bulletin: &Bulletin) -> Result<()>;
}

/// Logs one line per region and merged state.
pub fn print_pretty(bulletin: &Bulletin) {
    for region in bulletin.regions.values() {
        let days: Vec<String> = region
            .horizon
            .iter()
            .map(|h| format!("D{} {}", h.day, describe(&h.value)))
            .collect();
        info!(
            region_id = %region.region_id,
            status = ?region.status,
            bias = region.bias,
            "{}",
            days.join(" | ")
        );
    }
    for state in bulletin.states.values() {
        let days: Vec<String> = state
            .horizon
            .iter()
            .map(|h| format!("D{} {}", h.day, describe(&h.value)))
            .collect();
        info!(state = %state.state, members = state.members.len(), "{}", days.join(" | "));
    }
    debug!("{:#?}", bulletin);
}

/// Logs the bulletin as pretty-printed JSON.
pub fn print_json(bulletin: &Bulletin) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(bulletin)?);
    Ok(())
}

fn describe(value: &Classified) -> String {
    match (value.percent, value.bucket) {
        (Some(pct), Some(bucket)) => format!("{} {}% {}", bucket.icon(), pct, bucket),
        _ => "no data".to_string(),
    }
}

pub fn write_bulletin_json(path: &Path, bulletin: &Bulletin) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(bulletin)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Bulletin written");
    Ok(())
}

pub fn read_bulletin_json(path: &Path) -> Result<Bulletin> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not a bulletin", path.display()))
}

/// One CSV row: a region (or merged state) on one horizon day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulletinRow {
    pub cycle: String,
    pub generated_at: String,
    pub area: String,
    pub merged: bool,
    pub status: String,
    pub day: u8,
    pub raw_percent: Option<f64>,
    pub percent: Option<f64>,
    pub bucket: Option<String>,
}

pub fn bulletin_rows(bulletin: &Bulletin) -> Vec<BulletinRow> {
    let generated_at = bulletin.generated_at.to_rfc3339();
    let row = |area: &str, merged: bool, status: RegionStatus, day: u8, v: &Classified| BulletinRow {
        cycle: bulletin.cycle.clone(),
        generated_at: generated_at.clone(),
        area: area.to_string(),
        merged,
        status: format!("{status:?}").to_lowercase(),
        day,
        raw_percent: v.raw_percent,
        percent: v.percent,
        bucket: v.bucket.map(|b| b.label().to_string()),
    };

    let mut rows = Vec::new();
    for region in bulletin.regions.values() {
        for h in &region.horizon {
            rows.push(row(&region.region_id, false, region.status, h.day, &h.value));
        }
    }
    for state in bulletin.states.values() {
        for h in &state.horizon {
            rows.push(row(&state.state, true, RegionStatus::Fresh, h.day, &h.value));
        }
    }
    rows
}

/// Appends rows to a CSV file, writing headers only when the file is new.
pub fn append_records(path: &Path, rows: &[BulletinRow]) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = rows.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

pub struct JsonFileRenderer {
    path: PathBuf,
}

impl JsonFileRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Renderer for JsonFileRenderer {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn render(&self, bulletin: &Bulletin) -> Result<()> {
        write_bulletin_json(&self.path, bulletin)?;
        info!(path = %self.path.display(), regions = bulletin.regions.len(), "Bulletin saved");
        Ok(())
    }
}

pub struct CsvRenderer {
    path: PathBuf,
}

impl CsvRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Renderer for CsvRenderer {
    fn name(&self) -> &str {
        "csv"
    }

    async fn render(&self, bulletin: &Bulletin) -> Result<()> {
        append_records(&self.path, &bulletin_rows(bulletin))
    }
}

pub struct LogRenderer {
    pub json: bool,
}

#[async_trait]
impl Renderer for LogRenderer {
    fn name(&self) -> &str {
        "log"
    }

    async fn render(&self, bulletin: &Bulletin) -> Result<()> {
        if self.json {
            print_json(bulletin)
        } else {
            print_pretty(bulletin);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::Bucket;
    use crate::pipeline::types::{HorizonForecast, RegionForecast};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn bulletin() -> Bulletin {
        let mut region = RegionForecast::no_data("Punjab:Punjab", "Punjab", "Punjab");
        region.status = RegionStatus::Fresh;
        region.horizon = vec![
            HorizonForecast {
                day: 1,
                value: Classified {
                    raw_percent: Some(5.0),
                    percent: Some(5.0),
                    bucket: Some(Bucket::ClearSky),
                },
            },
            HorizonForecast {
                day: 2,
                value: Classified::default(),
            },
        ];
        Bulletin {
            schema_version: 1,
            generated_at: Utc::now(),
            cycle: "bulletin_v1_20261019_3".to_string(),
            regions: BTreeMap::from([(region.region_id.clone(), region)]),
            states: BTreeMap::new(),
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&bulletin());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&bulletin()).unwrap();
    }

    #[test]
    fn test_rows_per_region_day() {
        let rows = bulletin_rows(&bulletin());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket.as_deref(), Some("Clear Sky"));
        assert_eq!(rows[1].bucket, None);
        assert_eq!(rows[1].status, "fresh");
    }

    #[test]
    fn test_append_records_creates_file() {
        let path = temp_path("cloud_bulletin_test_create.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        append_records(&path, &bulletin_rows(&bulletin())).unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("cycle,"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_records_no_duplicate_headers() {
        let path = temp_path("cloud_bulletin_test_headers.csv");
        let _ = fs::remove_file(&path);

        let rows = bulletin_rows(&bulletin());
        append_records(&path, &rows).unwrap();
        append_records(&path, &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.starts_with("cycle,")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 5);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_json_renderer_round_trip() {
        let path = temp_path("cloud_bulletin_test_render.json");
        let _ = fs::remove_file(&path);

        let b = bulletin();
        JsonFileRenderer::new(&path).render(&b).await.unwrap();
        assert_eq!(read_bulletin_json(&path).unwrap(), b);

        fs::remove_file(&path).unwrap();
    }
}
