//! Pipeline parameters.
//!
//! Everything has a default, so the JSON file only needs the fields being
//! changed:
//! ```json
//! {
//!   "thresholds": { "clear": 10, "low": 30, "medium": 50, "high": 75 },
//!   "solar_window": { "start_hour": 9, "end_hour": 16 },
//!   "providers": [
//!     { "kind": "open_meteo", "model": "icon_seamless" },
//!     { "kind": "nasa_power" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::pipeline::aggregate::HourWindow;
use crate::pipeline::bias::DEFAULT_ALPHA;
use crate::pipeline::classify::{Classifier, Thresholds};
use crate::pipeline::ensemble::LayerWeights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenMeteo {
        model: String,
        #[serde(default)]
        layered: bool,
    },
    NasaPower,
    OpenWeatherMap,
}

/// Open-Meteo models queried by default, each an independent ensemble member.
pub const DEFAULT_MODELS: &[&str] = &["gfs_seamless", "icon_seamless", "ecmwf_ifs04", "best_match"];

/// Longest forecast Open-Meteo serves (16 days).
pub const MAX_HORIZON_HOURS: u32 = 384;

fn default_providers() -> Vec<ProviderConfig> {
    DEFAULT_MODELS
        .iter()
        .map(|m| ProviderConfig::OpenMeteo {
            model: m.to_string(),
            layered: false,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub thresholds: Thresholds,
    pub hysteresis_margin: f64,
    pub solar_window: HourWindow,
    pub daylight_window: HourWindow,
    pub horizon_hours: u32,
    pub history_hours: u32,
    pub layer_weights: LayerWeights,
    pub bias_alpha: f64,
    pub smoothing: bool,
    pub providers: Vec<ProviderConfig>,
    /// Per-request timeout; `None` leaves transport defaults in place.
    pub fetch_timeout_secs: Option<u64>,
    pub connect_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            hysteresis_margin: 3.0,
            solar_window: HourWindow::solar(),
            daylight_window: HourWindow::daylight(),
            horizon_hours: 48,
            history_hours: 12,
            layer_weights: LayerWeights::default(),
            bias_alpha: DEFAULT_ALPHA,
            smoothing: false,
            providers: default_providers(),
            fetch_timeout_secs: None,
            connect_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Reads the JSON file at `path` and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let edges = [0.0, t.clear, t.low, t.medium, t.high, 100.0];
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            bail!("bucket thresholds must be strictly increasing within (0, 100): {t:?}");
        }
        for (name, w) in [("solar_window", self.solar_window), ("daylight_window", self.daylight_window)] {
            if w.start_hour > w.end_hour || w.end_hour > 23 {
                bail!("{name} must satisfy start <= end <= 23, got {w:?}");
            }
        }
        if !(0.0..=1.0).contains(&self.bias_alpha) || self.bias_alpha == 0.0 {
            bail!("bias_alpha must be in (0, 1], got {}", self.bias_alpha);
        }
        let w = &self.layer_weights;
        if ((w.low + w.mid + w.high) - 1.0).abs() > 1e-6 {
            bail!("layer weights must sum to 1.0, got {w:?}");
        }
        if self.horizon_hours == 0 || self.horizon_hours > MAX_HORIZON_HOURS {
            bail!(
                "horizon_hours must be within 1..={MAX_HORIZON_HOURS}, got {}",
                self.horizon_hours
            );
        }
        if self.hysteresis_margin < 0.0 {
            bail!("hysteresis_margin must not be negative");
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.thresholds, self.hysteresis_margin)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}
