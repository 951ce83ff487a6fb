//! Maps cloud-cover percentages onto the five bulletin categories.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pipeline::utility::clamp_percent;

/// Bulletin categories, ordered from least to most cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    #[serde(rename = "Clear Sky")]
    ClearSky,
    #[serde(rename = "Low Cloud Cover")]
    Low,
    #[serde(rename = "Medium Cloud Cover")]
    Medium,
    #[serde(rename = "High Cloud Cover")]
    High,
    #[serde(rename = "Overcast Cloud Cover")]
    Overcast,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::ClearSky,
        Bucket::Low,
        Bucket::Medium,
        Bucket::High,
        Bucket::Overcast,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Bucket::ClearSky => "Clear Sky",
            Bucket::Low => "Low Cloud Cover",
            Bucket::Medium => "Medium Cloud Cover",
            Bucket::High => "High Cloud Cover",
            Bucket::Overcast => "Overcast Cloud Cover",
        }
    }

    /// Map fill colour used by the bulletin legend.
    pub fn color(self) -> &'static str {
        match self {
            Bucket::ClearSky => "#A7D8EB",
            Bucket::Low => "#C4E17F",
            Bucket::Medium => "#FFF952",
            Bucket::High => "#E69536",
            Bucket::Overcast => "#FF4D4D",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Bucket::ClearSky => "☀️",
            Bucket::Low => "🌤️",
            Bucket::Medium => "⛅",
            Bucket::High => "☁️",
            Bucket::Overcast => "🌫️",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Upper bounds of the first four buckets. Lower bounds are inclusive, upper
/// bounds exclusive, and the last bucket is closed at 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub clear: f64,
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            clear: 10.0,
            low: 30.0,
            medium: 50.0,
            high: 75.0,
        }
    }
}

impl Thresholds {
    /// `[lo, hi)` for `bucket`; the overcast range ends at 100.
    pub fn range(&self, bucket: Bucket) -> (f64, f64) {
        let edges = [0.0, self.clear, self.low, self.medium, self.high, 100.0];
        let i = bucket.index();
        (edges[i], edges[i + 1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    pub thresholds: Thresholds,
    pub hysteresis_margin: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            hysteresis_margin: 3.0,
        }
    }
}

impl Classifier {
    pub fn new(thresholds: Thresholds, hysteresis_margin: f64) -> Self {
        Self {
            thresholds,
            hysteresis_margin,
        }
    }

    /// Plain range lookup; input is clamped to [0,100] first.
    pub fn classify(&self, pct: f64) -> Bucket {
        let p = clamp_percent(pct);
        let t = &self.thresholds;
        match p {
            p if p < t.clear => Bucket::ClearSky,
            p if p < t.low => Bucket::Low,
            p if p < t.medium => Bucket::Medium,
            p if p < t.high => Bucket::High,
            _ => Bucket::Overcast,
        }
    }

    /// Keeps `previous` while `pct` stays inside its range widened by the
    /// hysteresis margin on both sides.
    pub fn classify_with(&self, pct: f64, previous: Option<Bucket>) -> Bucket {
        let p = clamp_percent(pct);
        if let Some(prev) = previous {
            let (lo, hi) = self.thresholds.range(prev);
            let hi = if prev == Bucket::Overcast { f64::INFINITY } else { hi };
            if p >= lo - self.hysteresis_margin && p < hi + self.hysteresis_margin {
                return prev;
            }
        }
        self.classify(p)
    }
}
