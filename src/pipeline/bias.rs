//! Per-region bias learned from operator observations.
//!
//! `new_bias = (1 - α)·old_bias + α·(observed - predicted)`, applied by
//! subtracting the bias from aggregated percentages before classification.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::infra::bias_store::BiasStore;
use crate::pipeline::utility::clamp_percent;

pub const DEFAULT_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasRecord {
    pub bias: f64,
    pub observations: u32,
    pub updated_at: DateTime<Utc>,
}

impl BiasRecord {
    /// One incremental EWMA step.
    pub fn updated(previous: Option<&BiasRecord>, observed: f64, predicted: f64, alpha: f64) -> Self {
        let old = previous.map_or(0.0, |r| r.bias);
        let error = clamp_percent(observed) - clamp_percent(predicted);
        BiasRecord {
            bias: (1.0 - alpha) * old + alpha * error,
            observations: previous.map_or(0, |r| r.observations) + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Subtracts `bias` and clamps back into [0,100].
pub fn correct(raw: f64, bias: f64) -> f64 {
    clamp_percent(raw - bias)
}

#[derive(Clone)]
pub struct BiasCorrector {
    store: Arc<dyn BiasStore>,
    alpha: f64,
}

impl BiasCorrector {
    pub fn new(store: Arc<dyn BiasStore>, alpha: f64) -> Self {
        Self { store, alpha }
    }

    /// Records an observation for a past hour and returns the updated record.
    #[tracing::instrument(skip(self))]
    pub async fn observe(&self, region_id: &str, observed: f64, predicted: f64) -> Result<BiasRecord> {
        let previous = self.store.get(region_id).await?;
        let record = BiasRecord::updated(previous.as_ref(), observed, predicted, self.alpha);
        self.store.set(region_id, record).await?;
        info!(
            region_id,
            bias = record.bias,
            observations = record.observations,
            "Bias updated"
        );
        Ok(record)
    }

    /// Current bias for `region_id`, 0 when nothing has been learned yet.
    pub async fn current(&self, region_id: &str) -> Result<f64> {
        Ok(self.store.get(region_id).await?.map_or(0.0, |r| r.bias))
    }

    /// Bias for each region in one read pass, taken before a cycle starts.
    pub async fn snapshot<'a, I>(&self, region_ids: I) -> Result<HashMap<String, f64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = HashMap::new();
        for id in region_ids {
            out.insert(id.to_string(), self.current(id).await?);
        }
        Ok(out)
    }
}
