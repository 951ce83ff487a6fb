//! Durable per-region bias state.
//!
//! [`BiasStore`] is the get/set seam; [`JsonFileBiasStore`] keeps every
//! record in one JSON object on disk and [`MemoryBiasStore`] backs tests and
//! dry runs.

mod file;

pub use file::JsonFileBiasStore;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::pipeline::bias::BiasRecord;

#[async_trait::async_trait]
pub trait BiasStore: Send + Sync {
    async fn get(&self, region_id: &str) -> Result<Option<BiasRecord>>;
    async fn set(&self, region_id: &str, record: BiasRecord) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryBiasStore {
    records: Mutex<HashMap<String, BiasRecord>>,
}

#[async_trait::async_trait]
impl BiasStore for MemoryBiasStore {
    async fn get(&self, region_id: &str) -> Result<Option<BiasRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("bias store lock poisoned"))?;
        Ok(records.get(region_id).copied())
    }

    async fn set(&self, region_id: &str, record: BiasRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("bias store lock poisoned"))?
            .insert(region_id.to_string(), record);
        Ok(())
    }
}
