use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use super::BiasStore;
use crate::pipeline::bias::BiasRecord;

/// Bias records keyed by region id, stored as a plain JSON object:
/// ```json
/// { "Punjab:Punjab": { "bias": 3.2, "observations": 7, "updated_at": "..." } }
/// ```
///
/// Writes go to a sibling temp file that is renamed over the original.
pub struct JsonFileBiasStore {
    path: PathBuf,
}

impl JsonFileBiasStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, BiasRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt bias store {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }
}

#[async_trait::async_trait]
impl BiasStore for JsonFileBiasStore {
    async fn get(&self, region_id: &str) -> Result<Option<BiasRecord>> {
        Ok(self.load().await?.get(region_id).copied())
    }

    async fn set(&self, region_id: &str, record: BiasRecord) -> Result<()> {
        let mut records = self.load().await?;
        records.insert(region_id.to_string(), record);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&records)?).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), region_id, "Bias record persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::env;

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let store = JsonFileBiasStore::new(env::temp_dir().join("cloud_bulletin_missing_bias.json"));
        let _ = tokio::fs::remove_file(&store.path).await;
        assert!(store.get("Punjab:Punjab").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_persists_across_instances() {
        let path = env::temp_dir().join("cloud_bulletin_test_bias.json");
        let _ = tokio::fs::remove_file(&path).await;

        let record = BiasRecord {
            bias: 4.5,
            observations: 3,
            updated_at: Utc::now(),
        };
        JsonFileBiasStore::new(&path).set("Rajasthan:West Rajasthan", record).await.unwrap();

        let reopened = JsonFileBiasStore::new(&path);
        let got = reopened.get("Rajasthan:West Rajasthan").await.unwrap().unwrap();
        assert_eq!(got.bias, 4.5);
        assert_eq!(got.observations, 3);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
