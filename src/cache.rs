//! On-disk cache of the bulletin for the current 3-hour IST cycle.

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::pipeline::types::{Bulletin, to_ist};

/// Bumped whenever the bulletin layout changes so old files are ignored.
pub const CACHE_VERSION: &str = "v1";

/// `bulletin_v1_<YYYYMMDD>_<n>` where `n` is the 3-hour IST slot (0-7).
pub fn cycle_key(now: DateTime<Utc>) -> String {
    let local = to_ist(now);
    format!(
        "bulletin_{CACHE_VERSION}_{}_{}",
        local.format("%Y%m%d"),
        local.hour() / 3
    )
}

pub struct CycleCache {
    dir: PathBuf,
}

impl CycleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Bulletin cached for the cycle containing `now`. A corrupt file is a miss.
    pub fn load(&self, now: DateTime<Utc>) -> Result<Option<Bulletin>> {
        let path = self.path_for(&cycle_key(now));
        if !path.exists() {
            debug!(path = %path.display(), "Cycle cache miss");
            return Ok(None);
        }
        let bytes = std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_slice(&bytes) {
            Ok(bulletin) => {
                info!(path = %path.display(), "Using cached bulletin");
                Ok(Some(bulletin))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
                Ok(None)
            }
        }
    }

    pub fn save(&self, bulletin: &Bulletin) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&bulletin.cycle);
        std::fs::write(&path, serde_json::to_vec(bulletin)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Cycle cache written");
        Ok(path)
    }

    /// Deletes every cached bulletin except `keep`. Returns how many went.
    pub fn purge_except(&self, keep: &str) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_stale_entry(&path, keep) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Purged stale cycle cache");
        }
        Ok(removed)
    }
}

fn is_stale_entry(path: &Path, keep: &str) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    path.extension().is_some_and(|e| e == "json") && stem.starts_with("bulletin_") && stem != keep
}
