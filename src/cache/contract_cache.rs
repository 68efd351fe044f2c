/// Contract Cache Reader: a read-only view over a JSON file written
/// atomically by a sibling refresher process. The core never writes this
/// file; it only polls for a newer mtime and swaps in the parsed mapping.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

const DEFAULT_LOT_SIZE: i64 = 75;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpiryMapping {
    pub current_week: Option<String>,
    pub next_week: Option<String>,
    pub current_month: Option<String>,
    pub next_month: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrikeRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OptionsSection {
    #[serde(default)]
    expiry_dates: Vec<String>,
    #[serde(default)]
    mapping: Option<ExpiryMapping>,
    #[serde(default)]
    strikes: Option<StrikeRange>,
    #[serde(default)]
    lot_size: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    options: OptionsSection,
}

struct Loaded {
    document: CacheDocument,
    loaded_mtime: SystemTime,
}

/// Memory-mapped-in-spirit view over the cache file: the whole document is
/// small (a few KB), so "memory-mapped" here means "parsed once, held in
/// memory, swapped by pointer on reload" rather than an actual mmap.
pub struct ContractCache {
    path: PathBuf,
    inner: RwLock<Option<Loaded>>,
}

impl ContractCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            inner: RwLock::new(None),
        }
    }

    /// Load at startup. Fails with `CacheMissing` if the file does not
    /// exist — per §4.2 this is the one case where cache absence is fatal
    /// at the reader layer (callers may still fall back to
    /// `getNextExpiry`, but that is the runner's decision, not this one's).
    pub async fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(EngineError::CacheMissing(format!(
                "contract cache file not found at {}",
                self.path.display()
            )));
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let document: CacheDocument = serde_json::from_str(&raw)?;
        let mtime = tokio::fs::metadata(&self.path).await?.modified()?;
        *self.inner.write().await = Some(Loaded {
            document,
            loaded_mtime: mtime,
        });
        info!("contract cache loaded from {}", self.path.display());
        Ok(())
    }

    /// `checkForUpdate() -> bool`: true iff the file's mtime advanced since
    /// last load, in which case the reload already happened as a side
    /// effect (the swap itself is a pointer update under the write lock).
    pub async fn check_for_update(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let disk_mtime = tokio::fs::metadata(&self.path).await?.modified()?;
        let stale = match self.inner.read().await.as_ref() {
            Some(loaded) => disk_mtime > loaded.loaded_mtime,
            None => true,
        };
        if stale {
            match self.load().await {
                Ok(()) => {
                    debug!("contract cache reloaded after mtime advance");
                    return Ok(true);
                }
                Err(e) => {
                    warn!("contract cache reload failed, keeping prior mapping: {}", e);
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }

    pub async fn get_options_expiry_map(&self) -> Option<ExpiryMapping> {
        self.inner
            .read()
            .await
            .as_ref()
            .and_then(|l| l.document.options.mapping.clone())
    }

    pub async fn get_options_lot_size(&self) -> i64 {
        self.inner
            .read()
            .await
            .as_ref()
            .and_then(|l| l.document.options.lot_size)
            .unwrap_or(DEFAULT_LOT_SIZE)
    }

    pub async fn get_strike_range(&self) -> Option<StrikeRange> {
        self.inner
            .read()
            .await
            .as_ref()
            .and_then(|l| l.document.options.strikes.clone())
    }

    pub async fn expiry_dates(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|l| l.document.options.expiry_dates.clone())
            .unwrap_or_default()
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cache(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("options_cache.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_file_fails_with_cache_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContractCache::new(dir.path().join("nope.json"));
        let err = cache.load().await.unwrap_err();
        assert!(matches!(err, EngineError::CacheMissing(_)));
    }

    #[tokio::test]
    async fn missing_lot_size_defaults_to_75() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(
            &dir,
            r#"{"options": {"expiry_dates": ["2026-07-30"], "mapping": {"current_week": "2026-07-30"}}}"#,
        );
        let cache = ContractCache::new(path);
        cache.load().await.unwrap();
        assert_eq!(cache.get_options_lot_size().await, 75);
    }

    #[tokio::test]
    async fn check_for_update_reloads_on_mtime_advance() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(
            &dir,
            r#"{"options": {"expiry_dates": [], "mapping": {"current_week": "2026-07-30"}, "lot_size": 75}}"#,
        );
        let cache = ContractCache::new(&path);
        cache.load().await.unwrap();
        assert!(!cache.check_for_update().await.unwrap());

        // Sleep past typical filesystem mtime granularity (1s on many
        // platforms) before rewriting so the mtime comparison is reliable.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        std::fs::write(
            &path,
            r#"{"options": {"expiry_dates": [], "mapping": {"current_week": "2026-08-06"}, "lot_size": 50}}"#,
        )
        .unwrap();

        assert!(cache.check_for_update().await.unwrap());
        assert_eq!(cache.get_options_lot_size().await, 50);
    }
}
