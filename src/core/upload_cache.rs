//! Memoized, thread-safe upload of local assets to remote storage

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::error::UploadError;
use crate::models::UploadedAsset;
use crate::traits::Uploader;

type UploadCell = Arc<OnceCell<UploadedAsset>>;

/// Uploads each distinct local asset at most once per run.
///
/// The map mutex only guards the per-key cell lookup; the network upload for
/// a new key runs inside its cell, outside the map lock, so unrelated uploads
/// never serialize each other while concurrent callers for the *same* key
/// share a single upload. A failed upload leaves its cell empty and the next
/// caller retries.
pub struct AssetUploadCache {
    uploader: Arc<dyn Uploader>,
    folder: String,
    entries: Mutex<HashMap<PathBuf, UploadCell>>,
}

impl AssetUploadCache {
    pub fn new(uploader: Arc<dyn Uploader>, folder: String) -> Self {
        Self {
            uploader,
            folder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key_for(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Upload one asset, or return the cached result of a previous upload.
    pub async fn upload(&self, path: &Path) -> Result<UploadedAsset, UploadError> {
        let key = Self::key_for(path);
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key).or_default())
        };
        let asset = cell
            .get_or_try_init(|| self.uploader.upload(path, &self.folder))
            .await?;
        Ok(asset.clone())
    }

    /// Upload a batch of assets and return their URLs in order.
    pub async fn upload_all(&self, paths: &[PathBuf]) -> Result<Vec<String>, UploadError> {
        let mut urls = Vec::with_capacity(paths.len());
        for path in paths {
            urls.push(self.upload(path).await?.url);
        }
        Ok(urls)
    }

    /// Re-issue possibly-expired URLs for already-uploaded assets.
    ///
    /// Returns the fresh URLs in the order of `paths`; assets that were never
    /// uploaded are skipped, so callers should fall back to the upload-time
    /// URLs when the lengths differ.
    pub async fn refresh(&self, paths: &[PathBuf]) -> Result<Vec<String>, UploadError> {
        let mut keys = Vec::new();
        let mut ids = Vec::new();
        {
            let entries = self.entries.lock().await;
            for path in paths {
                let key = Self::key_for(path);
                if let Some(asset) = entries.get(&key).and_then(|cell| cell.get()) {
                    ids.push(asset.remote_id.clone());
                    keys.push((key, asset.remote_id.clone()));
                }
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let urls = self.uploader.refresh(&ids).await?;

        let mut entries = self.entries.lock().await;
        for ((key, remote_id), url) in keys.into_iter().zip(urls.iter()) {
            let refreshed = OnceCell::new_with(Some(UploadedAsset {
                remote_id,
                url: url.clone(),
            }));
            entries.insert(key, Arc::new(refreshed));
        }
        Ok(urls)
    }

    /// Number of assets uploaded so far.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.get().is_some()).count()
    }
}
