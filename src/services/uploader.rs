//! HTTP object-storage uploader

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::error::UploadError;
use crate::models::UploadedAsset;
use crate::traits::Uploader;

/// Uploads asset bytes to an object-storage gateway and re-issues presigned
/// URLs on demand. The gateway caches by content, so repeated uploads of an
/// unchanged asset are cheap on its side; the orchestrator still memoizes
/// per run through the upload cache.
pub struct StorageUploader {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
    bucket: String,
    expire_seconds: u64,
}

impl StorageUploader {
    pub fn new(
        base_url: &str,
        access_key: &str,
        bucket: &str,
        expire_seconds: u64,
    ) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            bucket: bucket.to_string(),
            expire_seconds,
        })
    }

    async fn parse_response(&self, response: reqwest::Response) -> Result<Value, UploadError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Uploader for StorageUploader {
    async fn upload(&self, path: &Path, folder: &str) -> Result<UploadedAsset, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "asset".to_string());

        tracing::debug!("uploading {} ({} bytes)", path.display(), bytes.len());
        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .header("Authorization", format!("Bearer {}", self.access_key))
            .query(&[
                ("bucket", self.bucket.as_str()),
                ("folder", folder),
                ("name", file_name.as_str()),
                ("expire", &self.expire_seconds.to_string()),
            ])
            .body(bytes)
            .send()
            .await?;

        let body = self.parse_response(response).await?;
        let remote_id = body
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| UploadError::InvalidResponse("upload response missing id".to_string()))?
            .to_string();
        let url = body
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| UploadError::InvalidResponse("upload response missing url".to_string()))?
            .to_string();
        Ok(UploadedAsset { remote_id, url })
    }

    async fn refresh(&self, remote_ids: &[String]) -> Result<Vec<String>, UploadError> {
        let response = self
            .client
            .post(format!("{}/files/refresh", self.base_url))
            .header("Authorization", format!("Bearer {}", self.access_key))
            .json(&json!({
                "bucket": self.bucket,
                "ids": remote_ids,
                "expire": self.expire_seconds,
            }))
            .send()
            .await?;

        let body = self.parse_response(response).await?;
        let urls: Vec<String> = body
            .get("urls")
            .and_then(|u| u.as_array())
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .ok_or_else(|| {
                UploadError::InvalidResponse("refresh response missing urls".to_string())
            })?;
        if urls.len() != remote_ids.len() {
            return Err(UploadError::InvalidResponse(format!(
                "refresh returned {} urls for {} ids",
                urls.len(),
                remote_ids.len()
            )));
        }
        Ok(urls)
    }
}
