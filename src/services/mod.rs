//! Concrete collaborator implementations
//!
//! One generation backend per vendor API style, the storage uploader, the
//! copy generator and the output layout. The engine only ever sees these
//! through the traits in [`crate::traits`].

pub mod chat_backend;
pub mod jobs_backend;
pub mod output;
pub mod text;
pub mod uploader;

pub use chat_backend::ChatApiBackend;
pub use jobs_backend::JobsApiBackend;
pub use output::OutputManager;
pub use text::ChatTextGenerator;
pub use uploader::StorageUploader;

use std::path::Path;

use crate::error::BackendError;

/// Stream a result asset to a local file, creating parent directories.
pub(crate) async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(), BackendError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            message: format!("download failed for {}", url),
        });
    }
    let bytes = response.bytes().await?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BackendError::Transport(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| BackendError::Transport(format!("cannot write {}: {}", dest.display(), e)))?;
    tracing::debug!("downloaded {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}
