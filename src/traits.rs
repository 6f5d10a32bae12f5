//! Collaborator trait definitions with mockall annotations for testing
//!
//! The orchestrator core consumes these interfaces and never sees a concrete
//! vendor client. Implementations are selected once at startup from
//! configuration and injected at construction.

use std::path::Path;

use crate::error::{BackendError, UploadError};
use crate::models::{ProductInfo, TaskPoll, TaskSpec, TextResult, UploadedAsset};

/// A remote image-generation service, adapted to a uniform submit/poll/download
/// shape regardless of the vendor's own payload and polling conventions.
#[mockall::automock]
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit one generation task and return the backend's task id.
    async fn submit(&self, spec: &TaskSpec) -> Result<String, BackendError>;

    /// Check on a previously submitted task.
    async fn poll(&self, task_id: &str) -> Result<TaskPoll, BackendError>;

    /// Download a result asset to a local path, creating parent directories.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), BackendError>;
}

/// Remote object storage for input assets.
///
/// Uploads must be idempotent from the orchestrator's point of view; the
/// orchestrator additionally memoizes them per run through the upload cache.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a local asset into the given remote folder.
    async fn upload(&self, path: &Path, folder: &str) -> Result<UploadedAsset, UploadError>;

    /// Re-issue possibly-expired URLs for already-uploaded assets, in the
    /// same order as the given ids.
    async fn refresh(&self, remote_ids: &[String]) -> Result<Vec<String>, UploadError>;
}

/// Marketing copy generator, called at most once per group.
#[mockall::automock]
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, product_info: &ProductInfo) -> Result<TextResult, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_traits_can_be_instantiated() {
        let _backend = MockGenerationBackend::new();
        let _uploader = MockUploader::new();
        let _text = MockTextGenerator::new();
    }
}
