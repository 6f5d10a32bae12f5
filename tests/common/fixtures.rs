//! Shared fixtures: stub collaborators and an on-disk test workspace

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use imageforge::error::{BackendError, UploadError};
use imageforge::models::{TaskPoll, TaskSpec, UploadedAsset};
use imageforge::{ConfigManager, GenerationBackend, Orchestrator, TextGenerator, Uploader};

/// In-memory generation backend with call accounting.
///
/// Tracks the highest number of concurrently in-flight submits so tests can
/// assert concurrency ceilings, and can fail a configured number of leading
/// submits with a retryable status.
pub struct StubBackend {
    pub submits: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    hold: Duration,
    failures_remaining: AtomicUsize,
}

impl StubBackend {
    pub fn succeeding() -> Self {
        Self::build(Duration::ZERO, 0)
    }

    /// Every submit holds its in-flight slot for `hold` before returning.
    pub fn with_hold(hold: Duration) -> Self {
        Self::build(hold, 0)
    }

    /// The first `failures` submits fail with a retryable 503.
    pub fn flaky(failures: usize) -> Self {
        Self::build(Duration::ZERO, failures)
    }

    fn build(hold: Duration, failures: usize) -> Self {
        Self {
            submits: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hold,
            failures_remaining: AtomicUsize::new(failures),
        }
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn observed_max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GenerationBackend for StubBackend {
    async fn submit(&self, _spec: &TaskSpec) -> Result<String, BackendError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(BackendError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(format!("task-{}", n))
    }

    async fn poll(&self, task_id: &str) -> Result<TaskPoll, BackendError> {
        Ok(TaskPoll::Success {
            result_urls: vec![format!("https://cdn.test/{}.png", task_id)],
        })
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<(), BackendError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
        }
        tokio::fs::write(dest, b"png-bytes")
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// In-memory uploader with call accounting.
pub struct MemoryUploader {
    pub uploads: AtomicUsize,
    pub refreshes: AtomicUsize,
    delay: Duration,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Slow uploads widen the race window for duplicate-upload tests.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            uploads: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for MemoryUploader {
    async fn upload(&self, _path: &Path, _folder: &str) -> Result<UploadedAsset, UploadError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedAsset {
            remote_id: format!("asset-{}", n),
            url: format!("https://store.test/asset-{}", n),
        })
    }

    async fn refresh(&self, remote_ids: &[String]) -> Result<Vec<String>, UploadError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(remote_ids
            .iter()
            .map(|id| format!("https://store.test/{}?fresh", id))
            .collect())
    }
}

/// A temporary project directory with asset pools and both config files.
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new(product_count: usize, prompt_count: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        let products = root.join("assets/products");
        std::fs::create_dir_all(&products).unwrap();
        for i in 1..=product_count {
            std::fs::write(products.join(format!("product{}.png", i)), b"img").unwrap();
        }

        let prompts = root.join("assets/prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        for i in 1..=prompt_count {
            std::fs::write(
                prompts.join(format!("prompt{}.txt", i)),
                format!("Scene {} of {{total_groups}}: showcase shot", i),
            )
            .unwrap();
        }

        let config = serde_json::json!({
            "api_key": "test-key",
            "api_base_url": "https://api.test/v1",
            "image_service": "jobs",
            "model": "test-model",
            "poll_interval": 0.01,
            "max_wait": 5.0,
            "storage": {
                "base_url": "https://store.test",
                "access_key": "store-key",
                "bucket": "assets"
            },
            "limits": {
                "max_in_flight": 100,
                "rate_limit_requests": 100,
                "rate_limit_window": 1.0,
                "max_retries": 2,
                "retry_base_ms": 10,
                "retry_cap_ms": 50
            }
        });
        std::fs::write(
            root.join("config.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a scene-mode template and return its path.
    pub fn scene_template(&self, group_count: usize, images_per_group: u32) -> PathBuf {
        self.write_template(serde_json::json!({
            "name": "scene-batch",
            "mode": "scene_generation",
            "group_count": group_count,
            "images_per_group": images_per_group,
            "product_images": { "source_dir": "assets/products" },
            "prompts": { "source_dir": "assets/prompts" },
            "output": { "base_dir": "outputs" }
        }))
    }

    pub fn write_template(&self, template: serde_json::Value) -> PathBuf {
        let path = self.root().join("template.json");
        std::fs::write(&path, serde_json::to_string_pretty(&template).unwrap()).unwrap();
        path
    }

    pub fn config_manager(&self) -> ConfigManager {
        ConfigManager::new(self.root().to_path_buf(), self.root().join("config.json"))
    }

    pub fn orchestrator(
        &self,
        template_path: PathBuf,
        backend: Arc<StubBackend>,
        uploader: Arc<MemoryUploader>,
        text_generator: Option<Arc<dyn TextGenerator>>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.config_manager(),
            template_path,
            backend,
            uploader,
            text_generator,
        )
    }
}
