//! Data model shared across the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// How a run turns its input assets into generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Each group renders products into a distinct generated scene.
    SceneGeneration,
    /// Every group transfers products onto one shared reference look.
    SubjectTransfer,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::SceneGeneration => write!(f, "scene_generation"),
            GenerationMode::SubjectTransfer => write!(f, "subject_transfer"),
        }
    }
}

/// One single-image request handed to a generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub prompt: String,
    pub input_urls: Vec<String>,
    pub output_path: PathBuf,
    pub aspect_ratio: String,
    pub resolution: String,
    pub output_format: String,
}

/// Poll outcome for a submitted backend task.
#[derive(Debug, Clone)]
pub enum TaskPoll {
    Pending,
    Success { result_urls: Vec<String> },
    Failed { message: String, retryable: bool },
}

/// A remote copy of a local asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAsset {
    pub remote_id: String,
    pub url: String,
}

/// Product description handed to the copy generator, built from the
/// template's variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_name: String,
    pub brand: String,
    pub style: String,
    pub features: String,
    pub target_audience: String,
}

/// Terminal outcome of one image task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: usize,
    pub output_path: PathBuf,
    pub task_id: String,
    pub prompt: String,
    pub input_images: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of the per-group marketing copy generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResult {
    pub title: String,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
}

impl TextResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregated outcome of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResult {
    pub group_index: usize,
    pub group_dir: PathBuf,
    pub product_images: Vec<PathBuf>,
    pub reference_image: Option<PathBuf>,
    pub prompt_template: String,
    pub prompt_rendered: String,
    pub images: Vec<ImageResult>,
    pub text: Option<TextResult>,
    pub completed_at: DateTime<Utc>,
}

impl GroupResult {
    pub fn successful_images(&self) -> usize {
        self.images.iter().filter(|i| i.success).count()
    }
}

/// Final summary of a run, also used for the cancelled/dry-run early returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_dir: PathBuf,
    pub total_groups: usize,
    pub completed_groups: usize,
    pub total_images: usize,
    pub successful_images: usize,
    pub failed_images: usize,
    pub duration_seconds: f64,
}

impl RunResult {
    pub fn empty(run_dir: PathBuf, total_groups: usize, duration_seconds: f64) -> Self {
        Self {
            run_dir,
            total_groups,
            completed_groups: 0,
            total_images: 0,
            successful_images: 0,
            failed_images: 0,
            duration_seconds,
        }
    }
}

/// Run-level log written into the run directory once dispatch finishes.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationLog {
    pub template_name: String,
    pub mode: GenerationMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub groups: Vec<serde_json::Value>,
    pub summary: Option<serde_json::Value>,
}

/// Context available to prompt templates as `{placeholder}` variables.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub group_index: usize,
    pub group_num: usize,
    pub image_index: usize,
    pub image_num: usize,
    pub total_groups: usize,
    pub mode: GenerationMode,
    pub custom_vars: HashMap<String, serde_json::Value>,
}
