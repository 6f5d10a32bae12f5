//! Configuration loading and validation
//!
//! Two JSON documents drive a run: a global config (credentials, service
//! endpoints, concurrency and retry tuning) and a template config (what to
//! generate and from which asset pools). Both are fully resolved here before
//! the orchestrator sees them; any problem found at this stage is a
//! [`GeneratorError::Configuration`] and nothing is dispatched.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{GeneratorError, GeneratorResult};
use crate::models::GenerationMode;

/// Which image backend implementation to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageService {
    /// Async jobs API: create task, poll record-info, download result.
    Jobs,
    /// Chat-completions style API that returns the image in one response.
    Chat,
}

fn default_api_base_url() -> String {
    "https://api.example-studio.dev/api/v1".to_string()
}

fn default_model() -> String {
    "studio-image-1".to_string()
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_max_wait() -> f64 {
    1500.0
}

fn default_image_service() -> ImageService {
    ImageService::Jobs
}

fn default_expire_seconds() -> u64 {
    86_400
}

/// Object-storage gateway settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_url: String,
    #[serde(default)]
    pub access_key: String,
    pub bucket: String,
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: u64,
}

/// Copy-generation API settings; absent means copy generation is disabled
/// globally regardless of what templates ask for.
#[derive(Debug, Clone, Deserialize)]
pub struct TextApiConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_text_temperature")]
    pub temperature: f64,
    #[serde(default = "default_text_retries")]
    pub max_retries: u32,
}

fn default_text_temperature() -> f64 {
    0.8
}

fn default_text_retries() -> u32 {
    3
}

/// Concurrency and retry tuning for the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Global ceiling on in-flight backend calls across the whole run.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Sliding-window admission: at most this many requests...
    #[serde(default = "default_rate_requests")]
    pub rate_limit_requests: usize,
    /// ...within this many seconds.
    #[serde(default = "default_rate_window")]
    pub rate_limit_window: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
}

fn default_max_in_flight() -> usize {
    100
}

fn default_rate_requests() -> usize {
    20
}

fn default_rate_window() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            rate_limit_requests: default_rate_requests(),
            rate_limit_window: default_rate_window(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
        }
    }
}

/// Global configuration shared by every run.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_image_service")]
    pub image_service: ImageService,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait: f64,
    pub storage: StorageConfig,
    #[serde(default)]
    pub text_api: Option<TextApiConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl GlobalConfig {
    /// Whether the configured backend is subject to sliding-window admission.
    /// The chat backend enforces its own fairness server-side, so it opts out.
    pub fn rate_limited(&self) -> bool {
        self.image_service == ImageService::Jobs
    }
}

/// How many images a group should produce: a fixed count or an inclusive
/// `[min, max]` range sampled once per group.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CountSpec {
    Fixed(u32),
    Range([u32; 2]),
}

impl CountSpec {
    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> usize {
        match self {
            CountSpec::Fixed(n) => *n as usize,
            CountSpec::Range([lo, hi]) => rng.gen_range(*lo..=(*hi).max(*lo)) as usize,
        }
    }

    /// Upper bound, used for resource sufficiency checks.
    pub fn max(&self) -> usize {
        match self {
            CountSpec::Fixed(n) => *n as usize,
            CountSpec::Range([lo, hi]) => (*hi).max(*lo) as usize,
        }
    }
}

impl Default for CountSpec {
    fn default() -> Self {
        CountSpec::Fixed(1)
    }
}

fn default_coverage() -> u32 {
    100
}

/// One asset pool: a source directory plus optional user-pinned selections.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSelectionConfig {
    pub source_dir: String,
    #[serde(default)]
    pub specified_images: Vec<String>,
    /// Percentage of groups that consume the pinned selections.
    #[serde(default = "default_coverage")]
    pub specified_coverage: u32,
}

/// Prompt pool configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub source_dir: Option<String>,
    /// Scene mode: prompts consumed first, in order, by the first groups.
    #[serde(default)]
    pub specified_prompts: Vec<String>,
    /// Transfer mode: the single prompt shared by every group.
    #[serde(default)]
    pub specified_prompt: Option<String>,
    /// Inline template used when no prompt file is assigned.
    #[serde(default)]
    pub custom_template: Option<String>,
}

fn default_base_dir() -> String {
    "./outputs".to_string()
}

fn default_aspect_ratio() -> String {
    "4:5".to_string()
}

fn default_resolution() -> String {
    "2K".to_string()
}

fn default_format() -> String {
    "png".to_string()
}

fn default_max_concurrent_groups() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            aspect_ratio: default_aspect_ratio(),
            resolution: default_resolution(),
            format: default_format(),
            max_concurrent_groups: default_max_concurrent_groups(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextGenerationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One batch job: what to generate, from which pools, into which layout.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mode: GenerationMode,
    pub group_count: usize,
    #[serde(default)]
    pub images_per_group: CountSpec,
    pub product_images: ImageSelectionConfig,
    #[serde(default)]
    pub reference_images: Option<ImageSelectionConfig>,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub text_generation: Option<TextGenerationConfig>,
    #[serde(default)]
    pub template_variables: HashMap<String, serde_json::Value>,
}

/// Loads and validates the two config documents, resolving relative paths
/// against the project root.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    project_root: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(project_root: PathBuf, config_path: PathBuf) -> Self {
        Self {
            project_root,
            config_path,
        }
    }

    fn load_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> GeneratorResult<T> {
        if !path.exists() {
            return Err(GeneratorError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            GeneratorError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn load_global(&self) -> GeneratorResult<GlobalConfig> {
        let mut config: GlobalConfig = self.load_json(&self.config_path)?;
        apply_env_overrides(&mut config);
        let errors = validate_global(&config);
        if !errors.is_empty() {
            return Err(GeneratorError::config(errors.join("; ")));
        }
        Ok(config)
    }

    pub fn load_template(&self, template_path: &Path) -> GeneratorResult<TemplateConfig> {
        let template: TemplateConfig = self.load_json(template_path)?;
        let errors = validate_template(&template);
        if !errors.is_empty() {
            return Err(GeneratorError::config(errors.join("; ")));
        }
        Ok(template)
    }

    /// Resolve a possibly-relative config path against the project root.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Credentials left empty in the config file fall back to the environment
/// (and therefore to `.env` files loaded at startup).
fn apply_env_overrides(config: &mut GlobalConfig) {
    if config.api_key.trim().is_empty() {
        if let Ok(key) = std::env::var("IMAGEFORGE_API_KEY") {
            config.api_key = key;
        }
    }
    if config.storage.access_key.trim().is_empty() {
        if let Ok(key) = std::env::var("IMAGEFORGE_STORAGE_KEY") {
            config.storage.access_key = key;
        }
    }
    if let Some(text) = &mut config.text_api {
        if text.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("IMAGEFORGE_TEXT_API_KEY") {
                text.api_key = key;
            }
        }
    }
}

fn validate_global(config: &GlobalConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if config.api_key.trim().is_empty() {
        errors.push("api_key must not be empty".to_string());
    }
    if let Err(e) = Url::parse(&config.api_base_url) {
        errors.push(format!("api_base_url is not a valid URL: {}", e));
    }
    if let Err(e) = Url::parse(&config.storage.base_url) {
        errors.push(format!("storage.base_url is not a valid URL: {}", e));
    }
    if config.limits.max_in_flight == 0 {
        errors.push("limits.max_in_flight must be at least 1".to_string());
    }
    if config.limits.rate_limit_requests == 0 {
        errors.push("limits.rate_limit_requests must be at least 1".to_string());
    }
    if let Some(text) = &config.text_api {
        if let Err(e) = Url::parse(&text.base_url) {
            errors.push(format!("text_api.base_url is not a valid URL: {}", e));
        }
    }
    errors
}

fn validate_template(template: &TemplateConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if template.name.trim().is_empty() {
        errors.push("template name must not be empty".to_string());
    }
    if template.group_count == 0 {
        errors.push("group_count must be at least 1".to_string());
    }
    if template.images_per_group.max() == 0 {
        errors.push("images_per_group must be at least 1".to_string());
    }
    if let CountSpec::Range([lo, hi]) = template.images_per_group {
        if lo > hi {
            errors.push(format!(
                "images_per_group range is inverted: [{}, {}]",
                lo, hi
            ));
        }
    }
    if template.mode == GenerationMode::SubjectTransfer && template.reference_images.is_none() {
        errors.push("subject_transfer mode requires a reference_images section".to_string());
    }
    if template.output.max_concurrent_groups == 0 {
        errors.push("output.max_concurrent_groups must be at least 1".to_string());
    }
    if let Some(coverage) = template
        .reference_images
        .as_ref()
        .map(|r| r.specified_coverage)
        .filter(|c| *c > 100)
    {
        errors.push(format!(
            "reference_images.specified_coverage must be <= 100, got {}",
            coverage
        ));
    }
    if template.product_images.specified_coverage > 100 {
        errors.push(format!(
            "product_images.specified_coverage must be <= 100, got {}",
            template.product_images.specified_coverage
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_template(mode: &str) -> String {
        format!(
            r#"{{
                "name": "spring-launch",
                "mode": "{mode}",
                "group_count": 3,
                "images_per_group": 2,
                "product_images": {{ "source_dir": "assets/products" }},
                "reference_images": {{ "source_dir": "assets/refs" }}
            }}"#
        )
    }

    #[test]
    fn template_parses_with_defaults() {
        let template: TemplateConfig =
            serde_json::from_str(&minimal_template("scene_generation")).unwrap();
        assert_eq!(template.group_count, 3);
        assert_eq!(template.images_per_group.max(), 2);
        assert_eq!(template.output.max_concurrent_groups, 3);
        assert_eq!(template.product_images.specified_coverage, 100);
        assert!(validate_template(&template).is_empty());
    }

    #[test]
    fn transfer_mode_requires_references() {
        let raw = r#"{
            "name": "transfer-job",
            "mode": "subject_transfer",
            "group_count": 2,
            "images_per_group": 1,
            "product_images": { "source_dir": "assets/products" }
        }"#;
        let template: TemplateConfig = serde_json::from_str(raw).unwrap();
        let errors = validate_template(&template);
        assert!(errors.iter().any(|e| e.contains("reference_images")));
    }

    #[test]
    fn count_spec_accepts_fixed_and_range() {
        let fixed: CountSpec = serde_json::from_str("4").unwrap();
        assert_eq!(fixed.max(), 4);

        let range: CountSpec = serde_json::from_str("[2, 5]").unwrap();
        assert_eq!(range.max(), 5);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let n = range.sample(&mut rng);
            assert!((2..=5).contains(&n));
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut template: TemplateConfig =
            serde_json::from_str(&minimal_template("scene_generation")).unwrap();
        template.images_per_group = CountSpec::Range([5, 2]);
        let errors = validate_template(&template);
        assert!(errors.iter().any(|e| e.contains("inverted")));
    }
}
