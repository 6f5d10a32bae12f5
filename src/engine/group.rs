//! Expansion of one group into its image tasks and concurrent execution

use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::TemplateConfig;
use crate::core::allocation::GroupAssignment;
use crate::core::{selection, template, AssetUploadCache, StateManager};
use crate::engine::task::TaskExecutor;
use crate::error::GeneratorResult;
use crate::models::{
    GenerationMode, GroupResult, ImageResult, ProductInfo, TaskSpec, TemplateContext, TextResult,
};
use crate::services::output::OutputManager;
use crate::traits::TextGenerator;

/// Everything one group needs beyond the coordinator's shared collaborators.
pub struct GroupContext {
    pub group_index: usize,
    pub assignment: GroupAssignment,
    pub product_pool: Arc<Vec<PathBuf>>,
    pub specified_products: Arc<Vec<PathBuf>>,
}

/// Runs one group: draws its products, uploads and refreshes their remote
/// copies, executes all image tasks concurrently, optionally generates the
/// group's copy, and persists the completed result before returning.
pub struct GroupCoordinator {
    template: Arc<TemplateConfig>,
    executor: Arc<TaskExecutor>,
    upload_cache: Arc<AssetUploadCache>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    output: Arc<OutputManager>,
    state: Arc<StateManager>,
    run_dir: PathBuf,
}

impl GroupCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        template: Arc<TemplateConfig>,
        executor: Arc<TaskExecutor>,
        upload_cache: Arc<AssetUploadCache>,
        text_generator: Option<Arc<dyn TextGenerator>>,
        output: Arc<OutputManager>,
        state: Arc<StateManager>,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            template,
            executor,
            upload_cache,
            text_generator,
            output,
            state,
            run_dir,
        }
    }

    pub async fn run_group(&self, ctx: GroupContext) -> GeneratorResult<GroupResult> {
        let group_num = ctx.group_index + 1;
        let log_prefix = format!("[group {}]", group_num);
        tracing::info!(
            "{} 📦 starting ({} groups total)",
            log_prefix,
            self.template.group_count
        );
        self.state.mark_group_started(ctx.group_index).await?;

        let images_target = self
            .template
            .images_per_group
            .sample(&mut rand::thread_rng());
        let specified: &[PathBuf] = if ctx.assignment.use_specified_products {
            &ctx.specified_products
        } else {
            &[]
        };
        let products = selection::draw_products(
            &ctx.product_pool,
            specified,
            images_target,
            &mut rand::thread_rng(),
        );
        if products.len() < images_target {
            tracing::warn!(
                "{} ⚠️ only {} of {} requested images have available products",
                log_prefix,
                products.len(),
                images_target
            );
        }

        let group_dir = self.output.create_group_dir(&self.run_dir, group_num)?;
        let prompt_template = self.load_prompt_template(&ctx.assignment)?;
        tracing::info!("{} 📋 generating {} images", log_prefix, products.len());

        let specs = self.build_task_specs(&ctx, &products, &prompt_template, &group_dir).await;
        let prompt_rendered = specs
            .iter()
            .find_map(|s| match s {
                TaskOutcome::Ready { spec, .. } => Some(spec.prompt.clone()),
                TaskOutcome::PreFailed(_) => None,
            })
            .unwrap_or_default();

        let mut images = self.execute_specs(specs, &log_prefix).await;
        images.sort_by_key(|result| result.index);

        let text = self.generate_copy(&log_prefix, &group_dir).await;

        let result = GroupResult {
            group_index: ctx.group_index,
            group_dir,
            product_images: products,
            reference_image: ctx.assignment.reference.clone(),
            prompt_template: ctx
                .assignment
                .prompt
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            prompt_rendered,
            images,
            text,
            completed_at: chrono::Utc::now(),
        };

        self.output.save_group_result(&result)?;
        self.state
            .mark_group_complete(ctx.group_index, &result)
            .await?;

        tracing::info!(
            "{} 📊 finished: {}/{} images succeeded",
            log_prefix,
            result.successful_images(),
            result.images.len()
        );
        Ok(result)
    }

    fn load_prompt_template(&self, assignment: &GroupAssignment) -> GeneratorResult<String> {
        if let Some(path) = &assignment.prompt {
            return template::load_template(path);
        }
        Ok(self
            .template
            .prompts
            .custom_template
            .clone()
            .unwrap_or_default())
    }

    /// Build one spec per drawn product, uploading and refreshing the task's
    /// input assets. An upload failure fails only the task that needed the
    /// asset; the rest of the group proceeds.
    async fn build_task_specs(
        &self,
        ctx: &GroupContext,
        products: &[PathBuf],
        prompt_template: &str,
        group_dir: &std::path::Path,
    ) -> Vec<TaskOutcome> {
        let mut specs = Vec::with_capacity(products.len());
        for (image_index, product) in products.iter().enumerate() {
            let image_num = image_index + 1;
            let mut inputs = vec![product.clone()];
            if self.template.mode == GenerationMode::SubjectTransfer {
                if let Some(reference) = &ctx.assignment.reference {
                    inputs.push(reference.clone());
                }
            }

            let urls = match self.upload_inputs(&inputs).await {
                Ok(urls) => urls,
                Err(error) => {
                    specs.push(TaskOutcome::PreFailed(ImageResult {
                        index: image_index,
                        output_path: self.output.image_path(
                            group_dir,
                            image_num,
                            &self.template.output.format,
                        ),
                        task_id: String::new(),
                        prompt: String::new(),
                        input_images: Vec::new(),
                        success: false,
                        error: Some(format!("asset upload failed: {}", error)),
                    }));
                    continue;
                }
            };

            let context = TemplateContext {
                group_index: ctx.group_index,
                group_num: ctx.group_index + 1,
                image_index,
                image_num,
                total_groups: self.template.group_count,
                mode: self.template.mode,
                custom_vars: self.template.template_variables.clone(),
            };
            let prompt = template::render(prompt_template, &context);

            specs.push(TaskOutcome::Ready {
                index: image_index,
                spec: TaskSpec {
                    prompt,
                    input_urls: urls,
                    output_path: self.output.image_path(
                        group_dir,
                        image_num,
                        &self.template.output.format,
                    ),
                    aspect_ratio: self.template.output.aspect_ratio.clone(),
                    resolution: self.template.output.resolution.clone(),
                    output_format: self.template.output.format.clone(),
                },
            });
        }
        specs
    }

    /// Upload (memoized) then refresh the URLs right before use — the gap
    /// between upload and use can outlive a presigned URL.
    async fn upload_inputs(
        &self,
        inputs: &[PathBuf],
    ) -> Result<Vec<String>, crate::error::UploadError> {
        let uploaded = self.upload_cache.upload_all(inputs).await?;
        let refreshed = self.upload_cache.refresh(inputs).await?;
        if refreshed.len() == uploaded.len() {
            Ok(refreshed)
        } else {
            Ok(uploaded)
        }
    }

    async fn execute_specs(&self, specs: Vec<TaskOutcome>, log_prefix: &str) -> Vec<ImageResult> {
        let total = specs.len();
        let mut results = Vec::with_capacity(total);
        let mut pending = Vec::new();
        for outcome in specs {
            match outcome {
                TaskOutcome::PreFailed(result) => results.push(result),
                TaskOutcome::Ready { index, spec } => pending.push((index, spec)),
            }
        }

        let executions = pending.into_iter().map(|(index, spec)| {
            let task_prefix = format!("{}[{}/{}]", log_prefix, index + 1, total);
            let executor = Arc::clone(&self.executor);
            async move { executor.execute(index, spec, &task_prefix).await }
        });
        results.extend(join_all(executions).await);
        results
    }

    async fn generate_copy(
        &self,
        log_prefix: &str,
        group_dir: &std::path::Path,
    ) -> Option<TextResult> {
        let text_cfg = self.template.text_generation.as_ref().filter(|t| t.enabled)?;
        let generator = self.text_generator.as_ref()?;

        tracing::info!("{} 📝 generating copy...", log_prefix);
        let product_info = self.product_info();
        let result = match generator.generate(&product_info).await {
            Ok(mut text) => {
                text.content = template::strip_trailing_tags(&text.content);
                tracing::info!("{} 📝 copy ready: {}", log_prefix, text.title);
                if let Err(e) = self.output.save_text(group_dir, &text, &text_cfg.tags) {
                    tracing::warn!("{} ⚠️ failed to write copy file: {}", log_prefix, e);
                }
                text
            }
            Err(error) => {
                tracing::error!("{} 📝 copy generation failed: {}", log_prefix, error);
                TextResult::failed(error.to_string())
            }
        };
        Some(result)
    }

    fn product_info(&self) -> ProductInfo {
        let vars = &self.template.template_variables;
        let get = |key: &str| {
            vars.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        ProductInfo {
            product_name: vars
                .get("product_name")
                .and_then(|v| v.as_str())
                .unwrap_or(self.template.name.as_str())
                .to_string(),
            brand: get("brand"),
            style: get("style"),
            features: get("features"),
            target_audience: get("target_audience"),
        }
    }
}

enum TaskOutcome {
    Ready { index: usize, spec: TaskSpec },
    PreFailed(ImageResult),
}
