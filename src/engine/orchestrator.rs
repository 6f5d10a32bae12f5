//! Top-level run coordination: fan-out over groups, aggregation, resume

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{ConfigManager, GlobalConfig, TemplateConfig};
use crate::core::{
    selection, AllocationPlan, AllocationPlanner, AssetUploadCache, RateLimiter, RetryPolicy,
    StateManager,
};
use crate::engine::group::{GroupContext, GroupCoordinator};
use crate::engine::task::TaskExecutor;
use crate::error::{GeneratorError, GeneratorResult};
use crate::models::{GenerationLog, GenerationMode, GroupResult, RunResult};
use crate::services::output::OutputManager;
use crate::traits::{GenerationBackend, TextGenerator, Uploader};

/// Asset pools scanned once per run.
struct ResourcePools {
    products: Vec<PathBuf>,
    references: Vec<PathBuf>,
    prompts: Vec<PathBuf>,
}

/// Owns the collaborators and drives a full batch run.
///
/// All mutable shared state lives in the upload cache and the run ledger; the
/// orchestrator itself only aggregates results after groups join, so it is
/// the sole writer of the run-level counters.
pub struct Orchestrator {
    config: ConfigManager,
    template_path: PathBuf,
    backend: Arc<dyn GenerationBackend>,
    uploader: Arc<dyn Uploader>,
    text_generator: Option<Arc<dyn TextGenerator>>,
}

impl Orchestrator {
    pub fn new(
        config: ConfigManager,
        template_path: PathBuf,
        backend: Arc<dyn GenerationBackend>,
        uploader: Arc<dyn Uploader>,
        text_generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            config,
            template_path,
            backend,
            uploader,
            text_generator,
        }
    }

    /// Execute a fresh run.
    pub async fn run(&self, dry_run: bool, auto_confirm: bool) -> GeneratorResult<RunResult> {
        let started = Instant::now();
        let global = self.config.load_global()?;
        let template = self.config.load_template(&self.template_path)?;
        tracing::info!(
            "starting run: {} (mode={}, groups={})",
            template.name,
            template.mode,
            template.group_count
        );

        let pools = self.scan_pools(&template)?;
        if !self.check_resources(&template, &pools, auto_confirm)? {
            tracing::info!("run cancelled by operator");
            return Ok(RunResult::empty(
                PathBuf::from("."),
                template.group_count,
                started.elapsed().as_secs_f64(),
            ));
        }

        if dry_run {
            tracing::info!("dry run: configuration validated");
            return Ok(RunResult::empty(
                PathBuf::from("."),
                template.group_count,
                started.elapsed().as_secs_f64(),
            ));
        }

        let specified_products = self.validate_specified_products(&template, &pools)?;

        let output = OutputManager::new(self.config.resolve_path(&template.output.base_dir));
        let run_dir = output.create_run_directory()?;

        let plan = AllocationPlanner::plan(
            &template,
            &pools.prompts,
            &pools.references,
            &mut rand::thread_rng(),
        )?;

        let state = StateManager::new(&run_dir);
        state
            .initialize(self.template_path.display().to_string(), plan.clone())
            .await?;

        self.dispatch(
            global,
            template,
            pools,
            specified_products,
            plan,
            state,
            output,
            run_dir,
            started,
        )
        .await
    }

    /// Resume a previous run from its directory.
    ///
    /// The persisted allocation plan is authoritative — it is never
    /// recomputed, so the resumed run replays the original assignments and
    /// only the not-yet-completed groups execute. The upload cache is rebuilt
    /// fresh: assets re-upload, groups do not re-generate.
    pub async fn resume(&self, run_dir: &Path, auto_confirm: bool) -> GeneratorResult<RunResult> {
        let started = Instant::now();
        tracing::info!("resuming run from {}", run_dir.display());

        let state = StateManager::new(run_dir);
        let loaded = state.load().await?.ok_or_else(|| {
            GeneratorError::config(format!("no run state found in {}", run_dir.display()))
        })?;

        let global = self.config.load_global()?;
        let template_path = PathBuf::from(&loaded.template_path);
        let template = self.config.load_template(&template_path)?;

        let pools = self.scan_pools(&template)?;
        if !self.check_resources(&template, &pools, auto_confirm)? {
            tracing::info!("resume cancelled by operator");
            return Ok(RunResult::empty(
                run_dir.to_path_buf(),
                template.group_count,
                started.elapsed().as_secs_f64(),
            ));
        }
        let specified_products = self.validate_specified_products(&template, &pools)?;

        let output = OutputManager::new(self.config.resolve_path(&template.output.base_dir));
        self.dispatch(
            global,
            template,
            pools,
            specified_products,
            loaded.plan,
            state,
            output,
            run_dir.to_path_buf(),
            started,
        )
        .await
    }

    fn scan_pools(&self, template: &TemplateConfig) -> GeneratorResult<ResourcePools> {
        let product_dir = self.config.resolve_path(&template.product_images.source_dir);
        if !product_dir.is_dir() {
            return Err(GeneratorError::config(format!(
                "product image directory not found: {}",
                product_dir.display()
            )));
        }
        let products = selection::list_images(&product_dir);
        tracing::info!("found {} product images", products.len());

        let references = match &template.reference_images {
            Some(cfg) => {
                let dir = self.config.resolve_path(&cfg.source_dir);
                let references = selection::list_images(&dir);
                tracing::info!("found {} reference images", references.len());
                references
            }
            None => Vec::new(),
        };

        let prompts = match &template.prompts.source_dir {
            Some(dir) => {
                let prompts = selection::list_prompts(&self.config.resolve_path(dir));
                tracing::info!("found {} prompt files", prompts.len());
                prompts
            }
            None => Vec::new(),
        };

        Ok(ResourcePools {
            products,
            references,
            prompts,
        })
    }

    /// Surface insufficient-resource warnings and, unless auto-confirmed,
    /// block for operator confirmation. Returns false when the operator
    /// cancels. Non-interactive stdin (EOF) continues with a warning.
    fn check_resources(
        &self,
        template: &TemplateConfig,
        pools: &ResourcePools,
        auto_confirm: bool,
    ) -> GeneratorResult<bool> {
        let mut warnings = Vec::new();
        let max_per_group = template.images_per_group.max();

        if !pools.prompts.is_empty() && pools.prompts.len() < template.group_count {
            warnings.push(format!(
                "prompt pool smaller than group count: {} prompts for {} groups, extra groups reuse prompts",
                pools.prompts.len(),
                template.group_count
            ));
        }
        if pools.products.len() < max_per_group {
            warnings.push(format!(
                "not enough product images: up to {} needed per group, {} available",
                max_per_group,
                pools.products.len()
            ));
        }
        if template.mode == GenerationMode::SubjectTransfer && pools.references.is_empty() {
            warnings.push("no reference images available for subject_transfer mode".to_string());
        }

        if warnings.is_empty() {
            return Ok(true);
        }
        for warning in &warnings {
            tracing::warn!("⚠️ {}", warning);
        }
        if auto_confirm {
            return Ok(true);
        }

        println!("\nContinue anyway? (y/N): ");
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(0) => {
                tracing::warn!("non-interactive session, continuing despite warnings");
                Ok(true)
            }
            Ok(_) => Ok(answer.trim().eq_ignore_ascii_case("y")),
            Err(_) => {
                tracing::warn!("could not read confirmation, continuing despite warnings");
                Ok(true)
            }
        }
    }

    fn validate_specified_products(
        &self,
        template: &TemplateConfig,
        pools: &ResourcePools,
    ) -> GeneratorResult<Vec<PathBuf>> {
        let specified = &template.product_images.specified_images;
        if specified.is_empty() {
            return Ok(Vec::new());
        }
        let resolved =
            selection::validate_specified(specified, &pools.products).map_err(|errors| {
                GeneratorError::config(format!(
                    "specified product images: {}",
                    errors.join("; ")
                ))
            })?;
        tracing::info!("📋 {} product images pinned by the template", resolved.len());
        Ok(resolved)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        global: GlobalConfig,
        template: TemplateConfig,
        pools: ResourcePools,
        specified_products: Vec<PathBuf>,
        plan: AllocationPlan,
        state: StateManager,
        output: OutputManager,
        run_dir: PathBuf,
        started: Instant,
    ) -> GeneratorResult<RunResult> {
        if plan.groups.len() != template.group_count {
            return Err(GeneratorError::config(format!(
                "allocation plan covers {} groups but the template declares {}",
                plan.groups.len(),
                template.group_count
            )));
        }

        let template = Arc::new(template);
        let state = Arc::new(state);
        let output = Arc::new(output);

        let limits = &global.limits;
        let rate_limiter = global.rate_limited().then(|| {
            Arc::new(RateLimiter::new(
                limits.rate_limit_requests,
                Duration::from_secs_f64(limits.rate_limit_window),
            ))
        });
        let retry = RetryPolicy::new(
            limits.max_retries,
            Duration::from_millis(limits.retry_base_ms),
            Duration::from_millis(limits.retry_cap_ms),
        );
        let permits = Arc::new(Semaphore::new(limits.max_in_flight));
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.backend),
            rate_limiter,
            retry,
            permits,
            Duration::from_secs_f64(global.poll_interval),
            Duration::from_secs_f64(global.max_wait),
        ));
        let upload_cache = Arc::new(AssetUploadCache::new(
            Arc::clone(&self.uploader),
            format!("/imageforge/{}/", template.name),
        ));
        let coordinator = Arc::new(GroupCoordinator::new(
            Arc::clone(&template),
            executor,
            upload_cache,
            self.text_generator.clone(),
            Arc::clone(&output),
            Arc::clone(&state),
            run_dir.clone(),
        ));

        let mut pending = Vec::new();
        for group_index in 0..template.group_count {
            if state.is_group_complete(group_index).await {
                tracing::info!("⏭️ skipping completed group {}", group_index + 1);
                continue;
            }
            pending.push(group_index);
        }
        if pending.is_empty() {
            tracing::info!("all groups already complete");
            return Ok(RunResult {
                run_dir,
                total_groups: template.group_count,
                completed_groups: template.group_count,
                total_images: 0,
                successful_images: 0,
                failed_images: 0,
                duration_seconds: started.elapsed().as_secs_f64(),
            });
        }
        tracing::info!(
            "📋 {} groups pending, up to {} concurrent",
            pending.len(),
            template.output.max_concurrent_groups
        );

        let group_permits = Arc::new(Semaphore::new(template.output.max_concurrent_groups));
        let product_pool = Arc::new(pools.products);
        let specified_products = Arc::new(specified_products);

        let mut join_set = JoinSet::new();
        for group_index in pending {
            let ctx = GroupContext {
                group_index,
                assignment: plan.groups[group_index].clone(),
                product_pool: Arc::clone(&product_pool),
                specified_products: Arc::clone(&specified_products),
            };
            let coordinator = Arc::clone(&coordinator);
            let group_permits = Arc::clone(&group_permits);
            join_set.spawn(async move {
                let _permit = group_permits.acquire_owned().await.ok();
                (group_index, coordinator.run_group(ctx).await)
            });
        }

        let mut group_results: Vec<GroupResult> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(result))) => group_results.push(result),
                Ok((group_index, Err(error))) => {
                    tracing::error!("[group {}] ❌ group failed: {}", group_index + 1, error);
                }
                Err(join_error) => {
                    tracing::error!("❌ group task aborted: {}", join_error);
                }
            }
        }
        group_results.sort_by_key(|result| result.group_index);

        let total_images: usize = group_results.iter().map(|g| g.images.len()).sum();
        let successful_images: usize = group_results.iter().map(|g| g.successful_images()).sum();
        let result = RunResult {
            run_dir: run_dir.clone(),
            total_groups: template.group_count,
            completed_groups: state.completed_count().await,
            total_images,
            successful_images,
            failed_images: total_images - successful_images,
            duration_seconds: started.elapsed().as_secs_f64(),
        };

        let log = GenerationLog {
            template_name: template.name.clone(),
            mode: template.mode,
            started_at: state
                .snapshot()
                .await
                .map(|s| s.started_at)
                .unwrap_or_else(chrono::Utc::now),
            completed_at: Some(chrono::Utc::now()),
            groups: group_results
                .iter()
                .filter_map(|g| serde_json::to_value(g).ok())
                .collect(),
            summary: serde_json::to_value(&result).ok(),
        };
        output.save_generation_log(&run_dir, &log)?;

        tracing::info!(
            "🎉 run finished: {}/{} images succeeded in {:.1}s",
            successful_images,
            total_images,
            result.duration_seconds
        );
        Ok(result)
    }
}
