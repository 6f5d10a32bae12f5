//! Main entry point for the imageforge binary
//!
//! Wires the configured collaborator implementations into the orchestrator
//! and dispatches the requested run mode.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use imageforge::services::{
    ChatApiBackend, ChatTextGenerator, JobsApiBackend, StorageUploader,
};
use imageforge::{
    ConfigManager, GenerationBackend, GlobalConfig, ImageService, Orchestrator, RunResult,
    TextGenerator, Uploader,
};

/// Batch-generate creative assets from a template of prompts and input images
#[derive(Parser)]
#[command(name = "imageforge")]
#[command(about = "Orchestrates batch image and copy generation against remote backends")]
pub struct Args {
    /// Template config describing the batch (ignored with --resume)
    #[arg(long, required_unless_present = "resume")]
    pub template: Option<PathBuf>,

    /// Global config with credentials and service endpoints
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Validate configuration and resources without generating anything
    #[arg(long)]
    pub dry_run: bool,

    /// Resume a previous run from its output directory
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Skip the confirmation prompt on resource warnings
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn init_tracing(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn build_backend(global: &GlobalConfig) -> anyhow::Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match global.image_service {
        ImageService::Jobs => Arc::new(
            JobsApiBackend::new(&global.api_base_url, &global.api_key, &global.model)
                .context("failed to construct jobs backend")?,
        ),
        ImageService::Chat => Arc::new(
            ChatApiBackend::new(&global.api_base_url, &global.api_key, &global.model)
                .context("failed to construct chat backend")?,
        ),
    };
    Ok(backend)
}

fn build_text_generator(global: &GlobalConfig) -> anyhow::Result<Option<Arc<dyn TextGenerator>>> {
    match &global.text_api {
        None => Ok(None),
        Some(cfg) => {
            let generator = ChatTextGenerator::new(
                &cfg.base_url,
                &cfg.api_key,
                &cfg.model,
                cfg.temperature,
                cfg.max_retries,
            )
            .context("failed to construct text generator")?;
            Ok(Some(Arc::new(generator)))
        }
    }
}

fn print_summary(result: &RunResult) {
    println!();
    println!("run directory:     {}", result.run_dir.display());
    println!(
        "groups complete:   {}/{}",
        result.completed_groups, result.total_groups
    );
    println!(
        "images:            {} succeeded, {} failed, {} total",
        result.successful_images, result.failed_images, result.total_images
    );
    println!("elapsed:           {:.1}s", result.duration_seconds);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    let project_root = std::env::current_dir()?;
    let config = ConfigManager::new(project_root, args.config.clone());
    let global = config.load_global().context("global config rejected")?;

    let backend = build_backend(&global)?;
    let uploader: Arc<dyn Uploader> = Arc::new(
        StorageUploader::new(
            &global.storage.base_url,
            &global.storage.access_key,
            &global.storage.bucket,
            global.storage.expire_seconds,
        )
        .context("failed to construct storage uploader")?,
    );
    let text_generator = build_text_generator(&global)?;

    // The template path is only consulted for fresh runs; resume reads it
    // back from the persisted state.
    let template_path = args.template.clone().unwrap_or_default();
    let orchestrator = Orchestrator::new(config, template_path, backend, uploader, text_generator);

    let result = match &args.resume {
        Some(run_dir) => orchestrator.resume(run_dir, args.yes).await?,
        None => orchestrator.run(args.dry_run, args.yes).await?,
    };

    print_summary(&result);
    Ok(())
}
