//! Segify command-line tool
//!
//! Walks one image through the workflow: upload, segment, pick a segment,
//! stylize it and save the composite. Answers not given as flags are asked
//! for on stdin.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    download::{ensure_assets, ModelProvisioner},
    models::ModelAsset,
    preview::{overlay_candidates, save_previews, DEFAULT_BLENDING_FACTOR},
    services::create_cli_progress_reporter,
    tracing_config::{init_cli_tracing, spans},
    types::{BlendWeight, MaskCount},
    utils::ExecutionProviderManager,
    workflow::{ImageInput, Session, Step, WorkflowController},
    OutputFormat, SegifyConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, Instrument};

/// Localized neural style transfer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "segify")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Image to stylize (PNG or JPEG)
    #[arg(value_name = "IMAGE", required_unless_present_any = &["show_providers", "only_download", "list_models", "clear_cache"])]
    pub image: Option<PathBuf>,

    /// Number of candidate segments to show (1-10)
    #[arg(short = 'n', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub masks: u8,

    /// Segment to stylize, as numbered in the previews (prompted if omitted)
    #[arg(short, long, value_name = "N")]
    pub select: Option<usize>,

    /// Style image (prompted if omitted)
    #[arg(long, value_name = "PATH")]
    pub style: Option<PathBuf>,

    /// Style blend weight, 0.0 (content only) to 1.0 (full style)
    #[arg(short, long, default_value_t = 1.0)]
    pub alpha: f32,

    /// Use the style image's own colours instead of the content's
    #[arg(long)]
    pub no_preserve_color: bool,

    /// Output file [default: <IMAGE>_styled.<format>]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Directory for segment previews [default: inside the workspace]
    #[arg(long, value_name = "DIR")]
    pub previews: Option<PathBuf>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Number of inference threads (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// JSON configuration file [default: $SEGIFY_CONFIG]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Model cache directory [default: $SEGIFY_MODELS_DIR or ./models]
    #[arg(long, value_name = "PATH")]
    pub models_dir: Option<PathBuf>,

    /// Keep the workspace directory after finishing
    #[arg(long)]
    pub keep_workspace: bool,

    /// Disable spinners and download progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Emit JSON log lines (requires the tracing-json feature)
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached model files and exit
    #[arg(long)]
    pub list_models: bool,

    /// Download all model files and exit
    #[arg(long)]
    pub only_download: bool,

    /// Remove all cached model files and exit
    #[arg(long)]
    pub clear_cache: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id =
        init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let span = spans::session(
        &session_id,
        &ExecutionProviderManager::provider_to_string(
            config.backend_type,
            config.execution_provider,
        ),
    );

    if cli.list_models {
        return list_cached_models(&config);
    }
    if cli.clear_cache {
        return clear_cache_models(&config);
    }
    if cli.only_download {
        return download_models_only(&config)
            .instrument(spans::model_loading("download"))
            .await;
    }

    run_workflow(&cli, config).instrument(span).await
}

/// Run the interactive pages for one image, then remove the workspace
async fn run_workflow(cli: &Cli, config: SegifyConfig) -> Result<()> {
    let image_path = cli
        .image
        .as_deref()
        .context("An input image is required")?;
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(image_path, config.output_format));

    let controller = WorkflowController::builder(config)
        .progress_reporter(create_cli_progress_reporter(!cli.no_progress, cli.verbose > 0))
        .build()
        .context("Failed to set up the workflow")?;

    let started = advanced(
        controller.begin(&Session::new()).context("Failed to create workspace")?,
        "start",
    )?;
    let outcome = run_pages(cli, &controller, &started, &output_path).await;

    if cli.keep_workspace {
        if let Some(workspace) = started.workspace() {
            info!("Workspace kept at {}", workspace.path().display());
        }
    } else if let Err(e) = controller.exit(&started) {
        warn!("Failed to remove workspace: {e}");
    }
    outcome
}

async fn run_pages(
    cli: &Cli,
    controller: &WorkflowController,
    session: &Session,
    output_path: &Path,
) -> Result<()> {
    let image_path = cli
        .image
        .as_deref()
        .context("An input image is required")?;
    let input = ImageInput::open(image_path)
        .with_context(|| format!("Failed to load {}", image_path.display()))?;
    let mask_count = MaskCount::new(cli.masks)?;

    let session = advanced(controller.upload(session, &input, mask_count)?, "upload")?;
    let session = advanced(
        controller
            .segment(&session)
            .await
            .context("Segmentation failed")?,
        "segment",
    )?;

    let candidates = session
        .candidates()
        .context("Segmentation produced no candidate set")?;
    if candidates.is_empty() {
        anyhow::bail!("No segments found in {}", image_path.display());
    }

    let preview_dir = match (&cli.previews, session.workspace()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(workspace)) => workspace.file_path("previews"),
        (None, None) => PathBuf::from("previews"),
    };
    let previews = overlay_candidates(input.image(), candidates, DEFAULT_BLENDING_FACTOR)?;
    let paths = save_previews(&previews, &preview_dir)?;
    println!("🧩 Found {} segment(s):", candidates.len());
    for ((preview, path), area) in previews.iter().zip(&paths).zip(candidates.areas()) {
        println!("  • {} ({} px): {}", preview.label, area, path.display());
    }

    let selection = match cli.select {
        Some(selection) => selection,
        None => prompt_selection(candidates.len())?,
    };
    let rank = selection
        .checked_sub(1)
        .context("Segments are numbered from 1")?;
    let session = advanced(controller.choose_mask(&session, rank)?, "select")?;

    let style_path = match &cli.style {
        Some(path) => path.clone(),
        None => PathBuf::from(prompt_line("Style image path: ")?),
    };
    let style = ImageInput::open(&style_path)
        .with_context(|| format!("Failed to load style image {}", style_path.display()))?;
    let weight = BlendWeight::new(cli.alpha)?;

    let session = advanced(
        controller
            .apply_style(&session, &style, weight)
            .await
            .context("Stylization failed")?,
        "style",
    )?;

    let saved = controller.export_result(&session, output_path)?;
    println!("✅ Saved {}", saved.display());
    Ok(())
}

/// Unwrap an advanced step; a redirect means the workflow is out of order
fn advanced(step: Step, action: &str) -> Result<Session> {
    match step {
        Step::Advanced(session) => Ok(session),
        Step::Redirected { page, .. } => {
            anyhow::bail!("Cannot {action} yet: redirected to the {page} page")
        },
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    if read == 0 {
        anyhow::bail!("No answer received on stdin");
    }
    Ok(line.trim().to_string())
}

fn prompt_selection(available: usize) -> Result<usize> {
    loop {
        let answer = prompt_line(&format!("Select a segment [1-{available}]: "))?;
        match parse_selection(&answer, available) {
            Some(selection) => return Ok(selection),
            None => println!("Please enter a number between 1 and {available}"),
        }
    }
}

/// One-based segment number, if `answer` names one of `available`
fn parse_selection(answer: &str, available: usize) -> Option<usize> {
    let answer = answer.trim();
    let number = answer
        .strip_prefix("Segment ")
        .unwrap_or(answer)
        .trim()
        .parse::<usize>()
        .ok()?;
    (1..=available).contains(&number).then_some(number)
}

fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}_styled.{}", format.extension()))
}

/// Display execution provider diagnostics
fn show_provider_diagnostics() {
    println!("🔍 Backend and Execution Provider Diagnostics");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Execution Providers:");
    for provider_info in ExecutionProviderManager::list_all_providers() {
        let status = if provider_info.available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!(
            "  • {}: {} - {}",
            provider_info.name, status, provider_info.description
        );
    }

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
}

fn list_cached_models(config: &SegifyConfig) -> Result<()> {
    let cache = ModelCache::new(config).context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached models in {}", cache.cache_dir().display());
    for asset in ModelAsset::ALL {
        match models.iter().find(|m| m.file_name == asset.file_name()) {
            Some(model) => println!(
                "  ✅ {} ({}, {})",
                asset.file_name(),
                asset.description(),
                format_size(model.size_bytes)
            ),
            None => println!("  ❌ {} ({})", asset.file_name(), asset.description()),
        }
    }
    Ok(())
}

fn clear_cache_models(config: &SegifyConfig) -> Result<()> {
    let cache = ModelCache::new(config).context("Failed to initialize model cache")?;
    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("💡 Cache was already empty");
    } else {
        println!("🗑️  Removed {} file(s):", removed.len());
        for name in &removed {
            println!("   • {name}");
        }
    }
    Ok(())
}

async fn download_models_only(config: &SegifyConfig) -> Result<()> {
    let cache = ModelCache::new(config).context("Failed to initialize model cache")?;
    let provisioner = ModelProvisioner::new(config.show_download_progress)
        .context("Failed to create model downloader")?;

    ensure_assets(&provisioner, &ModelAsset::ALL, config, &cache)
        .await
        .context("Model download failed")?;
    debug!(dir = %cache.cache_dir().display(), "all model files present");
    println!("✅ All models available in {}", cache.cache_dir().display());
    Ok(())
}
