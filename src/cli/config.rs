//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{OutputFormat, SegifyConfig, SegifyConfigBuilder},
    types::BlendWeight,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

/// Convert CLI arguments to a `SegifyConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Load the configuration file (`--config`, else `SEGIFY_CONFIG`) and
    /// apply the command-line overrides on top
    pub(crate) fn from_cli(cli: &Cli) -> Result<SegifyConfig> {
        let base = match &cli.config {
            Some(path) => SegifyConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SegifyConfig::from_env().context("Failed to load configuration")?,
        };
        let mut builder = SegifyConfigBuilder::from_config(base);

        if let Some(provider) = &cli.execution_provider {
            let (backend_type, execution_provider) =
                ExecutionProviderManager::parse_provider_string(provider)
                    .context("Invalid execution provider format")?;
            builder = builder
                .backend_type(backend_type)
                .execution_provider(execution_provider);
        }
        if cli.threads > 0 {
            builder = builder.intra_threads(cli.threads);
        }
        if let Some(dir) = &cli.models_dir {
            builder = builder.models_dir(dir);
        }
        if cli.no_preserve_color {
            builder = builder.preserve_color(false);
        }
        if let Some(format) = cli.output.as_deref().and_then(OutputFormat::from_path) {
            builder = builder.output_format(format);
        }

        builder
            .show_download_progress(!cli.no_progress)
            .build()
            .context("Invalid configuration")
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(provider) = &cli.execution_provider {
            ExecutionProviderManager::parse_provider_string(provider)
                .context("Invalid execution provider format")?;
        }

        BlendWeight::new(cli.alpha).context("Invalid --alpha")?;

        if cli.select == Some(0) {
            anyhow::bail!("--select counts segments from 1");
        }
        if let Some(select) = cli.select {
            if select > usize::from(cli.masks) {
                anyhow::bail!(
                    "--select {select} is larger than the number of segments requested ({})",
                    cli.masks
                );
            }
        }

        if let Some(output) = &cli.output {
            if output.extension().is_some() && OutputFormat::from_path(output).is_none() {
                anyhow::bail!(
                    "Unsupported output format for {} (expected .png, .jpg or .jpeg)",
                    output.display()
                );
            }
        }

        Ok(())
    }
}
