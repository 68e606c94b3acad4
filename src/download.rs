//! Model provisioning: make sure weight files exist locally before inference
//!
//! A file already present in the target directory is trusted as-is. Missing
//! files are streamed over HTTP into a `.part` file which is renamed into place
//! only after the body has been fully written.

use crate::cache::{ModelCache, PARTIAL_SUFFIX};
use crate::config::SegifyConfig;
use crate::error::{Result, SegifyError};
use crate::models::ModelAsset;
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Chunk size used when streaming a download to disk
pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Result of a provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub message: String,
}

impl ProvisionOutcome {
    /// The file was already present; nothing was fetched
    #[must_use]
    pub fn already_exists() -> Self {
        Self {
            success: true,
            message: "already exists".to_string(),
        }
    }

    /// The file was fetched and stored
    #[must_use]
    pub fn downloaded() -> Self {
        Self {
            success: true,
            message: "downloaded".to_string(),
        }
    }

    /// The server answered with a non-success status
    #[must_use]
    pub fn rejected(status: reqwest::StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("");
        Self {
            success: false,
            message: format!("{} {}", status.as_u16(), reason).trim_end().to_string(),
        }
    }
}

/// Source of model files
///
/// Transport failures (DNS, refused connections, broken streams) are returned as
/// `Err`; a server refusing the request is `Ok` with `success == false`.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Ensure `local_dir/model_name` exists, fetching it from `source_url` if not
    async fn ensure(
        &self,
        model_name: &str,
        source_url: &str,
        local_dir: &Path,
    ) -> Result<ProvisionOutcome>;
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// HTTP model provisioner
#[derive(Debug, Clone)]
pub struct ModelProvisioner {
    client: Client,
    show_progress: bool,
}

impl ModelProvisioner {
    /// Create a new provisioner
    ///
    /// Requests carry no timeout: a slow download blocks until it finishes.
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(show_progress: bool) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SegifyError::network_error("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            show_progress,
        })
    }

    fn create_progress_indicator(&self) -> ProgressIndicator {
        if !self.show_progress {
            return ProgressIndicator::NoOp;
        }
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .map(|style| style.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `response` into `partial_path` in fixed-size chunks
    async fn stream_to_file(
        response: reqwest::Response,
        partial_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<u64> {
        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(partial_path)
            .await
            .map_err(|e| SegifyError::file_io_error("create file", partial_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; DOWNLOAD_CHUNK_SIZE];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| SegifyError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| SegifyError::file_io_error("write to file", partial_path, &e))?;

            downloaded += bytes_read as u64;
            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!(
                    "Downloaded {:.1} MB",
                    downloaded as f64 / 1_048_576.0
                ));
            }
        }

        file.flush()
            .await
            .map_err(|e| SegifyError::file_io_error("flush file", partial_path, &e))?;

        Ok(downloaded)
    }
}

#[async_trait]
impl ModelFetcher for ModelProvisioner {
    async fn ensure(
        &self,
        model_name: &str,
        source_url: &str,
        local_dir: &Path,
    ) -> Result<ProvisionOutcome> {
        let target = local_dir.join(model_name);
        if target.is_file() {
            log::debug!("Model already present: {}", target.display());
            return Ok(ProvisionOutcome::already_exists());
        }

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| SegifyError::file_io_error("create model directory", local_dir, &e))?;

        log::info!("📥 Downloading {} from {}", model_name, source_url);
        let response = self.client.get(source_url).send().await.map_err(|e| {
            SegifyError::network_error(format!("Failed to download {source_url}"), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Download of {} refused: {}", model_name, status);
            return Ok(ProvisionOutcome::rejected(status));
        }

        let partial_path = local_dir.join(format!("{model_name}{PARTIAL_SUFFIX}"));
        let progress = self.create_progress_indicator();
        progress.set_message(format!("Downloading {model_name}"));

        match Self::stream_to_file(response, &partial_path, &progress).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial_path, &target)
                    .await
                    .map_err(|e| SegifyError::file_io_error("move download into cache", &target, &e))?;
                progress.finish_with_message(format!("✅ Downloaded {model_name}"));
                log::info!("✅ Downloaded {} ({} bytes)", model_name, bytes);
                Ok(ProvisionOutcome::downloaded())
            },
            Err(e) => {
                if let Err(cleanup_err) = tokio::fs::remove_file(&partial_path).await {
                    log::warn!("Failed to remove partial download: {}", cleanup_err);
                }
                progress.finish_with_message("❌ Download failed".to_string());
                Err(e)
            },
        }
    }
}

/// Make sure every asset in `assets` is available in `cache`
///
/// Assets already on disk are used without consulting the fetcher's network
/// path. URLs come from [`SegifyConfig::model_url`], which falls back to the
/// built-in release location. An asset that is missing and has no URL, a refused
/// download, or a transport error all become [`SegifyError::Provisioning`].
///
/// # Errors
/// - Any asset cannot be provisioned
pub async fn ensure_assets<F: ModelFetcher + ?Sized>(
    fetcher: &F,
    assets: &[ModelAsset],
    config: &SegifyConfig,
    cache: &ModelCache,
) -> Result<()> {
    for &asset in assets {
        let file_name = asset.file_name();
        let Some(url) = config.model_url(asset.id()) else {
            if cache.is_cached(file_name) {
                log::debug!("Using cached {} (no download URL configured)", file_name);
                continue;
            }
            return Err(SegifyError::provisioning(
                file_name,
                format!(
                    "not present in {} and no download URL configured for '{}'",
                    cache.cache_dir().display(),
                    asset.id()
                ),
            ));
        };

        let outcome = fetcher
            .ensure(file_name, &url, cache.cache_dir())
            .await
            .map_err(|e| SegifyError::provisioning(file_name, e.to_string()))?;

        if !outcome.success {
            return Err(SegifyError::provisioning(file_name, outcome.message));
        }
        log::debug!("{}: {}", file_name, outcome.message);
    }
    Ok(())
}
