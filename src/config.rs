//! Configuration types for segmentation and style transfer sessions

use crate::error::{Result, SegifyError};
use crate::models::{ModelAsset, DEFAULT_MODEL_BASE_URL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV_VAR: &str = "SEGIFY_CONFIG";

/// Default parent of the per-session scratch directories
pub const DEFAULT_WORKSPACE_NAME: &str = "temp_images";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Backend type enumeration for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Output image format for the composited result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel
    #[default]
    Png,
    /// JPEG (alpha dropped)
    Jpeg,
}

impl OutputFormat {
    /// Infer the format from a file extension, if recognised
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Automatic mask generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Points sampled along each side of the prompt grid
    pub points_per_side: u32,
    /// Minimum predicted mask quality to keep a mask
    pub pred_iou_threshold: f32,
    /// Minimum stability score to keep a mask
    pub stability_score_threshold: f32,
    /// Logit offset used when computing the stability score
    pub stability_score_offset: f32,
    /// Bounding-box IoU above which the lower-quality mask is dropped
    pub box_nms_threshold: f32,
    /// Seconds a generated mask set stays cached (0 disables reuse)
    pub cache_ttl_secs: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            points_per_side: 32,
            pred_iou_threshold: 0.88,
            stability_score_threshold: 0.95,
            stability_score_offset: 1.0,
            box_nms_threshold: 0.7,
            cache_ttl_secs: 600,
        }
    }
}

/// Style transfer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Transfer the content image's colours onto the style image first
    pub preserve_color: bool,
    /// Shorter side of the content image fed to the encoder (0 keeps size)
    pub content_size: u32,
    /// Shorter side of the style image fed to the encoder (0 keeps size)
    pub style_size: u32,
    /// Center-crop resized images to a square
    pub crop: bool,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            preserve_color: true,
            content_size: 0,
            style_size: 0,
            crop: false,
        }
    }
}

/// Top-level configuration shared by the library and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegifyConfig {
    /// Inference backend
    pub backend_type: BackendType,

    /// Execution provider for the backend
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Model cache directory (None = `SEGIFY_MODELS_DIR` or `./models`)
    pub models_dir: Option<PathBuf>,

    /// Download URLs keyed by model asset id; these win over `model_base_url`
    pub model_urls: BTreeMap<String, String>,

    /// Directory URL the assets are fetched from when no per-asset URL is
    /// set; empty means cached files only
    pub model_base_url: String,

    /// Show a progress bar while downloading models
    pub show_download_progress: bool,

    /// Directory under the working directory holding one scratch directory per session
    pub workspace_name: String,

    /// Output format for the composited result
    pub output_format: OutputFormat,

    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,

    pub segmentation: SegmentationConfig,

    pub style: StyleConfig,
}

impl Default for SegifyConfig {
    fn default() -> Self {
        Self {
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            models_dir: None,
            model_urls: BTreeMap::new(),
            model_base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            show_download_progress: false,
            workspace_name: DEFAULT_WORKSPACE_NAME.to_string(),
            output_format: OutputFormat::default(),
            jpeg_quality: 90,
            segmentation: SegmentationConfig::default(),
            style: StyleConfig::default(),
        }
    }
}

impl SegifyConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use segify::{SegifyConfig, BackendType};
    ///
    /// let config = SegifyConfig::builder()
    ///     .backend_type(BackendType::Tract)
    ///     .preserve_color(false)
    ///     .build()
    ///     .unwrap();
    /// assert!(!config.style.preserve_color);
    /// ```
    #[must_use]
    pub fn builder() -> SegifyConfigBuilder {
        SegifyConfigBuilder::default()
    }

    /// Load a JSON configuration file
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    /// - Values fail validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SegifyError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SegifyError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `SEGIFY_CONFIG`, or defaults when unset
    ///
    /// # Errors
    /// - The named file cannot be loaded (see [`Self::from_json_file`])
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_json_file(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Download URL for a model asset: its `model_urls` entry, else the file
    /// under `model_base_url`
    #[must_use]
    pub fn model_url(&self, asset_id: &str) -> Option<String> {
        if let Some(url) = self.model_urls.get(asset_id) {
            return Some(url.clone());
        }
        if self.model_base_url.is_empty() {
            return None;
        }
        ModelAsset::from_name(asset_id).map(|asset| asset.url_under(&self.model_base_url))
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - JPEG quality above 100
    /// - Empty or nested workspace name
    /// - Prompt grid outside 1-64 points per side
    /// - Thresholds outside 0.0-1.0
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality > 100 {
            return Err(SegifyError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
                Some(90),
            ));
        }

        let mut components = Path::new(&self.workspace_name).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !single_component {
            return Err(SegifyError::invalid_config(format!(
                "Workspace name '{}' must be a single directory name",
                self.workspace_name
            )));
        }

        let seg = &self.segmentation;
        if !(1..=64).contains(&seg.points_per_side) {
            return Err(SegifyError::config_value_error(
                "points per side",
                seg.points_per_side,
                "1-64",
                Some(32),
            ));
        }
        for (name, value) in [
            ("predicted IoU threshold", seg.pred_iou_threshold),
            ("stability score threshold", seg.stability_score_threshold),
            ("box NMS threshold", seg.box_nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SegifyError::config_value_error(
                    name, value, "0.0-1.0", None,
                ));
            }
        }

        let base_is_http =
            self.model_base_url.starts_with("http://") || self.model_base_url.starts_with("https://");
        if !self.model_base_url.is_empty() && !base_is_http {
            return Err(SegifyError::invalid_config(format!(
                "Model base URL must be http(s): {}",
                self.model_base_url
            )));
        }

        for (asset_id, url) in &self.model_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SegifyError::invalid_config(format!(
                    "Model URL for '{asset_id}' must be http(s): {url}"
                )));
            }
        }

        Ok(())
    }
}

/// Builder for `SegifyConfig`
#[derive(Debug, Default)]
pub struct SegifyConfigBuilder {
    config: SegifyConfig,
}

impl SegifyConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from a file)
    #[must_use]
    pub fn from_config(config: SegifyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set the model cache directory
    #[must_use]
    pub fn models_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.models_dir = Some(dir.into());
        self
    }

    /// Register a download URL for a model asset
    #[must_use]
    pub fn model_url<S: Into<String>, U: Into<String>>(mut self, asset_id: S, url: U) -> Self {
        self.config.model_urls.insert(asset_id.into(), url.into());
        self
    }

    /// Fetch assets from `url/<file name>`; an empty string disables downloads
    #[must_use]
    pub fn model_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.model_base_url = url.into();
        self
    }

    #[must_use]
    pub fn show_download_progress(mut self, show: bool) -> Self {
        self.config.show_download_progress = show;
        self
    }

    #[must_use]
    pub fn workspace_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.workspace_name = name.into();
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality (clamped to 100)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn points_per_side(mut self, points: u32) -> Self {
        self.config.segmentation.points_per_side = points;
        self
    }

    /// Set how long generated mask sets are reused
    #[must_use]
    pub fn mask_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.segmentation.cache_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn preserve_color(mut self, preserve: bool) -> Self {
        self.config.style.preserve_color = preserve;
        self
    }

    #[must_use]
    pub fn content_size(mut self, size: u32) -> Self {
        self.config.style.content_size = size;
        self
    }

    #[must_use]
    pub fn style_size(mut self, size: u32) -> Self {
        self.config.style.style_size = size;
        self
    }

    #[must_use]
    pub fn crop(mut self, crop: bool) -> Self {
        self.config.style.crop = crop;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any check in [`SegifyConfig::validate`] fails
    pub fn build(self) -> Result<SegifyConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
