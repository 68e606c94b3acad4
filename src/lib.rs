#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Segify
//!
//! Localized neural style transfer. An image is split into candidate object
//! segments with Segment Anything, the user picks one, and only that segment
//! is restyled after a reference image with AdaIN style transfer. The
//! stylized pixels are composited back over the original through the mask.
//!
//! ## Features
//!
//! - **Automatic segmentation**: SAM ViT-B encoder/decoder, prompt grid, quality
//!   and stability filtering, box NMS, ranking by area
//! - **Style transfer**: AdaIN with a content/style blend weight and optional
//!   colour preservation (CORAL)
//! - **Mask compositing**: stylized pixels inside the segment, original outside
//! - **Model provisioning**: streamed downloads into a local model cache
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **CLI Integration**: `segify` binary (enable with the `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segify::workflow::{ImageInput, Session, WorkflowController};
//! use segify::{BlendWeight, MaskCount, SegifyConfig};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SegifyConfig::from_env()?;
//! let controller = WorkflowController::builder(config).build()?;
//!
//! let session = controller.begin(&Session::new())?.into_session();
//! let photo = ImageInput::open("photo.jpg")?;
//! let session = controller
//!     .upload(&session, &photo, MaskCount::new(3)?)?
//!     .into_session();
//! let session = controller.segment(&session).await?.into_session();
//! let session = controller.choose_mask(&session, 0)?.into_session();
//!
//! let style = ImageInput::open("starry_night.jpg")?;
//! let session = controller
//!     .apply_style(&session, &style, BlendWeight::FULL)
//!     .await?
//!     .into_session();
//! controller.export_result(&session, Path::new("result.png"))?;
//! controller.exit(&session)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and progress reporting
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! segify = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod preview;
pub mod segmentation;
pub mod services;
pub mod stylization;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;
pub mod workflow;
pub mod workspace;

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compositor::combine;
pub use config::{
    BackendType, ExecutionProvider, OutputFormat, SegifyConfig, SegifyConfigBuilder,
    SegmentationConfig, StyleConfig,
};
pub use download::{ensure_assets, ModelFetcher, ModelProvisioner, ProvisionOutcome};
pub use error::{Result, SegifyError};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend};
pub use models::ModelAsset;
pub use preview::{overlay_candidates, overlay_mask, SegmentPreview};
pub use segmentation::{MaskCache, SamMaskGenerator, SegmentationAdapter, Segmenter};
pub use services::{ImageIOService, ProgressReporter, ProgressTracker};
pub use stylization::{AdainStylizer, Stylizer};
pub use types::{BlendWeight, CandidateMasks, Mask, MaskCount};
pub use utils::{ExecutionProviderManager, ProviderInfo};
pub use workflow::{ImageInput, Page, Session, Stage, Step, WorkflowController};
pub use workspace::TempWorkspace;

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
