//! Tract backend
//!
//! Pure Rust inference with no native dependencies. Only the CPU provider is
//! supported; graphs with symbolic input dimensions are resolved by Tract at
//! run time.

use crate::cache::ModelCache;
use crate::config::SegifyConfig;
use crate::error::{Result, SegifyError};
use crate::inference::InferenceBackend;
use crate::models::ModelAsset;
use ndarray::ArrayD;
use tract_onnx::prelude::*;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for one model asset
#[derive(Debug)]
pub struct TractBackend {
    asset: ModelAsset,
    cache: ModelCache,
    model: Option<TractModel>,
}

impl TractBackend {
    /// List Tract execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create an uninitialized backend for `asset`, loading from `cache`
    #[must_use]
    pub fn new(asset: ModelAsset, cache: ModelCache) -> Self {
        Self {
            asset,
            cache,
            model: None,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.asset.load_model_data(&self.cache)?;

        log::info!("🚀 Initializing Tract backend for {}", self.asset);
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| SegifyError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| SegifyError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| SegifyError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &SegifyConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn run(&mut self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| SegifyError::inference("Tract model not initialized"))?;

        let inference_start = Instant::now();
        let tensors: TVec<TValue> = inputs
            .into_iter()
            .map(|array| Tensor::from(array).into())
            .collect();

        let outputs = model
            .run(tensors)
            .map_err(|e| SegifyError::inference(format!("Tract inference failed: {e}")))?;

        let mut results = Vec::with_capacity(outputs.len());
        for output in outputs {
            let view = output.to_array_view::<f32>().map_err(|e| {
                SegifyError::inference(format!("Failed to convert output tensor: {e}"))
            })?;
            results.push(view.to_owned());
        }

        log::debug!(
            "✅ {} Tract inference completed in {}ms",
            self.asset,
            inference_start.elapsed().as_millis()
        );
        Ok(results)
    }

    fn asset(&self) -> ModelAsset {
        self.asset
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
