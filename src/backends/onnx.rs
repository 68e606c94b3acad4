//! ONNX Runtime backend
//!
//! Runs any of the manifest graphs through ONNX Runtime with a configurable
//! execution provider (CPU, CUDA, CoreML). Provider requests that cannot be
//! honoured on this machine fall back to CPU with a warning.

use crate::cache::ModelCache;
use crate::config::{ExecutionProvider, SegifyConfig};
use crate::error::{Result, SegifyError};
use crate::inference::InferenceBackend;
use crate::models::ModelAsset;
use instant::{Duration, Instant};
use ndarray::ArrayD;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputValue};
use ort::value::Tensor;

/// ONNX Runtime backend for one model asset
#[derive(Debug)]
pub struct OnnxBackend {
    asset: ModelAsset,
    cache: ModelCache,
    session: Option<Session>,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 System Hardware Analysis:");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Create an uninitialized backend for `asset`, loading from `cache`
    #[must_use]
    pub fn new(asset: ModelAsset, cache: ModelCache) -> Self {
        Self {
            asset,
            cache,
            session: None,
        }
    }

    /// Execution providers to register for the requested provider
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda = CUDAExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml = CoreMLExecutionProvider::default();
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        match requested {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(coreml.with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda => {
                if cuda_available {
                    log::info!("Using CUDA execution provider");
                    vec![cuda.build()]
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    vec![coreml.with_subgraphs(true).build()]
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
        }
    }

    fn load_model(&mut self, config: &SegifyConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.asset.load_model_data(&self.cache)?;

        let mut session_builder = Session::builder()
            .map_err(|e| {
                SegifyError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                SegifyError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    SegifyError::inference(format!("Failed to set execution providers: {e}"))
                })?;
        }

        if config.intra_threads > 0 {
            session_builder = session_builder
                .with_intra_threads(config.intra_threads)
                .map_err(|e| SegifyError::inference(format!("Failed to set intra threads: {e}")))?;
        }

        let session = session_builder.commit_from_memory(&model_data).map_err(|e| {
            SegifyError::model(format!(
                "Failed to create session for {}: {e}",
                self.asset
            ))
        })?;

        log::debug!(
            "✅ ONNX Runtime session for {} ({} inputs, {} outputs)",
            self.asset,
            session.inputs.len(),
            session.outputs.len()
        );
        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Loaded {} in {:.0}ms",
            self.asset,
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &SegifyConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn run(&mut self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        let asset = self.asset;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SegifyError::internal("ONNX session not initialized"))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if input_names.len() != inputs.len() {
            return Err(SegifyError::inference(format!(
                "{asset} expects {} inputs, got {}",
                input_names.len(),
                inputs.len()
            )));
        }

        let inference_start = Instant::now();
        let mut bound: Vec<(String, SessionInputValue<'_>)> = Vec::with_capacity(inputs.len());
        for (name, array) in input_names.into_iter().zip(inputs) {
            let tensor = Tensor::from_array(array).map_err(|e| {
                SegifyError::processing(format!("Failed to convert input '{name}': {e}"))
            })?;
            bound.push((name, tensor.into()));
        }

        let outputs = session
            .run(bound)
            .map_err(|e| SegifyError::inference(format!("ONNX inference failed: {e}")))?;

        let mut results = Vec::with_capacity(output_names.len());
        for name in &output_names {
            let value = outputs.get(name.as_str()).ok_or_else(|| {
                SegifyError::processing(format!("Output tensor '{name}' not found"))
            })?;
            let array = value.try_extract_array::<f32>().map_err(|e| {
                SegifyError::processing(format!("Failed to extract output '{name}': {e}"))
            })?;
            results.push(array.to_owned());
        }

        log::debug!(
            "⚡ {} inference: {:.2}ms",
            asset,
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(results)
    }

    fn asset(&self) -> ModelAsset {
        self.asset
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
