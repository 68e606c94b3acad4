//! Inference backend abstraction and factory

use crate::cache::ModelCache;
use crate::config::{BackendType, SegifyConfig};
use crate::error::{Result, SegifyError};
use crate::models::ModelAsset;
use ndarray::ArrayD;
use std::sync::{Mutex, MutexGuard};

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// A loaded ONNX graph that maps positional f32 inputs to positional f32 outputs
pub trait InferenceBackend: Send {
    /// Load the graph; later calls are no-ops returning `None`
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Graph cannot be parsed or optimised
    /// - Execution provider configuration fails
    fn initialize(&mut self, config: &SegifyConfig) -> Result<Option<Duration>>;

    /// Run the graph
    ///
    /// Inputs are bound in the graph's declared input order; outputs are returned
    /// in the graph's declared output order.
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Input count or shapes rejected by the graph
    /// - Non-f32 outputs
    fn run(&mut self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>>;

    /// Asset this backend executes
    fn asset(&self) -> ModelAsset;

    fn is_initialized(&self) -> bool;
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend for `asset` of the requested type
    ///
    /// # Errors
    /// - Backend type not compiled in
    fn create_backend(
        &self,
        backend_type: BackendType,
        asset: ModelAsset,
        cache: &ModelCache,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled by crate features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[allow(unused_variables)]
    fn create_backend(
        &self,
        backend_type: BackendType,
        asset: ModelAsset,
        cache: &ModelCache,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new(
                asset,
                cache.clone(),
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new(
                asset,
                cache.clone(),
            ))),
            #[allow(unreachable_patterns)]
            other => Err(SegifyError::invalid_config(format!(
                "{other} backend not available; rebuild with the '{other}' feature"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        #[cfg_attr(not(any(feature = "onnx", feature = "tract")), allow(unused_mut))]
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Create and initialize one backend per asset
///
/// # Errors
/// - Backend creation or initialization fails for any asset
pub fn load_backends<const N: usize>(
    factory: &dyn BackendFactory,
    config: &SegifyConfig,
    cache: &ModelCache,
    assets: [ModelAsset; N],
) -> Result<Vec<Box<dyn InferenceBackend>>> {
    let mut backends = Vec::with_capacity(N);
    for asset in assets {
        let mut backend = factory.create_backend(config.backend_type, asset, cache)?;
        if let Some(load_time) = backend.initialize(config)? {
            log::debug!(
                "Loaded {} in {:.0}ms",
                asset,
                load_time.as_secs_f64() * 1000.0
            );
        }
        backends.push(backend);
    }
    Ok(backends)
}

/// Backend shared by a `Sync` adapter
pub(crate) type SharedBackend = Mutex<Box<dyn InferenceBackend>>;

/// Exclusive access to a shared backend for one or more runs
pub(crate) fn lock_backend<'a>(
    backend: &'a SharedBackend,
    name: &str,
) -> Result<MutexGuard<'a, Box<dyn InferenceBackend>>> {
    backend
        .lock()
        .map_err(|_| SegifyError::internal(format!("{name} backend lock poisoned")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::ScriptedBackend;

    struct ScriptedFactory;

    impl BackendFactory for ScriptedFactory {
        fn create_backend(
            &self,
            _backend_type: BackendType,
            asset: ModelAsset,
            _cache: &ModelCache,
        ) -> Result<Box<dyn InferenceBackend>> {
            Ok(Box::new(ScriptedBackend::new(asset, |inputs| Ok(inputs))))
        }

        fn available_backends(&self) -> Vec<BackendType> {
            vec![BackendType::Onnx]
        }
    }

    #[test]
    fn test_default_factory_lists_enabled_backends() {
        let backends = DefaultBackendFactory.available_backends();
        #[cfg(feature = "onnx")]
        assert!(backends.contains(&BackendType::Onnx));
        #[cfg(feature = "tract")]
        assert!(backends.contains(&BackendType::Tract));
        assert!(backends.len() <= 2);
    }

    #[test]
    fn test_load_backends_initializes_each_asset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();
        let backends = load_backends(
            &ScriptedFactory,
            &SegifyConfig::default(),
            &cache,
            ModelAsset::STYLIZATION,
        )
        .unwrap();

        assert_eq!(backends.len(), 2);
        assert!(backends.iter().all(|b| b.is_initialized()));
        assert_eq!(backends[0].asset(), ModelAsset::StyleEncoder);
        assert_eq!(backends[1].asset(), ModelAsset::StyleDecoder);
    }
}
