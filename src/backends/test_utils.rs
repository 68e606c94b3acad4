//! Scripted inference backend for exercising pre/post-processing without model files

use crate::{
    config::SegifyConfig, error::Result, inference::InferenceBackend, models::ModelAsset,
};
use instant::Duration;
use ndarray::ArrayD;
use std::sync::{Arc, Mutex};

type Script = Box<dyn FnMut(Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> + Send>;

/// Backend whose outputs are computed by a closure over the inputs
pub(crate) struct ScriptedBackend {
    asset: ModelAsset,
    initialized: bool,
    script: Script,
    /// Input shapes of every call, in call order
    calls: Arc<Mutex<Vec<Vec<Vec<usize>>>>>,
}

impl ScriptedBackend {
    pub(crate) fn new<F>(asset: ModelAsset, script: F) -> Self
    where
        F: FnMut(Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> + Send + 'static,
    {
        Self {
            asset,
            initialized: false,
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded input shapes
    pub(crate) fn call_log(&self) -> Arc<Mutex<Vec<Vec<Vec<usize>>>>> {
        Arc::clone(&self.calls)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn initialize(&mut self, _config: &SegifyConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn run(&mut self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        self.calls
            .lock()
            .unwrap()
            .push(inputs.iter().map(|a| a.shape().to_vec()).collect());
        (self.script)(inputs)
    }

    fn asset(&self) -> ModelAsset {
        self.asset
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
