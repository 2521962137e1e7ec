use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, InputTensor, OutputTensor};

/// Backend that replays fixed output tensors.
///
/// Used by tests to exercise decoding, suppression
/// and drawing without real weights.
pub struct ScriptedBackend {
    outputs: Vec<OutputTensor>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(outputs: Vec<OutputTensor>) -> Self {
        Self {
            outputs,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend whose every forward pass fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            outputs: Vec::new(),
            failure: Some(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of forward passes.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn forward(
        &mut self,
        input: &InputTensor,
        _output_layers: &[String],
    ) -> Result<Vec<OutputTensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        if input.data.is_empty() {
            return Err(anyhow!("empty input tensor"));
        }
        Ok(self.outputs.clone())
    }
}
