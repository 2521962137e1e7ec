#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, InputTensor, OutputTensor};
use crate::detect::network::NetworkConfig;

/// Tract-based backend for ONNX exports of the detection network.
///
/// The model is loaded once from a local file and optimized for the input
/// geometry declared by the network config. Graph outputs are returned in
/// declaration order.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: usize,
    height: usize,
    channels: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, network: &NetworkConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        let width = network.width as usize;
        let height = network.height as usize;
        let channels = network.channels as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, channels, height, width)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            channels,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.shape() != [1, self.channels, self.height, self.width] {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                [1, self.channels, self.height, self.width]
            ));
        }
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, self.channels, self.height, self.width),
            input.data.clone(),
        )
        .context("reshape input tensor")?;
        Ok(array.into_tensor())
    }
}

fn to_output(tensor: &Tensor) -> Result<OutputTensor> {
    let view = tensor
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let cols = view.shape().last().copied().unwrap_or(0);
    let values: Vec<f32> = view.iter().copied().collect();
    let rows = if cols == 0 { 0 } else { values.len() / cols };
    OutputTensor::new(rows, cols, values)
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn forward(
        &mut self,
        input: &InputTensor,
        output_layers: &[String],
    ) -> Result<Vec<OutputTensor>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < output_layers.len() {
            log::debug!(
                "model produced {} outputs for {} configured layers",
                outputs.len(),
                output_layers.len()
            );
        }
        outputs.iter().map(|value| to_output(value)).collect()
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = InputTensor::new(
            self.channels,
            self.height,
            self.width,
            vec![0.0; self.channels * self.height * self.width],
        )?;
        self.forward(&blank, &[]).map(|_| ())
    }
}

/// Registry factory for `.onnx` weights.
pub(crate) fn build_tract_backend(
    weights: &Path,
    _config: &Path,
    network: &NetworkConfig,
) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(TractBackend::new(weights, network)?))
}
