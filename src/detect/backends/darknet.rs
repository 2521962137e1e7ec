#![cfg(feature = "backend-opencv")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use opencv::core::{Mat, Scalar, Vector, CV_32F};
use opencv::dnn;
use opencv::prelude::*;

use crate::detect::backend::{InferenceBackend, InputTensor, OutputTensor};
use crate::detect::network::NetworkConfig;

/// OpenCV DNN backend for darknet networks (`.cfg` + `.weights`).
///
/// The net is read once; its unconnected output layers are resolved at load
/// time and every forward pass returns them in that order.
pub struct DarknetBackend {
    net: dnn::Net,
    output_names: Vector<String>,
}

impl DarknetBackend {
    pub fn new(weights: &Path, config: &Path) -> Result<Self> {
        let net = dnn::read_net_from_darknet(path_str(config)?, path_str(weights)?)
            .with_context(|| {
                format!(
                    "failed to read darknet network {} / {}",
                    config.display(),
                    weights.display()
                )
            })?;
        let output_names = net
            .get_unconnected_out_layers_names()
            .context("failed to resolve output layers")?;
        if output_names.is_empty() {
            return Err(anyhow!("darknet network has no unconnected output layers"));
        }
        Ok(Self { net, output_names })
    }

    fn blob(input: &InputTensor) -> Result<Mat> {
        let sizes = [
            1,
            input.channels as i32,
            input.height as i32,
            input.width as i32,
        ];
        let mut blob = Mat::new_nd_with_default(&sizes, CV_32F, Scalar::all(0.0))
            .context("allocate input blob")?;
        let dst = blob.data_typed_mut::<f32>().context("input blob layout")?;
        if dst.len() != input.data.len() {
            return Err(anyhow!(
                "input blob holds {} values, tensor has {}",
                dst.len(),
                input.data.len()
            ));
        }
        dst.copy_from_slice(&input.data);
        Ok(blob)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path {} is not valid UTF-8", path.display()))
}

fn to_output(mat: &Mat) -> Result<OutputTensor> {
    let rows = mat.rows().max(0) as usize;
    let cols = mat.cols().max(0) as usize;
    let values = mat
        .data_typed::<f32>()
        .context("output layer was not f32")?
        .to_vec();
    OutputTensor::new(rows, cols, values)
}

impl InferenceBackend for DarknetBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn forward(
        &mut self,
        input: &InputTensor,
        output_layers: &[String],
    ) -> Result<Vec<OutputTensor>> {
        let blob = Self::blob(input)?;
        self.net
            .set_input(&blob, "", 1.0, Scalar::default())
            .context("set network input")?;
        let mut outputs: Vector<Mat> = Vector::new();
        self.net
            .forward(&mut outputs, &self.output_names)
            .context("darknet forward pass failed")?;
        if outputs.len() != output_layers.len() {
            log::debug!(
                "network produced {} outputs for {} configured layers",
                outputs.len(),
                output_layers.len()
            );
        }
        outputs.iter().map(|mat| to_output(&mat)).collect()
    }
}

/// Registry factory for darknet `.weights`.
pub(crate) fn build_darknet_backend(
    weights: &Path,
    config: &Path,
    _network: &NetworkConfig,
) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(DarknetBackend::new(weights, config)?))
}
