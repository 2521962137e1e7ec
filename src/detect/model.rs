//! Detection model: network config, label list and an inference backend.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use super::backend::{InferenceBackend, OutputTensor};
use super::network::NetworkConfig;
use super::nms::{non_max_suppression, BoundingBox};
use super::preprocess::blob_from_frame;
use super::registry::BackendRegistry;
use super::result::{DetectParams, Detection};
use crate::error::CameraError;
use crate::frame::{Frame, PixelLayout};

/// Columns preceding the class scores in every output row.
const BOX_COLUMNS: usize = 5;

/// A loaded detector.
///
/// Built once at startup and owned by the session. Nothing about it changes
/// after construction; `detect` takes `&mut self` only because backends are
/// not reentrant.
pub struct DetectionModel {
    backend: Box<dyn InferenceBackend>,
    network: NetworkConfig,
    labels: Vec<String>,
    input_order: PixelLayout,
}

impl std::fmt::Debug for DetectionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionModel")
            .field("backend", &self.backend.name())
            .field("network", &self.network)
            .field("labels", &self.labels.len())
            .finish()
    }
}

impl DetectionModel {
    /// Assemble a model from an already-built backend.
    pub fn with_backend(
        backend: Box<dyn InferenceBackend>,
        network: NetworkConfig,
        labels: Vec<String>,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(CameraError::model_load("label list is empty").into());
        }
        if network.output_layers.is_empty() {
            return Err(CameraError::model_load("network has no output layers").into());
        }
        if let Some(classes) = network.classes {
            if classes != labels.len() {
                log::warn!(
                    "network declares {} classes but label list has {}; extra classes are ignored",
                    classes,
                    labels.len()
                );
            }
        }
        Ok(Self {
            backend,
            network,
            labels,
            input_order: PixelLayout::Rgb24,
        })
    }

    /// Channel order the network expects. Darknet models take RGB.
    pub fn with_input_order(mut self, order: PixelLayout) -> Self {
        self.input_order = order;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn output_layers(&self) -> &[String] {
        &self.network.output_layers
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the detector on `frame`. Boxes are in `frame`'s pixel coordinates.
    pub fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        let input = blob_from_frame(
            frame,
            self.network.width,
            self.network.height,
            self.input_order,
        )?;
        let outputs = self
            .backend
            .forward(&input, &self.network.output_layers)
            .with_context(|| format!("{} forward pass", self.backend.name()))?;

        let candidates = decode_candidates(
            &outputs,
            frame.width(),
            frame.height(),
            self.labels.len(),
            params.confidence_threshold,
        )?;

        let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
        let scores: Vec<f32> = candidates.iter().map(|c| c.confidence).collect();
        let kept = non_max_suppression(&boxes, &scores, params.nms_threshold);

        Ok(kept
            .into_iter()
            .map(|i| {
                let candidate = &candidates[i];
                Detection {
                    class_id: candidate.class_id,
                    label: self.labels[candidate.class_id].clone(),
                    confidence: candidate.confidence,
                    bbox: candidate.bbox,
                }
            })
            .collect())
    }
}

/// A thresholded box before suppression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Turn raw output rows into pixel-space candidates.
///
/// Rows are `[cx, cy, w, h, objectness, scores...]` relative to the network
/// input. The class is the argmax of the scores; rows below `threshold`, or
/// whose class has no label, are dropped. Boxes are scaled to the source
/// frame and clamped inside it; boxes left empty by clamping are dropped.
pub(crate) fn decode_candidates(
    outputs: &[OutputTensor],
    frame_width: u32,
    frame_height: u32,
    label_count: usize,
    threshold: f32,
) -> Result<Vec<Candidate>> {
    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let mut candidates = Vec::new();

    for output in outputs {
        if output.rows() > 0 && output.cols() <= BOX_COLUMNS {
            return Err(anyhow!(
                "output rows have {} columns, need more than {}",
                output.cols(),
                BOX_COLUMNS
            ));
        }
        for row in output.iter_rows() {
            let Some((class_id, confidence)) = argmax(&row[BOX_COLUMNS..]) else {
                continue;
            };
            if confidence < threshold || class_id >= label_count {
                continue;
            }

            let center_x = (row[0] * fw) as i32;
            let center_y = (row[1] * fh) as i32;
            let width = (row[2] * fw) as i32;
            let height = (row[3] * fh) as i32;
            let x = (center_x as f32 - width as f32 / 2.0) as i32;
            let y = (center_y as f32 - height as f32 / 2.0) as i32;

            let bbox = BoundingBox::new(x, y, width, height).clamp_to(frame_width, frame_height);
            if bbox.is_empty() {
                continue;
            }
            candidates.push(Candidate {
                class_id,
                confidence,
                bbox,
            });
        }
    }
    Ok(candidates)
}

/// Index and value of the highest score. NaN scores are skipped.
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best
}

/// Parse a label list: one label per line, order defines the class index.
pub fn parse_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = text.lines().map(|line| line.trim().to_string()).collect();
    while labels.last().is_some_and(|label| label.is_empty()) {
        labels.pop();
    }
    labels
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|err| CameraError::model_load(format!("read {}: {}", path.display(), err)))?;
    let labels = parse_labels(&text);
    if labels.is_empty() {
        return Err(CameraError::model_load(format!("{} has no labels", path.display())).into());
    }
    Ok(labels)
}

/// Load a model from its three files using the default backends.
pub fn load_model<P: AsRef<Path>>(weights: P, config: P, labels: P) -> Result<DetectionModel> {
    load_model_with(&BackendRegistry::with_defaults(), weights, config, labels, None)
}

/// Load a model, choosing the inference backend from `registry`.
///
/// `input_size` overrides the network input geometry declared in `config`.
pub fn load_model_with<P: AsRef<Path>>(
    registry: &BackendRegistry,
    weights: P,
    config: P,
    labels: P,
    input_size: Option<(u32, u32)>,
) -> Result<DetectionModel> {
    let labels = load_labels(labels)?;
    let mut network = NetworkConfig::from_path(config.as_ref())
        .map_err(|err| CameraError::model_load(format!("{:#}", err)))?;
    if let Some((width, height)) = input_size {
        network = network
            .with_input_size(width, height)
            .map_err(|err| CameraError::model_load(format!("{:#}", err)))?;
    }
    let mut backend = registry
        .build(weights.as_ref(), config.as_ref(), &network)
        .map_err(|err| CameraError::model_load(format!("{:#}", err)))?;
    backend
        .warm_up()
        .map_err(|err| CameraError::model_load(format!("warm-up: {:#}", err)))?;

    let model = DetectionModel::with_backend(backend, network, labels)?;
    log::info!(
        "detection model loaded ({} backend, {} labels, outputs {:?})",
        model.backend_name(),
        model.labels().len(),
        model.output_layers()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::error::ErrorKind;

    fn coco_like_labels(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| if i == 0 { "person".to_string() } else { format!("class{}", i) })
            .collect()
    }

    fn row(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, score: f32, classes: usize) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h, 1.0];
        let mut scores = vec![0.0; classes];
        scores[class_id] = score;
        row.extend(scores);
        row
    }

    fn network() -> NetworkConfig {
        NetworkConfig::parse("[net]\nwidth=32\nheight=32\n[yolo]\nclasses=80\n").unwrap()
    }

    fn model_with_rows(rows: &[Vec<f32>]) -> DetectionModel {
        let output = OutputTensor::from_rows(rows).unwrap();
        DetectionModel::with_backend(
            Box::new(ScriptedBackend::new(vec![output])),
            network(),
            coco_like_labels(80),
        )
        .unwrap()
    }

    #[test]
    fn centered_box_resolves_to_pixel_coordinates() -> Result<()> {
        let mut model = model_with_rows(&[row(0.5, 0.5, 0.2, 0.2, 0, 0.9, 80)]);
        let frame = Frame::filled(640, 480, PixelLayout::Bgr24, [0, 0, 0])?;

        let detections = model.detect(&frame, &DetectParams::default())?;
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.bbox, BoundingBox::new(256, 192, 128, 96));
        assert_eq!(det.label, "person");
        assert_eq!(det.class_id, 0);
        assert!((det.confidence - 0.9).abs() < 1e-6);
        assert_eq!(det.caption(), "person 0.90");
        Ok(())
    }

    #[test]
    fn nothing_below_threshold_survives() -> Result<()> {
        let rows: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let x = 0.05 + i as f32 * 0.045;
                row(x, 0.5, 0.04, 0.04, i % 80, i as f32 / 20.0, 80)
            })
            .collect();
        let frame = Frame::filled(640, 480, PixelLayout::Bgr24, [0, 0, 0])?;
        for threshold in [0.0, 0.25, 0.5, 0.75, 0.95] {
            let mut model = model_with_rows(&rows);
            let params = DetectParams {
                confidence_threshold: threshold,
                nms_threshold: 0.4,
            };
            let detections = model.detect(&frame, &params)?;
            assert!(detections.iter().all(|d| d.confidence >= threshold));
        }
        Ok(())
    }

    #[test]
    fn overlapping_boxes_are_suppressed() -> Result<()> {
        let mut model = model_with_rows(&[
            row(0.5, 0.5, 0.3, 0.3, 0, 0.7, 80),
            row(0.51, 0.5, 0.3, 0.3, 0, 0.95, 80),
            row(0.1, 0.1, 0.1, 0.1, 2, 0.6, 80),
        ]);
        let frame = Frame::filled(640, 480, PixelLayout::Bgr24, [0, 0, 0])?;
        let detections = model.detect(&frame, &DetectParams::default())?;
        assert_eq!(detections.len(), 2);
        assert!((detections[0].confidence - 0.95).abs() < 1e-6);
        assert_eq!(detections[1].class_id, 2);
        Ok(())
    }

    #[test]
    fn overflowing_boxes_are_clamped_into_frame() -> Result<()> {
        let candidates = decode_candidates(
            &[OutputTensor::from_rows(&[row(0.95, 0.95, 0.4, 0.4, 1, 0.8, 3)])?],
            100,
            50,
            3,
            0.5,
        )?;
        assert_eq!(candidates.len(), 1);
        let bbox = candidates[0].bbox;
        assert!(bbox.x >= 0 && bbox.y >= 0);
        assert!(bbox.right() <= 100 && bbox.bottom() <= 50);
        Ok(())
    }

    #[test]
    fn classes_without_labels_are_dropped() -> Result<()> {
        let candidates = decode_candidates(
            &[OutputTensor::from_rows(&[row(0.5, 0.5, 0.2, 0.2, 4, 0.9, 5)])?],
            100,
            100,
            3,
            0.5,
        )?;
        assert!(candidates.is_empty());
        Ok(())
    }

    #[test]
    fn rows_without_scores_are_rejected() -> Result<()> {
        let short = OutputTensor::from_rows(&[vec![0.5, 0.5, 0.1, 0.1, 1.0]])?;
        assert!(decode_candidates(&[short], 10, 10, 1, 0.5).is_err());
        Ok(())
    }

    #[test]
    fn labels_keep_order_and_drop_trailing_blank_lines() {
        assert_eq!(
            parse_labels("person\nbicycle\n car \n\n"),
            vec!["person", "bicycle", "car"]
        );
    }

    #[test]
    fn empty_label_list_is_a_model_load_error() {
        let err = DetectionModel::with_backend(
            Box::new(ScriptedBackend::new(vec![])),
            network(),
            vec![],
        )
        .unwrap_err();
        assert_eq!(CameraError::kind_of(&err), Some(ErrorKind::ModelLoad));
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some((1, 0.7)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn nan_scores_do_not_hide_valid_classes() -> Result<()> {
        assert_eq!(argmax(&[f32::NAN, 0.8, 0.1]), Some((1, 0.8)));
        assert_eq!(argmax(&[0.3, f32::NAN, 0.6]), Some((2, 0.6)));
        assert_eq!(argmax(&[f32::NAN, f32::NAN]), None);

        let mut leading_nan = vec![0.5, 0.5, 0.2, 0.2, 1.0, f32::NAN, 0.9, 0.0];
        let candidates = decode_candidates(
            &[OutputTensor::from_rows(&[leading_nan.clone()])?],
            100,
            100,
            3,
            0.5,
        )?;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 1);

        leading_nan[6] = f32::NAN;
        let candidates =
            decode_candidates(&[OutputTensor::from_rows(&[leading_nan])?], 100, 100, 3, 0.5)?;
        assert!(candidates.is_empty());
        Ok(())
    }
}
