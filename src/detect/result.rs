use std::fmt;

use super::nms::BoundingBox;

/// Inference parameters for one `detect` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Candidates whose best class score is below this are discarded.
    pub confidence_threshold: f32,
    /// Boxes overlapping a better box by more than this IoU are suppressed.
    pub nms_threshold: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// A resolved detection on a source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Index into the model's label list.
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    /// Pixel box inside the frame the detection was computed from.
    pub bbox: BoundingBox,
}

impl Detection {
    /// Caption drawn next to the box, e.g. `person 0.87`.
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.2}) at ({}, {}, {}x{})",
            self.label,
            self.confidence,
            self.bbox.x,
            self.bbox.y,
            self.bbox.width,
            self.bbox.height
        )
    }
}
