use std::cmp::Ordering;

/// Axis-aligned box in pixel coordinates. Covers `[x, x + width) x [y, y + height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Intersect with the frame `[0, frame_width) x [0, frame_height)`.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let max_x = frame_width.min(i32::MAX as u32) as i32;
        let max_y = frame_height.min(i32::MAX as u32) as i32;
        let left = self.x.clamp(0, max_x);
        let top = self.y.clamp(0, max_y);
        let right = self.right().clamp(0, max_x);
        let bottom = self.bottom().clamp(0, max_y);
        BoundingBox {
            x: left,
            y: top,
            width: (right - left).max(0),
            height: (bottom - top).max(0),
        }
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return 0;
        }
        (right - left) as i64 * (bottom - top) as i64
    }

    /// Intersection over union. Zero when both boxes are empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        (intersection as f64 / union as f64) as f32
    }
}

/// Greedy non-max suppression.
///
/// Visits boxes from highest to lowest score (ties keep input order), keeps
/// the current box and suppresses every later box whose IoU with it exceeds
/// `iou_threshold`. Returns indices into `boxes` of the kept boxes, highest
/// score first.
pub fn non_max_suppression(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let count = boxes.len().min(scores.len());
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; count];
    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[rank + 1..] {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_partial_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 10, 10);
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 0.142_857).abs() < 1e-4);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 5, 5)), 0.0);
    }

    #[test]
    fn iou_of_empty_boxes_is_zero() {
        let empty = BoundingBox::new(3, 3, 0, 0);
        assert_eq!(empty.iou(&empty), 0.0);
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let b = BoundingBox::new(-20, 400, 100, 200).clamp_to(640, 480);
        assert_eq!(b, BoundingBox::new(0, 400, 80, 80));
        assert!(b.right() <= 640 && b.bottom() <= 480);

        let outside = BoundingBox::new(700, 10, 20, 20).clamp_to(640, 480);
        assert!(outside.is_empty());
    }

    #[test]
    fn nms_keeps_best_of_overlapping_cluster() {
        let boxes = vec![
            BoundingBox::new(0, 0, 100, 100),
            BoundingBox::new(5, 5, 100, 100),
            BoundingBox::new(300, 300, 50, 50),
        ];
        let scores = vec![0.8, 0.9, 0.7];
        assert_eq!(non_max_suppression(&boxes, &scores, 0.4), vec![1, 2]);
    }

    #[test]
    fn nms_ties_resolve_in_input_order() {
        let boxes = vec![BoundingBox::new(0, 0, 10, 10), BoundingBox::new(0, 0, 10, 10)];
        assert_eq!(non_max_suppression(&boxes, &[0.6, 0.6], 0.4), vec![0]);
    }

    #[test]
    fn nms_survivors_never_overlap_beyond_threshold() {
        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        for i in 0..40 {
            boxes.push(BoundingBox::new((i * 7) % 90, (i * 13) % 70, 30 + i % 5, 25 + i % 7));
            scores.push(((i * 37) % 100) as f32 / 100.0);
        }
        let threshold = 0.4;
        let kept = non_max_suppression(&boxes, &scores, threshold);
        assert!(!kept.is_empty());
        for (n, &a) in kept.iter().enumerate() {
            for &b in &kept[n + 1..] {
                assert!(boxes[a].iou(&boxes[b]) <= threshold);
            }
        }
    }

    #[test]
    fn nms_threshold_of_one_keeps_everything() {
        let boxes = vec![BoundingBox::new(0, 0, 10, 10); 3];
        assert_eq!(non_max_suppression(&boxes, &[0.1, 0.3, 0.2], 1.0), vec![1, 2, 0]);
    }
}
