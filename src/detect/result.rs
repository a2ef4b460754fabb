/// Stage-A verdict for a tight crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlateClass {
    Noise,
    Number,
}

/// Class index the detector uses for the glyph `0`.
pub const ZERO_CLASS: u8 = 10;

/// One detected glyph in context-crop pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DigitBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// 0..=10; `ZERO_CLASS` is rendered as `'0'`.
    pub class: u8,
    pub confidence: f32,
}

impl DigitBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class: u8, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            class,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with `other`; 0 when either box is empty.
    pub fn iou(&self, other: &DigitBox) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Greedy class-agnostic non-maximum suppression.
///
/// Keeps boxes in descending confidence order, dropping any box whose IoU
/// with an already kept box exceeds `iou_threshold`. The survivors are
/// returned in their original detection order.
pub fn non_max_suppression(boxes: &[DigitBox], iou_threshold: f32) -> Vec<DigitBox> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| boxes[b].confidence.total_cmp(&boxes[a].confidence));

    let mut kept: Vec<usize> = Vec::with_capacity(boxes.len());
    for idx in order {
        if kept
            .iter()
            .all(|&k| boxes[k].iou(&boxes[idx]) <= iou_threshold)
        {
            kept.push(idx);
        }
    }
    kept.sort_unstable();
    kept.into_iter().map(|idx| boxes[idx]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = DigitBox::new(0.0, 0.0, 10.0, 10.0, 1, 0.9);
        let b = DigitBox::new(20.0, 0.0, 30.0, 10.0, 2, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence_box() {
        let boxes = [
            DigitBox::new(0.0, 0.0, 10.0, 10.0, 1, 0.6),
            DigitBox::new(1.0, 0.0, 11.0, 10.0, 7, 0.9),
            DigitBox::new(20.0, 0.0, 30.0, 10.0, 3, 0.8),
        ];
        let kept = non_max_suppression(&boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].class, 7);
        assert_eq!(kept[1].class, 3);
    }
}
