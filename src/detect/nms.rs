use super::result::{Detection, DetectionSet};

/// IoU above which a lower-confidence box is treated as a duplicate.
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// Non-maximum suppression.
///
/// Boxes are visited from highest to lowest confidence; equal confidences keep
/// their input order. A box is dropped when its IoU with an already kept box
/// exceeds `iou_threshold`. Survivors are returned in input order.
pub fn non_max_suppression(candidates: Vec<Detection>, iou_threshold: f32) -> DetectionSet {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    // stable: ties keep first-seen order
    order.sort_by(|&a, &b| {
        candidates[b]
            .confidence
            .total_cmp(&candidates[a].confidence)
    });

    let mut kept = vec![false; candidates.len()];
    let mut survivors: Vec<usize> = Vec::with_capacity(candidates.len());
    for index in order {
        let bbox = &candidates[index].bbox;
        let duplicate = survivors
            .iter()
            .any(|&prev| candidates[prev].bbox.iou(bbox) > iou_threshold);
        if !duplicate {
            kept[index] = true;
            survivors.push(index);
        }
    }

    candidates
        .into_iter()
        .zip(kept)
        .filter_map(|(detection, keep)| keep.then_some(detection))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(x: u32, y: u32, w: u32, h: u32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, w, h), confidence)
    }

    #[test]
    fn overlapping_lower_confidence_box_is_suppressed() {
        let input = vec![det(0, 0, 100, 100, 0.6), det(5, 5, 100, 100, 0.9)];
        let out = non_max_suppression(input, DEFAULT_NMS_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert_eq!(out.as_slice()[0].confidence, 0.9);
    }

    #[test]
    fn output_keeps_insertion_order() {
        let input = vec![
            det(0, 0, 10, 10, 0.3),
            det(100, 0, 10, 10, 0.9),
            det(200, 0, 10, 10, 0.6),
        ];
        let out = non_max_suppression(input.clone(), DEFAULT_NMS_THRESHOLD);
        assert_eq!(out.as_slice(), input.as_slice());
    }

    #[test]
    fn equal_confidence_keeps_first_seen() {
        let input = vec![det(0, 0, 100, 100, 0.8), det(2, 2, 100, 100, 0.8)];
        let out = non_max_suppression(input, DEFAULT_NMS_THRESHOLD);
        assert_eq!(out.len(), 1);
        assert_eq!(out.as_slice()[0].bbox.x, 0);
    }

    #[test]
    fn overlap_at_threshold_is_kept() {
        // IoU of exactly 1/3 does not exceed a 1/3 threshold
        let input = vec![det(0, 0, 10, 10, 0.9), det(5, 0, 10, 10, 0.8)];
        let out = non_max_suppression(input, 1.0 / 3.0 + 1e-6);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn suppression_is_idempotent() {
        let input = vec![
            det(0, 0, 50, 80, 0.7),
            det(4, 3, 50, 80, 0.9),
            det(30, 0, 50, 80, 0.65),
            det(200, 200, 40, 40, 0.5),
            det(205, 198, 40, 40, 0.5),
            det(400, 10, 20, 20, 0.95),
        ];
        let once = non_max_suppression(input, DEFAULT_NMS_THRESHOLD);
        let twice = non_max_suppression(once.clone().into_vec(), DEFAULT_NMS_THRESHOLD);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_set() {
        assert!(non_max_suppression(Vec::new(), DEFAULT_NMS_THRESHOLD).is_empty());
    }
}
