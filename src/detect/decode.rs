//! Normalization of raw network output into candidate detections.
//!
//! Every backend output passes through here exactly once, right after the
//! forward pass. Shapes accepted per output head:
//!
//! - `[N, C]` rows of C values
//! - `[1, N, C]` batched rows
//! - `[1, C, N]` channel-first, transposed here
//!
//! A rank-3 head is read as batched rows unless the model is configured with
//! [`OutputOrder::ChannelsFirst`], or the rows would be too short to hold a
//! person score while the other axis is not. Multiple heads are concatenated
//! in order.

use serde::{Deserialize, Serialize};

use super::backend::RawTensor;
use super::result::{BoundingBox, Detection};
use crate::error::DetectionError;

/// Person class index in the network's label set.
pub const PERSON_CLASS: usize = 0;

/// Row layout of the network output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// `[cx, cy, w, h, objectness, class...]`, coordinates normalized to `[0, 1]`.
    #[default]
    Darknet,
    /// `[cx, cy, w, h, class...]`, coordinates in network input pixels.
    Anchorless,
}

impl OutputLayout {
    fn class_offset(self) -> usize {
        match self {
            OutputLayout::Darknet => 5,
            OutputLayout::Anchorless => 4,
        }
    }

    /// Shortest row that still carries a person score.
    fn min_row_len(self) -> usize {
        self.class_offset() + PERSON_CLASS + 1
    }
}

/// Axis order of a rank-3 output head.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputOrder {
    /// `[1, N, C]`: one row per box.
    #[default]
    Rows,
    /// `[1, C, N]`: one row per channel (YOLOv8 style).
    ChannelsFirst,
}

/// Flatten all output heads into rows.
pub(crate) fn output_rows(
    tensors: &[RawTensor],
    layout: OutputLayout,
    order: OutputOrder,
) -> Result<Vec<Vec<f32>>, DetectionError> {
    let mut rows = Vec::new();
    for tensor in tensors {
        append_rows(tensor, layout, order, &mut rows)?;
    }
    Ok(rows)
}

fn append_rows(
    tensor: &RawTensor,
    layout: OutputLayout,
    order: OutputOrder,
    rows: &mut Vec<Vec<f32>>,
) -> Result<(), DetectionError> {
    if tensor.data.is_empty() {
        return Ok(());
    }
    let expected: usize = tensor.shape.iter().product();
    if expected != tensor.data.len() {
        return Err(DetectionError::Output(format!(
            "shape {:?} needs {} values, tensor holds {}",
            tensor.shape,
            expected,
            tensor.data.len()
        )));
    }

    let mut shape: Vec<usize> = tensor.shape.clone();
    while shape.len() > 3 && shape[0] == 1 {
        shape.remove(0);
    }

    let min_row = layout.min_row_len();
    match shape.as_slice() {
        [n, c] => {
            rows.extend(tensor.data.chunks(*c).take(*n).map(<[f32]>::to_vec));
            Ok(())
        }
        [1, a, b] if order == OutputOrder::ChannelsFirst || (*b < min_row && *a >= min_row) => {
            // a values per box, b boxes
            let (channels, boxes) = (*a, *b);
            for col in 0..boxes {
                rows.push(
                    (0..channels)
                        .map(|ch| tensor.data[ch * boxes + col])
                        .collect(),
                );
            }
            Ok(())
        }
        [1, n, c] => {
            rows.extend(tensor.data.chunks(*c).take(*n).map(<[f32]>::to_vec));
            Ok(())
        }
        other => Err(DetectionError::Output(format!(
            "unsupported output shape {:?}",
            other
        ))),
    }
}

/// Threshold rows on the person score and convert them to pixel boxes.
///
/// A row is kept when its class-0 score is strictly greater than `threshold`.
pub(crate) fn person_candidates(
    rows: &[Vec<f32>],
    layout: OutputLayout,
    input_size: (u32, u32),
    frame_size: (u32, u32),
    threshold: f32,
) -> Result<Vec<Detection>, DetectionError> {
    let offset = layout.class_offset();
    let (frame_w, frame_h) = (frame_size.0 as f32, frame_size.1 as f32);
    let (in_w, in_h) = (input_size.0.max(1) as f32, input_size.1.max(1) as f32);

    let mut out = Vec::new();
    for row in rows {
        let Some(&score) = row.get(offset + PERSON_CLASS) else {
            return Err(DetectionError::Output(format!(
                "row of {} values has no class-{} score",
                row.len(),
                PERSON_CLASS
            )));
        };
        if !score.is_finite() || score <= threshold {
            continue;
        }

        let (mut cx, mut cy, mut w, mut h) = (row[0], row[1], row[2], row[3]);
        if layout == OutputLayout::Anchorless {
            cx /= in_w;
            cy /= in_h;
            w /= in_w;
            h /= in_h;
        }
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }

        let box_w = (w * frame_w).max(0.0);
        let box_h = (h * frame_h).max(0.0);
        let x = (cx * frame_w - box_w / 2.0).max(0.0);
        let y = (cy * frame_h - box_h / 2.0).max(0.0);
        out.push(Detection::new(
            BoundingBox::new(x as u32, y as u32, box_w as u32, box_h as u32),
            score.clamp(0.0, 1.0),
        ));
    }
    Ok(out)
}
