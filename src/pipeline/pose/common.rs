use std::cmp::Ordering;

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Detections, Frame, Keypoint, Landmark, Person};

pub const INPUT_SIZE: u32 = 640;
const KEYPOINT_DIM: usize = 3;
const BOX_FEATURES: usize = 4;
const LETTERBOX_FILL: u8 = 114;

#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Maps a point from model input space back onto the source frame.
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        (
            ((x - self.pad_x) / self.scale).clamp(0.0, self.orig_w as f32),
            ((y - self.pad_y) / self.scale).clamp(0.0, self.orig_h as f32),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodeConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Keypoints whose visibility falls below this are reported as `(0, 0)`.
    pub keypoint_threshold: f32,
    pub max_detections: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            keypoint_threshold: 0.5,
            max_detections: 300,
        }
    }
}

/// Letterboxes an RGBA frame into a `[1, 3, size, size]` tensor in `[0, 1]`.
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len || expected_len == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target_size);

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let pad_x = (side - new_w as usize) / 2;
    let pad_y = (side - new_h as usize) / 2;
    let mut canvas = vec![LETTERBOX_FILL; side * side * 4];
    let dst_stride = side * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let plane = side * side;
    let mut planar = vec![0f32; plane * 3];
    let (red, rest) = planar.split_at_mut(plane);
    let (green, blue) = rest.split_at_mut(plane);
    red.par_iter_mut()
        .zip(green.par_iter_mut())
        .zip(blue.par_iter_mut())
        .zip(canvas.par_chunks_exact(4))
        .for_each(|(((r, g), b), px)| {
            *r = px[0] as f32 / 255.0;
            *g = px[1] as f32 / 255.0;
            *b = px[2] as f32 / 255.0;
        });

    let input = Array4::<f32>::from_shape_vec((1, 3, side, side), planar)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

struct Candidate {
    bbox: [f32; 4],
    score: f32,
    keypoints: Vec<Keypoint>,
}

/// Decodes a YOLO pose head. Accepts `[1, features, preds]` and
/// `[1, preds, features]`, where features = 4 box + classes + 17 * 3.
pub fn decode_pose_output(
    output: &[f32],
    shape: &[usize],
    letterbox: &LetterboxInfo,
    cfg: &DecodeConfig,
) -> Result<Detections> {
    let min_features = BOX_FEATURES + 1 + Landmark::COUNT * KEYPOINT_DIM;
    let (a, b) = match shape {
        [1, a, b] => (*a, *b),
        [a, b] => (*a, *b),
        _ => return Err(anyhow!("unexpected pose output shape {shape:?}")),
    };
    let (features, preds, features_first) = if a >= min_features && (b < min_features || a <= b)
    {
        (a, b, true)
    } else if b >= min_features {
        (b, a, false)
    } else {
        return Err(anyhow!(
            "pose output shape {shape:?} has no axis with at least {min_features} features"
        ));
    };
    if output.len() < features * preds {
        return Err(anyhow!(
            "pose output too short: got {}, expected {}",
            output.len(),
            features * preds
        ));
    }

    let at = |pred: usize, feature: usize| -> f32 {
        if features_first {
            output[feature * preds + pred]
        } else {
            output[pred * features + feature]
        }
    };

    let num_classes = features - BOX_FEATURES - Landmark::COUNT * KEYPOINT_DIM;
    let kpt_start = BOX_FEATURES + num_classes;

    let mut candidates = Vec::new();
    for pred in 0..preds {
        let score = (0..num_classes)
            .map(|c| at(pred, BOX_FEATURES + c))
            .map(|s| if s.is_nan() { 0.0 } else { s })
            .fold(0.0f32, f32::max);
        if score < cfg.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(pred, 0), at(pred, 1), at(pred, 2), at(pred, 3));
        let (x1, y1) = letterbox.unproject(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unproject(cx + w / 2.0, cy + h / 2.0);

        let keypoints = (0..Landmark::COUNT)
            .map(|k| {
                let offset = kpt_start + k * KEYPOINT_DIM;
                let visibility = at(pred, offset + 2);
                if !(visibility >= cfg.keypoint_threshold) {
                    return Keypoint::MISSING;
                }
                let (x, y) = letterbox.unproject(at(pred, offset), at(pred, offset + 1));
                Keypoint::new(x, y)
            })
            .collect();

        candidates.push(Candidate {
            bbox: [x1, y1, x2, y2],
            score,
            keypoints,
        });
    }

    let boxes: Vec<([f32; 4], f32)> = candidates.iter().map(|c| (c.bbox, c.score)).collect();
    let keep = nms(&boxes, cfg.iou_threshold);

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let persons = keep
        .into_iter()
        .take(cfg.max_detections)
        .filter_map(|idx| slots[idx].take())
        .map(|c| Person::new(c.keypoints))
        .collect();

    Ok(Detections::new(persons))
}

/// Greedy NMS; kept indices come back in descending score order.
pub fn nms(boxes: &[([f32; 4], f32)], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .1
            .partial_cmp(&boxes[a].1)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && iou(&boxes[i].0, &boxes[j].0) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
