//! Box geometry: IoU, center distance and the combined similarity used for matching.

use ndarray::Array2;

use crate::config::EUC_FACTOR;
use crate::models::BoxXyxy;

/// Convert an `x1, y1, x2, y2` box to center/width/height form `cx, cy, w, h`.
///
/// Returns `None` when the slice does not hold exactly four coordinates, which
/// usually means a probability was left attached to a predicted box.
pub fn bbox_xyxy_to_xywh(bbox: &[f64]) -> Option<[f64; 4]> {
    match bbox {
        &[x1, y1, x2, y2] => {
            let w = x2 - x1;
            let h = y2 - y1;
            Some([x1 + w / 2.0, y1 + h / 2.0, w, h])
        }
        _ => None,
    }
}

/// Area of an `x1, y1, x2, y2` box; negative when the corners are flipped.
fn area(bbox: &BoxXyxy) -> f64 {
    (bbox[2] - bbox[0]) * (bbox[3] - bbox[1])
}

/// Midpoint of a box.
fn center(bbox: &BoxXyxy) -> (f64, f64) {
    ((bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0)
}

/// Intersection over union of two boxes.
pub fn overlap(bb1: &BoxXyxy, bb2: &BoxXyxy) -> f64 {
    let x_left = bb1[0].max(bb2[0]);
    let y_top = bb1[1].max(bb2[1]);
    let x_right = bb1[2].min(bb2[2]);
    let y_bottom = bb1[3].min(bb2[3]);

    if x_right < x_left || y_bottom < y_top {
        return 0.0;
    }

    let intersection = (x_right - x_left) * (y_bottom - y_top);
    let union = area(bb1) + area(bb2) - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Center-distance similarity `exp(-EUC_FACTOR * d)` where `d` is the
/// Euclidean distance between box centers in pixels.
pub fn center_similarity(bb1: &BoxXyxy, bb2: &BoxXyxy) -> f64 {
    let (x1, y1) = center(bb1);
    let (x2, y2) = center(bb2);
    let distance = ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt();
    (-distance * EUC_FACTOR).exp()
}

/// IoU between every box of `a` (rows) and every box of `b` (columns).
pub fn overlap_matrix(a: &[BoxXyxy], b: &[BoxXyxy]) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| overlap(&a[i], &b[j]))
}

/// Center-distance similarity between every box of `a` and every box of `b`.
///
/// Equal to `1 - normalized_distance` with
/// `normalized_distance = 1 - exp(-EUC_FACTOR * d)`.
pub fn dist_matrix(a: &[BoxXyxy], b: &[BoxXyxy]) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| {
        center_similarity(&a[i], &b[j])
    })
}

/// Blend an IoU matrix and a distance similarity matrix with weight `alpha`.
pub fn combine_similarity(iou: &Array2<f64>, dist: &Array2<f64>, alpha: f64) -> Array2<f64> {
    iou * alpha + dist * (1.0 - alpha)
}

/// `alpha * IoU + (1 - alpha) * center similarity` for every pair of boxes.
pub fn similarity_matrix(a: &[BoxXyxy], b: &[BoxXyxy], alpha: f64) -> Array2<f64> {
    combine_similarity(&overlap_matrix(a, b), &dist_matrix(a, b), alpha)
}
