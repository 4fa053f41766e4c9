//! Per-class average precision, used as the per-class issue threshold.
//!
//! Predictions are matched greedily in confidence order at each IoU threshold
//! from 0.50 to 0.95 in steps of 0.05. AP is the all-point interpolated area
//! under the precision/recall curve, averaged over the IoU thresholds.

use rayon::prelude::*;

use crate::config::AP_SCALE_FACTOR;
use crate::error::Result;
use crate::geometry::overlap;
use crate::inputs::{check_same_length, to_class_nested};
use crate::models::{Annotation, Prediction, ScoredBox};

/// IoU thresholds `0.50, 0.55, ..., 0.95`.
pub fn iou_thresholds() -> Vec<f64> {
    (0..10).map(|i| 0.5 + 0.05 * i as f64).collect()
}

/// Mark each predicted box of one class in one image as a true positive.
///
/// Boxes are visited by descending probability. A box is a true positive when
/// its best-overlapping annotation reaches `iou_threshold` and has not already
/// been claimed by a more confident box. The result is in input order.
pub fn tpfp(pred_boxes: &[ScoredBox], gt_boxes: &[[f64; 4]], iou_threshold: f64) -> Vec<bool> {
    let mut is_tp = vec![false; pred_boxes.len()];
    if gt_boxes.is_empty() {
        return is_tp;
    }

    let mut order: Vec<usize> = (0..pred_boxes.len()).collect();
    order.sort_by(|&a, &b| pred_boxes[b][4].total_cmp(&pred_boxes[a][4]));

    let mut covered = vec![false; gt_boxes.len()];
    for j in order {
        let b = &pred_boxes[j];
        let pred = [b[0], b[1], b[2], b[3]];
        let (best_gt, best_iou) = gt_boxes
            .iter()
            .map(|gt| overlap(&pred, gt))
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        if best_iou >= iou_threshold && !covered[best_gt] {
            covered[best_gt] = true;
            is_tp[j] = true;
        }
    }
    is_tp
}

/// Area under the precision envelope of a precision/recall curve.
///
/// `recalls` must be non-decreasing. The curve is padded with `(0, 0)` at the
/// start and `(1, 0)` at the end before the envelope is taken.
pub fn average_precision(recalls: &[f64], precisions: &[f64]) -> f64 {
    let mut mrec = Vec::with_capacity(recalls.len() + 2);
    mrec.push(0.0);
    mrec.extend_from_slice(recalls);
    mrec.push(1.0);

    let mut mpre = Vec::with_capacity(precisions.len() + 2);
    mpre.push(0.0);
    mpre.extend_from_slice(precisions);
    mpre.push(0.0);

    for i in (0..mpre.len() - 1).rev() {
        mpre[i] = mpre[i].max(mpre[i + 1]);
    }

    (0..mrec.len() - 1)
        .filter(|&i| mrec[i + 1] != mrec[i])
        .map(|i| (mrec[i + 1] - mrec[i]) * mpre[i + 1])
        .sum()
}

/// AP of one class at one IoU threshold from per-box `(probability, is_tp)`
/// pairs gathered over every image.
fn class_ap(mut scored: Vec<(f64, bool)>, num_gts: usize) -> f64 {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let eps = f64::from(f32::EPSILON);

    let mut tp = 0.0_f64;
    let mut fp = 0.0_f64;
    let mut recalls = Vec::with_capacity(scored.len());
    let mut precisions = Vec::with_capacity(scored.len());
    for (_, is_tp) in scored {
        if is_tp {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        recalls.push(tp / (num_gts as f64).max(eps));
        precisions.push(tp / (tp + fp).max(eps));
    }
    average_precision(&recalls, &precisions)
}

/// Average precision of every class, averaged over [`iou_thresholds`].
///
/// The number of classes is the larger of the longest class-nested prediction
/// and the largest annotated label plus one.
pub fn per_class_ap(annotations: &[Annotation], predictions: &[Prediction]) -> Result<Vec<f64>> {
    check_same_length(annotations.len(), predictions.len())?;
    let nested = predictions
        .iter()
        .map(to_class_nested)
        .collect::<Result<Vec<_>>>()?;

    let num_classes = nested
        .iter()
        .map(Vec::len)
        .chain(
            annotations
                .iter()
                .flat_map(|a| a.labels.iter().map(|&label| label + 1)),
        )
        .max()
        .unwrap_or(0);

    let thresholds = iou_thresholds();
    let mut aps = Vec::with_capacity(num_classes);
    for class_id in 0..num_classes {
        let per_image: Vec<(&[ScoredBox], Vec<[f64; 4]>)> = annotations
            .iter()
            .zip(&nested)
            .map(|(annotation, classes)| {
                let preds = classes.get(class_id).map_or(&[][..], Vec::as_slice);
                let gts = annotation
                    .bboxes
                    .iter()
                    .zip(&annotation.labels)
                    .filter(|(_, &label)| label == class_id)
                    .map(|(b, _)| *b)
                    .collect();
                (preds, gts)
            })
            .collect();
        let num_gts: usize = per_image.iter().map(|(_, gts)| gts.len()).sum();

        let ap_sum: f64 = thresholds
            .iter()
            .map(|&iou_threshold| {
                let scored: Vec<(f64, bool)> = per_image
                    .par_iter()
                    .flat_map_iter(|(preds, gts)| {
                        let flags = tpfp(preds, gts, iou_threshold);
                        preds.iter().map(|b| b[4]).zip(flags).collect::<Vec<_>>()
                    })
                    .collect();
                class_ap(scored, num_gts)
            })
            .sum();
        aps.push(ap_sum / thresholds.len() as f64 * AP_SCALE_FACTOR);
    }
    Ok(aps)
}

/// Look up the threshold of every box from its class.
///
/// Classes beyond the end of `per_class` get a threshold of `0.0`, which can
/// never flag a box.
pub fn thresholds_per_box(class_lists: &[Vec<usize>], per_class: &[f64]) -> Vec<Vec<f64>> {
    class_lists
        .iter()
        .map(|labels| {
            labels
                .iter()
                .map(|&k| per_class.get(k).copied().unwrap_or(0.0))
                .collect()
        })
        .collect()
}
