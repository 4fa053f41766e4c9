//! Per-box scorers for the three annotation error types.
//!
//! Every scorer returns one array per image. Overlooked scores are indexed by
//! predicted box, badloc and swap scores by annotated box. Lower means more
//! likely to be an annotation error.

use std::borrow::Cow;

use rayon::prelude::*;

use crate::config::{ScoreParams, OVERLAPPING_ANNOTATION_IOU};
use crate::error::{AuditError, Result};
use crate::geometry::overlap_matrix;
use crate::inputs::{auxiliary_inputs, AuxiliaryInputs};
use crate::models::{Annotation, BoxXyxy, Prediction};

/// Data a scorer works from: raw inputs, or bundles built beforehand with
/// [`auxiliary_inputs`] so several scorers can share them.
#[derive(Debug, Clone, Copy)]
pub enum ScoreInputs<'a> {
    Raw {
        annotations: &'a [Annotation],
        predictions: &'a [Prediction],
    },
    Precomputed(&'a [AuxiliaryInputs]),
}

impl<'a> ScoreInputs<'a> {
    /// Accept exactly one of the two input forms.
    pub fn from_parts(
        raw: Option<(&'a [Annotation], &'a [Prediction])>,
        precomputed: Option<&'a [AuxiliaryInputs]>,
    ) -> Result<Self> {
        match (raw, precomputed) {
            (Some((annotations, predictions)), None) => Ok(ScoreInputs::Raw {
                annotations,
                predictions,
            }),
            (None, Some(aux)) => Ok(ScoreInputs::Precomputed(aux)),
            (Some(_), Some(_)) => Err(AuditError::InvalidConfig(
                "pass either annotations and predictions or auxiliary inputs, not both"
                    .to_string(),
            )),
            (None, None) => Err(AuditError::MissingInputs(
                "annotations and predictions or auxiliary inputs are required".to_string(),
            )),
        }
    }

    fn resolve(self, alpha: f64) -> Result<Cow<'a, [AuxiliaryInputs]>> {
        match self {
            ScoreInputs::Raw {
                annotations,
                predictions,
            } => Ok(Cow::Owned(auxiliary_inputs(alpha, annotations, predictions)?)),
            ScoreInputs::Precomputed(aux) => Ok(Cow::Borrowed(aux)),
        }
    }
}

/// Best similarity in `values`, or `None` when there is no candidate.
fn best(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

/// Overlooked scores for the predicted boxes of one image.
///
/// A confident prediction is scored by its best similarity to an annotation of
/// the same class. Without any annotation of that class the score collapses to
/// `min_possible_similarity * (1 - prob)`. Predictions below
/// `high_probability_threshold` are not judged and score NaN.
pub fn overlooked_scores_for_image(aux: &AuxiliaryInputs, high_probability_threshold: f64) -> Vec<f64> {
    aux.pred_labels
        .iter()
        .zip(&aux.pred_label_probs)
        .enumerate()
        .map(|(j, (&k, &prob))| {
            if prob < high_probability_threshold {
                return f64::NAN;
            }
            let same_class = aux
                .lab_labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == k)
                .map(|(i, _)| aux.similarity_matrix[[i, j]]);
            best(same_class).unwrap_or(aux.min_possible_similarity * (1.0 - prob))
        })
        .collect()
}

/// Badly-located scores for the annotated boxes of one image.
///
/// Each annotation is scored by its best similarity to a same-class prediction
/// with probability above `low_probability_threshold`, or `1.0` if none exists.
pub fn badloc_scores_for_image(aux: &AuxiliaryInputs, low_probability_threshold: f64) -> Vec<f64> {
    if low_probability_threshold >= 1.0 {
        return vec![1.0; aux.lab_labels.len()];
    }
    aux.lab_labels
        .iter()
        .enumerate()
        .map(|(i, &k)| {
            let candidates = aux
                .pred_labels
                .iter()
                .zip(&aux.pred_label_probs)
                .enumerate()
                .filter(|(_, (&label, &prob))| label == k && prob > low_probability_threshold)
                .map(|(j, _)| aux.similarity_matrix[[i, j]]);
            best(candidates).unwrap_or(1.0)
        })
        .collect()
}

/// Swapped-label scores for the annotated boxes of one image.
///
/// An annotation that closely matches a confident prediction of another class
/// scores `1 - similarity`, floored at `min_possible_similarity`. With
/// `overlapping_label_check`, annotations sitting on top of a different-class
/// annotation score `0.0`.
pub fn swap_scores_for_image(
    aux: &AuxiliaryInputs,
    high_probability_threshold: f64,
    overlapping_label_check: bool,
) -> Vec<f64> {
    let mut scores: Vec<f64> = aux
        .lab_labels
        .iter()
        .enumerate()
        .map(|(i, &k)| {
            let candidates = aux
                .pred_labels
                .iter()
                .zip(&aux.pred_label_probs)
                .enumerate()
                .filter(|(_, (&label, &prob))| label != k && prob > high_probability_threshold)
                .map(|(j, _)| aux.similarity_matrix[[i, j]]);
            match best(candidates) {
                Some(similarity) => aux.min_possible_similarity.max(1.0 - similarity),
                None => 1.0,
            }
        })
        .collect();

    if overlapping_label_check {
        for (score, overlapping) in scores
            .iter_mut()
            .zip(has_overlap(&aux.lab_bboxes, &aux.lab_labels))
        {
            if overlapping {
                *score = 0.0;
            }
        }
    }
    scores
}

/// For each box, whether it overlaps a box of a different class by more than
/// [`OVERLAPPING_ANNOTATION_IOU`].
pub fn has_overlap(bboxes: &[BoxXyxy], labels: &[usize]) -> Vec<bool> {
    let iou = overlap_matrix(bboxes, bboxes);
    (0..bboxes.len())
        .map(|i| {
            (0..bboxes.len())
                .any(|j| j != i && labels[i] != labels[j] && iou[[i, j]] > OVERLAPPING_ANNOTATION_IOU)
        })
        .collect()
}

pub fn compute_overlooked_box_scores(
    inputs: ScoreInputs<'_>,
    params: &ScoreParams,
) -> Result<Vec<Vec<f64>>> {
    let aux = inputs.resolve(params.alpha)?;
    Ok(aux
        .par_iter()
        .map(|a| overlooked_scores_for_image(a, params.high_probability_threshold))
        .collect())
}

pub fn compute_badloc_box_scores(
    inputs: ScoreInputs<'_>,
    params: &ScoreParams,
) -> Result<Vec<Vec<f64>>> {
    let aux = inputs.resolve(params.alpha)?;
    Ok(aux
        .par_iter()
        .map(|a| badloc_scores_for_image(a, params.low_probability_threshold))
        .collect())
}

pub fn compute_swap_box_scores(
    inputs: ScoreInputs<'_>,
    params: &ScoreParams,
    overlapping_label_check: bool,
) -> Result<Vec<Vec<f64>>> {
    let aux = inputs.resolve(params.alpha)?;
    Ok(aux
        .par_iter()
        .map(|a| {
            swap_scores_for_image(a, params.high_probability_threshold, overlapping_label_check)
        })
        .collect())
}
