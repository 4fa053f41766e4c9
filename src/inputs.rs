//! Input normalization: separating annotations and predictions into parallel
//! arrays and precomputing the per-image matching data shared by all scorers.

use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::MAX_ALLOWED_BOX_PRUNE;
use crate::error::{AuditError, Result};
use crate::geometry::{combine_similarity, dist_matrix, overlap_matrix};
use crate::models::{Annotation, BoxXyxy, Prediction, PredictionType, ScoredBox};

/// Predicted boxes of one image flattened into parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeparatedPrediction {
    pub bboxes: Vec<BoxXyxy>,
    pub labels: Vec<usize>,
    pub probs: Vec<f64>,
}

/// Everything the three scorers need for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryInputs {
    pub lab_bboxes: Vec<BoxXyxy>,
    pub lab_labels: Vec<usize>,
    pub pred_bboxes: Vec<BoxXyxy>,
    pub pred_labels: Vec<usize>,
    pub pred_label_probs: Vec<f64>,
    /// Rows are annotated boxes, columns predicted boxes.
    pub iou_matrix: Array2<f64>,
    pub similarity_matrix: Array2<f64>,
    /// Smallest non-zero similarity over the whole dataset, `1.0` when there
    /// is none. Floors the swap score and scales unmatched overlooked boxes.
    pub min_possible_similarity: f64,
}

pub fn separate_label(annotation: &Annotation) -> (&[BoxXyxy], &[usize]) {
    (&annotation.bboxes, &annotation.labels)
}

pub fn prediction_type(prediction: &Prediction) -> PredictionType {
    match prediction {
        Prediction::PerClass(_) => PredictionType::MaxPred,
        Prediction::AllPred { .. } => PredictionType::AllPred,
    }
}

/// Flatten a prediction into boxes, labels and the probability of each box's label.
///
/// Class-nested predictions are read class by class, in box order.
pub fn separate_prediction(prediction: &Prediction) -> Result<SeparatedPrediction> {
    let mut separated = SeparatedPrediction::default();
    match prediction {
        Prediction::PerClass(classes) => {
            for (class_id, boxes) in classes.iter().enumerate() {
                for b in boxes {
                    separated.bboxes.push([b[0], b[1], b[2], b[3]]);
                    separated.labels.push(class_id);
                    separated.probs.push(b[4]);
                }
            }
        }
        Prediction::AllPred {
            boxes,
            labels,
            pred_probs,
        } => {
            check_all_pred(boxes, labels, pred_probs)?;
            separated.bboxes = boxes.clone();
            separated.labels = labels.clone();
            separated.probs = labels
                .iter()
                .zip(pred_probs)
                .map(|(&label, probs)| probs[label])
                .collect();
        }
    }
    Ok(separated)
}

fn check_all_pred(boxes: &[BoxXyxy], labels: &[usize], pred_probs: &[Vec<f64>]) -> Result<()> {
    if boxes.len() != labels.len() || labels.len() != pred_probs.len() {
        return Err(AuditError::InvalidPrediction(format!(
            "{} boxes, {} labels and {} probability rows",
            boxes.len(),
            labels.len(),
            pred_probs.len()
        )));
    }
    for (i, (&label, probs)) in labels.iter().zip(pred_probs).enumerate() {
        if label >= probs.len() {
            return Err(AuditError::InvalidPrediction(format!(
                "box {} has label {} but only {} class probabilities",
                i,
                label,
                probs.len()
            )));
        }
    }
    Ok(())
}

/// Class-nested boxes of a prediction, converting the flat layout if needed.
pub fn to_class_nested(prediction: &Prediction) -> Result<Vec<Vec<ScoredBox>>> {
    match prediction {
        Prediction::PerClass(classes) => Ok(classes.clone()),
        Prediction::AllPred {
            boxes,
            labels,
            pred_probs,
        } => {
            check_all_pred(boxes, labels, pred_probs)?;
            let num_classes = pred_probs.iter().map(Vec::len).max().unwrap_or(0);
            let mut classes = vec![Vec::new(); num_classes];
            for ((b, &label), probs) in boxes.iter().zip(labels).zip(pred_probs) {
                classes[label].push([b[0], b[1], b[2], b[3], probs[label]]);
            }
            Ok(classes)
        }
    }
}

fn min_nonzero_similarity(similarity_matrix: &Array2<f64>) -> f64 {
    similarity_matrix
        .iter()
        .copied()
        .filter(|&s| s != 0.0)
        .fold(1.0, f64::min)
}

/// Build the auxiliary bundle of one image.
///
/// `min_possible_similarity` is dataset-scoped: pass the floor returned by
/// [`dataset_min_similarity`], or `None` to use this image's own smallest
/// non-zero similarity.
pub fn auxiliary_inputs_for_image(
    alpha: f64,
    annotation: &Annotation,
    prediction: &Prediction,
    min_possible_similarity: Option<f64>,
) -> Result<AuxiliaryInputs> {
    annotation.validate()?;
    let (lab_bboxes, lab_labels) = separate_label(annotation);
    let pred = separate_prediction(prediction)?;

    let iou_matrix = overlap_matrix(lab_bboxes, &pred.bboxes);
    let similarity_matrix =
        combine_similarity(&iou_matrix, &dist_matrix(lab_bboxes, &pred.bboxes), alpha);
    let min_possible_similarity =
        min_possible_similarity.unwrap_or_else(|| min_nonzero_similarity(&similarity_matrix));

    Ok(AuxiliaryInputs {
        lab_bboxes: lab_bboxes.to_vec(),
        lab_labels: lab_labels.to_vec(),
        pred_bboxes: pred.bboxes,
        pred_labels: pred.labels,
        pred_label_probs: pred.probs,
        iou_matrix,
        similarity_matrix,
        min_possible_similarity,
    })
}

pub(crate) fn check_same_length(annotations: usize, predictions: usize) -> Result<()> {
    if annotations != predictions {
        return Err(AuditError::LengthMismatch(format!(
            "{} annotations but {} predictions",
            annotations, predictions
        )));
    }
    Ok(())
}

/// Smallest non-zero similarity over every image's bundle, `1.0` if there is none.
///
/// Images without a non-zero similarity do not lower the floor.
pub fn dataset_min_similarity(aux: &[AuxiliaryInputs]) -> f64 {
    aux.par_iter()
        .map(|a| min_nonzero_similarity(&a.similarity_matrix))
        .reduce(|| 1.0, f64::min)
}

/// Build the auxiliary bundle of every image in parallel.
///
/// Every bundle carries the same dataset-wide `min_possible_similarity`.
pub fn auxiliary_inputs(
    alpha: f64,
    annotations: &[Annotation],
    predictions: &[Prediction],
) -> Result<Vec<AuxiliaryInputs>> {
    check_same_length(annotations.len(), predictions.len())?;
    debug!("Building auxiliary inputs for {} images", annotations.len());
    let mut aux = annotations
        .par_iter()
        .zip(predictions.par_iter())
        .map(|(annotation, prediction)| {
            auxiliary_inputs_for_image(alpha, annotation, prediction, None)
        })
        .collect::<Result<Vec<_>>>()?;

    let floor = dataset_min_similarity(&aux);
    debug!("Minimum possible similarity: {}", floor);
    aux.par_iter_mut()
        .for_each(|a| a.min_possible_similarity = floor);
    Ok(aux)
}

/// Lowest predicted probability over every box of every image, `1.0` if there are none.
pub fn min_pred_prob(predictions: &[Prediction]) -> Result<f64> {
    let mut min_prob = 1.0_f64;
    for prediction in predictions {
        for prob in separate_prediction(prediction)?.probs {
            min_prob = min_prob.min(prob);
        }
    }
    Ok(min_prob)
}

/// Drop predicted boxes whose probability is below `threshold`.
///
/// The result is class-nested and keeps one entry per class, so emptied
/// classes remain as empty lists. Warns once when nearly every non-empty
/// class array was emptied.
pub fn prune_by_threshold(
    predictions: &[Prediction],
    threshold: f64,
    verbose: bool,
) -> Result<Vec<Prediction>> {
    let mut total_arrays = 0usize;
    let mut emptied_arrays = 0usize;
    let mut pruned = Vec::with_capacity(predictions.len());

    for prediction in predictions {
        let classes = to_class_nested(prediction)?;
        let mut kept_classes = Vec::with_capacity(classes.len());
        for boxes in classes {
            let kept: Vec<ScoredBox> = boxes.iter().copied().filter(|b| b[4] >= threshold).collect();
            if !boxes.is_empty() {
                total_arrays += 1;
                if kept.is_empty() {
                    emptied_arrays += 1;
                }
            }
            kept_classes.push(kept);
        }
        pruned.push(Prediction::PerClass(kept_classes));
    }

    let fraction_pruned = if total_arrays > 0 {
        emptied_arrays as f64 / total_arrays as f64
    } else {
        0.0
    };
    if fraction_pruned > MAX_ALLOWED_BOX_PRUNE {
        warn!(
            "Pruning with threshold={} empties {:.1}% of the class predictions; consider lowering the threshold",
            threshold,
            fraction_pruned * 100.0
        );
    }
    if verbose {
        info!(
            "Pruned {} of {} class predictions using threshold={}",
            emptied_arrays, total_arrays, threshold
        );
    }
    Ok(pruned)
}
