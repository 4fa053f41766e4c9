//! Issue detection: per-box flags against per-class thresholds, pooled into
//! one flag per image.

use log::debug;

use crate::ap::{per_class_ap, thresholds_per_box};
use crate::config::{AggregationWeights, ScoreParamOverrides, ScoreParams, ThresholdFactors};
use crate::error::Result;
use crate::inputs::{auxiliary_inputs, AuxiliaryInputs};
use crate::models::{Annotation, Prediction};
use crate::rank::{get_aggregation_weights, issues_from_scores, score_images, ScoringMethod};
use crate::scorers::{
    compute_badloc_box_scores, compute_overlooked_box_scores, compute_swap_box_scores, ScoreInputs,
};

/// Flag every box whose score is strictly below `threshold * threshold_factor`.
///
/// NaN scores never flag. An image without boxes yields the single entry
/// `[false]`.
pub fn find_label_issues_per_box(
    scores_per_box: &[Vec<f64>],
    thresholds_per_box: &[Vec<f64>],
    threshold_factor: f64,
) -> Vec<Vec<bool>> {
    scores_per_box
        .iter()
        .zip(thresholds_per_box)
        .map(|(scores, thresholds)| {
            if scores.is_empty() {
                return vec![false];
            }
            scores
                .iter()
                .zip(thresholds)
                .map(|(&score, &threshold)| score < threshold * threshold_factor)
                .collect()
        })
        .collect()
}

/// An image is flagged when any of its boxes is.
pub fn pool_box_scores_per_image(issues_per_box: &[Vec<bool>]) -> Vec<bool> {
    issues_per_box
        .iter()
        .map(|issues| issues.iter().any(|&issue| issue))
        .collect()
}

/// Per-box scores, thresholds and flags for the three issue types.
///
/// Overlooked entries are indexed by predicted box, badloc and swap entries by
/// annotated box.
#[derive(Debug, Clone)]
pub struct BoxIssues {
    pub overlooked_scores: Vec<Vec<f64>>,
    pub badloc_scores: Vec<Vec<f64>>,
    pub swap_scores: Vec<Vec<f64>>,
    pub overlooked_thresholds: Vec<Vec<f64>>,
    pub badloc_thresholds: Vec<Vec<f64>>,
    pub swap_thresholds: Vec<Vec<f64>>,
    pub overlooked_issues: Vec<Vec<bool>>,
    pub badloc_issues: Vec<Vec<bool>>,
    pub swap_issues: Vec<Vec<bool>>,
    pub pred_labels: Vec<Vec<usize>>,
    pub lab_labels: Vec<Vec<usize>>,
}

impl BoxIssues {
    pub fn overlooked_per_image(&self) -> Vec<bool> {
        pool_box_scores_per_image(&self.overlooked_issues)
    }

    pub fn badloc_per_image(&self) -> Vec<bool> {
        pool_box_scores_per_image(&self.badloc_issues)
    }

    pub fn swap_per_image(&self) -> Vec<bool> {
        pool_box_scores_per_image(&self.swap_issues)
    }

    /// Logical OR of the three pooled flags.
    pub fn is_issue(&self) -> Vec<bool> {
        self.overlooked_per_image()
            .into_iter()
            .zip(self.badloc_per_image())
            .zip(self.swap_per_image())
            .map(|((o, b), s)| o || b || s)
            .collect()
    }
}

/// Score every box and compare it with its class threshold.
///
/// `per_class` holds one threshold per class, normally the output of
/// [`per_class_ap`]. Overlooked boxes use their predicted class, the other two
/// types their annotated class.
pub fn detect_box_issues(
    aux: &[AuxiliaryInputs],
    per_class: &[f64],
    params: &ScoreParams,
    factors: &ThresholdFactors,
    overlapping_label_check: bool,
) -> Result<BoxIssues> {
    let inputs = ScoreInputs::Precomputed(aux);
    let overlooked_scores = compute_overlooked_box_scores(inputs, params)?;
    let badloc_scores = compute_badloc_box_scores(inputs, params)?;
    let swap_scores = compute_swap_box_scores(inputs, params, overlapping_label_check)?;

    let pred_labels: Vec<Vec<usize>> = aux.iter().map(|a| a.pred_labels.clone()).collect();
    let lab_labels: Vec<Vec<usize>> = aux.iter().map(|a| a.lab_labels.clone()).collect();
    let overlooked_thresholds = thresholds_per_box(&pred_labels, per_class);
    let badloc_thresholds = thresholds_per_box(&lab_labels, per_class);
    let swap_thresholds = badloc_thresholds.clone();

    let overlooked_issues =
        find_label_issues_per_box(&overlooked_scores, &overlooked_thresholds, factors.overlooked);
    let badloc_issues =
        find_label_issues_per_box(&badloc_scores, &badloc_thresholds, factors.badloc);
    let swap_issues = find_label_issues_per_box(&swap_scores, &swap_thresholds, factors.swap);

    Ok(BoxIssues {
        overlooked_scores,
        badloc_scores,
        swap_scores,
        overlooked_thresholds,
        badloc_thresholds,
        swap_thresholds,
        overlooked_issues,
        badloc_issues,
        swap_issues,
        pred_labels,
        lab_labels,
    })
}

/// Options of [`find_label_issues`].
#[derive(Debug, Clone)]
pub struct FindIssuesOptions {
    pub return_indices_ranked_by_score: bool,
    pub overlapping_label_check: bool,
    pub threshold_factors: ThresholdFactors,
    /// Only used to order ranked indices.
    pub aggregation_weights: Option<AggregationWeights>,
    pub params: ScoreParamOverrides,
}

impl Default for FindIssuesOptions {
    fn default() -> Self {
        Self {
            return_indices_ranked_by_score: false,
            overlapping_label_check: true,
            threshold_factors: ThresholdFactors::default(),
            aggregation_weights: None,
            params: ScoreParamOverrides::default(),
        }
    }
}

/// Result of [`find_label_issues`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelIssues {
    /// One flag per image.
    Mask(Vec<bool>),
    /// Flagged image indices, worst overall score first.
    RankedIndices(Vec<usize>),
}

fn issue_mask(
    aux: &[AuxiliaryInputs],
    annotations: &[Annotation],
    predictions: &[Prediction],
    params: &ScoreParams,
    options: &FindIssuesOptions,
) -> Result<Vec<bool>> {
    let per_class = per_class_ap(annotations, predictions)?;
    debug!("Per-class thresholds: {:?}", per_class);
    let issues = detect_box_issues(
        aux,
        &per_class,
        params,
        &options.threshold_factors,
        options.overlapping_label_check,
    )?;
    Ok(issues.is_issue())
}

/// Flag images likely to contain an overlooked, badly located or swapped
/// annotation.
pub fn find_label_issues(
    annotations: &[Annotation],
    predictions: &[Prediction],
    options: &FindIssuesOptions,
) -> Result<LabelIssues> {
    let params = ScoreParams::resolve(options.params);
    let aux = auxiliary_inputs(params.alpha, annotations, predictions)?;
    let mask = issue_mask(&aux, annotations, predictions, &params, options)?;

    if !options.return_indices_ranked_by_score {
        return Ok(LabelIssues::Mask(mask));
    }

    let weights = get_aggregation_weights(options.aggregation_weights)?;
    let scores: Vec<f64> = score_images(&aux, &params, &weights, options.overlapping_label_check)
        .into_iter()
        .map(|s| s.score)
        .collect();
    let ranked = issues_from_scores(&scores, 1.0)?
        .into_iter()
        .filter(|&i| mask[i])
        .collect();
    Ok(LabelIssues::RankedIndices(ranked))
}

/// Flags per image for the named scoring method: `1` for an issue, `0`
/// otherwise. An unknown method yields `-1` for every image instead of an
/// error.
pub fn find_label_issues_by_method(
    annotations: &[Annotation],
    predictions: &[Prediction],
    scoring_method: &str,
    options: &FindIssuesOptions,
) -> Result<Vec<i8>> {
    match scoring_method.parse::<ScoringMethod>() {
        Ok(ScoringMethod::Subtype) => {
            let params = ScoreParams::resolve(options.params);
            let aux = auxiliary_inputs(params.alpha, annotations, predictions)?;
            let mask = issue_mask(&aux, annotations, predictions, &params, options)?;
            Ok(mask.into_iter().map(i8::from).collect())
        }
        Err(_) => Ok(vec![-1; annotations.len()]),
    }
}
