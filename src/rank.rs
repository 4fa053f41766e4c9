//! Per-image label quality scores and ranking.

use std::fmt;
use std::str::FromStr;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{AggregationWeights, ScoreParamOverrides, ScoreParams, TINY_VALUE};
use crate::error::{AuditError, Result};
use crate::inputs::{auxiliary_inputs, prune_by_threshold, AuxiliaryInputs};
use crate::models::{Annotation, Prediction};
use crate::scorers::{badloc_scores_for_image, overlooked_scores_for_image, swap_scores_for_image};
use crate::soft::image_score_from_box_scores;

/// Default cutoff of [`issues_from_scores`].
pub const DEFAULT_ISSUE_THRESHOLD: f64 = 0.1;

/// Supported ways of scoring an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Combine the overlooked, badloc and swap sub-scores.
    Subtype,
}

impl FromStr for ScoringMethod {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "subtype" => Ok(ScoringMethod::Subtype),
            other => Err(AuditError::InvalidConfig(format!(
                "unknown scoring method '{}', expected 'subtype'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringMethod::Subtype => write!(f, "subtype"),
        }
    }
}

/// Validated aggregation weights, falling back to the built-in defaults.
pub fn get_aggregation_weights(weights: Option<AggregationWeights>) -> Result<AggregationWeights> {
    match weights {
        Some(w) => {
            w.validate()?;
            Ok(w)
        }
        None => Ok(AggregationWeights::default()),
    }
}

/// Everything computed for one image by [`score_one_image`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageScores {
    pub overlooked_box_scores: Vec<f64>,
    pub badloc_box_scores: Vec<f64>,
    pub swap_box_scores: Vec<f64>,
    pub overlooked: f64,
    pub badloc: f64,
    pub swap: f64,
    /// Weighted geometric combination of the three pooled sub-scores.
    pub score: f64,
}

/// `exp(sum_t w_t * ln(TINY_VALUE + s_t))` over the three sub-scores.
pub fn combine_sub_scores(weights: &AggregationWeights, overlooked: f64, badloc: f64, swap: f64) -> f64 {
    let log_sum = weights.overlooked * (TINY_VALUE + overlooked).ln()
        + weights.badloc * (TINY_VALUE + badloc).ln()
        + weights.swap * (TINY_VALUE + swap).ln();
    log_sum.exp()
}

/// Score a single image. Pure, so images can be scored in any order.
pub fn score_one_image(
    aux: &AuxiliaryInputs,
    params: &ScoreParams,
    weights: &AggregationWeights,
    overlapping_label_check: bool,
) -> ImageScores {
    let overlooked_box_scores = overlooked_scores_for_image(aux, params.high_probability_threshold);
    let badloc_box_scores = badloc_scores_for_image(aux, params.low_probability_threshold);
    let swap_box_scores =
        swap_scores_for_image(aux, params.high_probability_threshold, overlapping_label_check);

    let overlooked = image_score_from_box_scores(&overlooked_box_scores, params.temperature);
    let badloc = image_score_from_box_scores(&badloc_box_scores, params.temperature);
    let swap = image_score_from_box_scores(&swap_box_scores, params.temperature);

    ImageScores {
        overlooked_box_scores,
        badloc_box_scores,
        swap_box_scores,
        overlooked,
        badloc,
        swap,
        score: combine_sub_scores(weights, overlooked, badloc, swap),
    }
}

/// Score every image in parallel.
pub fn score_images(
    aux: &[AuxiliaryInputs],
    params: &ScoreParams,
    weights: &AggregationWeights,
    overlapping_label_check: bool,
) -> Vec<ImageScores> {
    aux.par_iter()
        .map(|a| score_one_image(a, params, weights, overlapping_label_check))
        .collect()
}

/// Options shared by the scoring entry points.
#[derive(Debug, Clone)]
pub struct ScoringOptions {
    pub method: String,
    pub aggregation_weights: Option<AggregationWeights>,
    pub overlapping_label_check: bool,
    pub verbose: bool,
    pub params: ScoreParamOverrides,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            method: ScoringMethod::Subtype.to_string(),
            aggregation_weights: None,
            overlapping_label_check: true,
            verbose: true,
            params: ScoreParamOverrides::default(),
        }
    }
}

/// Score every image, optionally pruning predictions below `threshold` first.
///
/// Fails with [`AuditError::InvalidConfig`] for an unknown method or invalid
/// weights.
pub fn compute_label_quality_scores(
    annotations: &[Annotation],
    predictions: &[Prediction],
    options: &ScoringOptions,
    threshold: Option<f64>,
) -> Result<Vec<ImageScores>> {
    compute_label_quality_scores_with_progress(annotations, predictions, options, threshold, || {})
}

/// [`compute_label_quality_scores`], calling `on_image` after each image is
/// scored. `on_image` runs on the worker threads.
pub fn compute_label_quality_scores_with_progress<F>(
    annotations: &[Annotation],
    predictions: &[Prediction],
    options: &ScoringOptions,
    threshold: Option<f64>,
    on_image: F,
) -> Result<Vec<ImageScores>>
where
    F: Fn() + Sync,
{
    let method: ScoringMethod = options.method.parse()?;
    let weights = get_aggregation_weights(options.aggregation_weights)?;
    let params = ScoreParams::resolve(options.params);

    let pruned;
    let predictions = match threshold {
        Some(t) => {
            pruned = prune_by_threshold(predictions, t, options.verbose)?;
            &pruned[..]
        }
        None => predictions,
    };

    debug!(
        "Scoring {} images with method={} params={:?}",
        annotations.len(),
        method,
        params
    );
    let aux = auxiliary_inputs(params.alpha, annotations, predictions)?;
    let scores: Vec<ImageScores> = match method {
        ScoringMethod::Subtype => aux
            .par_iter()
            .map(|a| {
                let s = score_one_image(a, &params, &weights, options.overlapping_label_check);
                on_image();
                s
            })
            .collect(),
    };

    if options.verbose {
        info!("Scored {} images", scores.len());
    }
    Ok(scores)
}

/// One label quality score in `[0, 1]` per image. Lower means more likely to
/// contain an annotation error.
pub fn get_label_quality_scores(
    annotations: &[Annotation],
    predictions: &[Prediction],
    options: &ScoringOptions,
) -> Result<Vec<f64>> {
    Ok(compute_label_quality_scores(annotations, predictions, options, None)?
        .into_iter()
        .map(|s| s.score)
        .collect())
}

/// Indices of images scoring below `threshold`, worst first.
///
/// With `threshold == 1.0` every index is returned, giving a full ranking.
pub fn issues_from_scores(scores: &[f64], threshold: f64) -> Result<Vec<usize>> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AuditError::InvalidConfig(format!(
            "issue threshold must be between 0 and 1, got {}",
            threshold
        )));
    }

    let mut indices: Vec<usize> = if threshold == 1.0 {
        (0..scores.len()).collect()
    } else {
        (0..scores.len()).filter(|&i| scores[i] < threshold).collect()
    };
    indices.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CUSTOM_SCORE_WEIGHT_BADLOC, CUSTOM_SCORE_WEIGHT_OVERLOOKED, CUSTOM_SCORE_WEIGHT_SWAP,
    };

    fn image() -> (Annotation, Prediction) {
        (
            Annotation::new(
                vec![[10.0, 10.0, 60.0, 60.0], [200.0, 10.0, 250.0, 60.0]],
                vec![0, 1],
            ),
            Prediction::PerClass(vec![
                vec![[10.0, 10.0, 60.0, 60.0, 0.98]],
                vec![[200.0, 10.0, 250.0, 60.0, 0.97]],
            ]),
        )
    }

    #[test]
    fn test_default_weights() {
        let weights = get_aggregation_weights(None).unwrap();
        assert_eq!(weights.overlooked, CUSTOM_SCORE_WEIGHT_OVERLOOKED);
        assert_eq!(weights.swap, CUSTOM_SCORE_WEIGHT_SWAP);
        assert_eq!(weights.badloc, CUSTOM_SCORE_WEIGHT_BADLOC);

        let bad = AggregationWeights {
            overlooked: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            get_aggregation_weights(Some(bad)),
            Err(AuditError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("subtype".parse::<ScoringMethod>().unwrap(), ScoringMethod::Subtype);
        assert!("fake_method".parse::<ScoringMethod>().is_err());
        assert_eq!(ScoringMethod::Subtype.to_string(), "subtype");
    }

    #[test]
    fn test_unknown_method_is_error() {
        let (a, p) = image();
        let options = ScoringOptions {
            method: "fake_method".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            compute_label_quality_scores(&[a], &[p], &options, None),
            Err(AuditError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_progress_called_once_per_image() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (a, p) = image();
        let annotations = vec![a.clone(), a, Annotation::default()];
        let predictions = vec![p.clone(), p, Prediction::default()];
        let options = ScoringOptions {
            verbose: false,
            ..Default::default()
        };

        let calls = AtomicUsize::new(0);
        let with_progress = compute_label_quality_scores_with_progress(
            &annotations,
            &predictions,
            &options,
            Some(0.5),
            || {
                calls.fetch_add(1, Ordering::Relaxed);
            },
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(
            with_progress,
            compute_label_quality_scores(&annotations, &predictions, &options, Some(0.5)).unwrap()
        );
    }

    #[test]
    fn test_combine_sub_scores() {
        let weights = AggregationWeights::default();
        assert!((combine_sub_scores(&weights, 1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
        assert!(combine_sub_scores(&weights, 0.0, 1.0, 1.0) < 1e-30);

        // Only the weighted sub-score matters
        let swap_only = AggregationWeights {
            overlooked: 0.0,
            swap: 1.0,
            badloc: 0.0,
        };
        assert!((combine_sub_scores(&swap_only, 0.0, 0.0, 0.4) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_image_scores_high() {
        let (a, p) = image();
        let scores = get_label_quality_scores(&[a], &[p], &ScoringOptions::default()).unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0] > 0.9 && scores[0] <= 1.0 + 1e-12);
    }

    #[test]
    fn test_empty_image_scores_one() {
        let scores = get_label_quality_scores(
            &[Annotation::default()],
            &[Prediction::default()],
            &ScoringOptions::default(),
        )
        .unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_issues_from_scores() {
        let scores = [0.4, 0.05, 0.9, 0.01, 0.05];
        assert_eq!(issues_from_scores(&scores, 1.0).unwrap(), vec![3, 1, 4, 0, 2]);
        assert_eq!(issues_from_scores(&scores, 0.1).unwrap(), vec![3, 1, 4]);
        assert_eq!(
            issues_from_scores(&scores, DEFAULT_ISSUE_THRESHOLD).unwrap(),
            vec![3, 1, 4]
        );
        assert!(issues_from_scores(&scores, 0.0).unwrap().is_empty());
        assert!(issues_from_scores(&scores, 1.5).is_err());
    }
}
