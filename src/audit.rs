//! Dataset audit: scores, per-box issues and the report model in one pass.

use log::info;

use crate::ap::per_class_ap;
use crate::config::{AuditConfig, ScoreParams};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::filter::{detect_box_issues, BoxIssues};
use crate::inputs::{auxiliary_inputs, prune_by_threshold};
use crate::models::{AuditResult, ImageResult, Issue, IssueType};
use crate::rank::{get_aggregation_weights, score_images, ScoringMethod};

/// Issues of one image and one type, from the per-box flags.
fn collect_issues(
    image_index: usize,
    issue_type: IssueType,
    scores: &[f64],
    thresholds: &[f64],
    flags: &[bool],
    classes: &[usize],
    factor: f64,
) -> Vec<Issue> {
    // `flags` is `[false]` for an image without boxes, so zip stops at the shorter side
    scores
        .iter()
        .zip(thresholds)
        .zip(flags)
        .zip(classes)
        .enumerate()
        .filter(|(_, (((_, _), &flagged), _))| flagged)
        .map(|(box_index, (((&score, &threshold), _), &class_id))| Issue {
            image_index,
            issue_type,
            box_index,
            class_id,
            score,
            threshold: threshold * factor,
        })
        .collect()
}

fn image_issues(
    issues: &BoxIssues,
    position: usize,
    image_index: usize,
    config: &AuditConfig,
) -> Vec<Issue> {
    let factors = &config.threshold_factors;
    let mut found = collect_issues(
        image_index,
        IssueType::Overlooked,
        &issues.overlooked_scores[position],
        &issues.overlooked_thresholds[position],
        &issues.overlooked_issues[position],
        &issues.pred_labels[position],
        factors.overlooked,
    );
    found.extend(collect_issues(
        image_index,
        IssueType::Badloc,
        &issues.badloc_scores[position],
        &issues.badloc_thresholds[position],
        &issues.badloc_issues[position],
        &issues.lab_labels[position],
        factors.badloc,
    ));
    found.extend(collect_issues(
        image_index,
        IssueType::Swap,
        &issues.swap_scores[position],
        &issues.swap_thresholds[position],
        &issues.swap_issues[position],
        &issues.lab_labels[position],
        factors.swap,
    ));
    found
}

/// Score and check every image of `dataset` with the settings of `config`.
pub fn audit_dataset(dataset: &Dataset, config: &AuditConfig) -> Result<AuditResult> {
    config.validate()?;
    let params = ScoreParams::resolve(config.score_overrides());
    let weights = get_aggregation_weights(config.aggregation_weights)?;

    let pruned;
    let predictions = match config.prune_threshold {
        Some(threshold) => {
            pruned = prune_by_threshold(&dataset.predictions, threshold, true)?;
            &pruned[..]
        }
        None => &dataset.predictions[..],
    };

    let aux = auxiliary_inputs(params.alpha, &dataset.annotations, predictions)?;
    let scores = score_images(&aux, &params, &weights, config.overlapping_label_check);
    let per_class = per_class_ap(&dataset.annotations, predictions)?;
    let issues = detect_box_issues(
        &aux,
        &per_class,
        &params,
        &config.threshold_factors,
        config.overlapping_label_check,
    )?;

    let mut result = AuditResult::new(
        ScoringMethod::Subtype.to_string(),
        config.overlapping_label_check,
        config.prune_threshold,
        dataset.total_images,
        dataset.image_count(),
    );

    for (position, image_scores) in scores.into_iter().enumerate() {
        let index = dataset.indices[position];
        result.add_image_result(ImageResult {
            index,
            image: dataset.images[position].clone(),
            label_count: aux[position].lab_labels.len(),
            prediction_count: aux[position].pred_labels.len(),
            score: image_scores.score,
            overlooked_score: image_scores.overlooked,
            badloc_score: image_scores.badloc,
            swap_score: image_scores.swap,
            issues: image_issues(&issues, position, index, config),
        });
    }

    result.finalize();

    info!(
        "Audited {} images, {} with issues",
        result.images_audited,
        result.images_with_issues()
    );
    Ok(result)
}
