//! # gt-rank
//!
//! Label quality scoring for object detection datasets.
//!
//! Given the human annotations of each image and a model's predicted boxes,
//! gt-rank scores how likely every image is to contain an annotation error and
//! flags the images that probably do. Three kinds of error are scored per box:
//!
//! - **overlooked**: a confident prediction with no matching annotation
//! - **badloc**: an annotation whose best same-class prediction is offset
//! - **swap**: an annotation sitting on a confident prediction of another class
//!
//! Boxes are matched with a similarity that blends IoU and center distance.
//! Per-box scores are pooled per image with a temperature controlled softmin
//! and combined into one score in `[0, 1]`; lower means worse.
//!
//! ## Quick Start
//!
//! ```rust
//! use gt_rank::{get_label_quality_scores, issues_from_scores, Annotation, Prediction, ScoringOptions};
//!
//! # fn main() -> gt_rank::Result<()> {
//! let annotations = vec![Annotation::new(vec![[10.0, 10.0, 60.0, 60.0]], vec![0])];
//! let predictions = vec![Prediction::PerClass(vec![vec![[12.0, 10.0, 60.0, 62.0, 0.97]]])];
//!
//! let scores = get_label_quality_scores(&annotations, &predictions, &ScoringOptions::default())?;
//! let worst_first = issues_from_scores(&scores, 1.0)?;
//! assert_eq!(worst_first, vec![0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Input layouts
//!
//! Annotations are `{"bboxes": [[x1, y1, x2, y2], ...], "labels": [...]}` per
//! image. Predictions are either class-nested (`[[[x1, y1, x2, y2, prob], ...], ...]`,
//! one list per class) or flat (`{"boxes": ..., "labels": ..., "pred_probs": ...}`).

pub mod ap;
pub mod audit;
pub mod config;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod inputs;
pub mod models;
pub mod rank;
pub mod report;
pub mod scorers;
pub mod soft;

// Re-export commonly used types and functions
pub use audit::audit_dataset;
pub use config::{AggregationWeights, AuditConfig, ScoreParamOverrides, ScoreParams, ThresholdFactors};
pub use dataset::Dataset;
pub use error::{AuditError, Result};
pub use filter::{
    find_label_issues, find_label_issues_by_method, BoxIssues, FindIssuesOptions, LabelIssues,
};
pub use geometry::{bbox_xyxy_to_xywh, similarity_matrix};
pub use inputs::{auxiliary_inputs, prune_by_threshold, AuxiliaryInputs};
pub use models::{Annotation, AuditResult, ImageResult, Issue, IssueType, Prediction, PredictionType};
pub use rank::{
    compute_label_quality_scores, compute_label_quality_scores_with_progress,
    get_label_quality_scores, issues_from_scores, score_one_image,
    ImageScores, ScoringMethod, ScoringOptions,
};
pub use scorers::{
    compute_badloc_box_scores, compute_overlooked_box_scores, compute_swap_box_scores, ScoreInputs,
};
