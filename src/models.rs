//! Data models for gt-rank

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AuditError, Result};

/// Axis-aligned box as `x1, y1, x2, y2`.
pub type BoxXyxy = [f64; 4];

/// Predicted box with its probability appended: `x1, y1, x2, y2, prob`.
pub type ScoredBox = [f64; 5];

/// Ground truth for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub bboxes: Vec<BoxXyxy>,
    pub labels: Vec<usize>,
}

impl Annotation {
    pub fn new(bboxes: Vec<BoxXyxy>, labels: Vec<usize>) -> Self {
        Self { bboxes, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Check that boxes and labels are index aligned and boxes are ordered.
    pub fn validate(&self) -> Result<()> {
        if self.bboxes.len() != self.labels.len() {
            return Err(AuditError::InvalidAnnotation(format!(
                "{} boxes but {} labels",
                self.bboxes.len(),
                self.labels.len()
            )));
        }
        for (i, b) in self.bboxes.iter().enumerate() {
            if b.iter().any(|v| !v.is_finite()) || b[0] > b[2] || b[1] > b[3] {
                return Err(AuditError::InvalidAnnotation(format!(
                    "box {} is not a valid x1,y1,x2,y2 box: {:?}",
                    i, b
                )));
            }
        }
        Ok(())
    }
}

/// Model output for one image, in one of the two accepted layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    /// Entry `k` lists the boxes predicted for class `k`.
    PerClass(Vec<Vec<ScoredBox>>),
    /// One entry per box with its label and the full probability vector.
    AllPred {
        boxes: Vec<BoxXyxy>,
        labels: Vec<usize>,
        pred_probs: Vec<Vec<f64>>,
    },
}

impl Default for Prediction {
    fn default() -> Self {
        Prediction::PerClass(Vec::new())
    }
}

/// Layout of a [`Prediction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// Class-nested layout carrying only the probability of the predicted class.
    MaxPred,
    /// Flat layout carrying a probability for every class.
    AllPred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Overlooked,
    Badloc,
    Swap,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::Overlooked => write!(f, "overlooked"),
            IssueType::Badloc => write!(f, "badloc"),
            IssueType::Swap => write!(f, "swap"),
        }
    }
}

/// One flagged box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub image_index: usize,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// Index of the predicted box for overlooked issues, of the annotated box otherwise.
    pub box_index: usize,
    pub class_id: usize,
    pub score: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub label_count: usize,
    pub prediction_count: usize,
    pub score: f64,
    pub overlooked_score: f64,
    pub badloc_score: f64,
    pub swap_score: f64,
    pub issues: Vec<Issue>,
}

impl ImageResult {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn count(&self, issue_type: IssueType) -> usize {
        self.issues
            .iter()
            .filter(|i| i.issue_type == issue_type)
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_images: usize,
    pub images_audited: usize,
    pub images_with_issues: usize,
    pub total_issues: usize,
    pub by_type: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub generator: String,
    pub generator_version: String,
    pub generated_at: String,
    pub method: String,
    pub overlapping_label_check: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune_threshold: Option<f64>,
    pub total_images: usize,
    pub images_audited: usize,
    #[serde(skip)]
    pub image_results: Vec<ImageResult>,
    pub summary: AuditSummary,
    pub flagged_images: Vec<ImageResult>,
}

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageScoreEntry {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub score: f64,
    pub overlooked_score: f64,
    pub badloc_score: f64,
    pub swap_score: f64,
}

/// Output of the `score` command: one entry per image plus the ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub generator: String,
    pub generator_version: String,
    pub generated_at: String,
    pub method: String,
    pub scores: Vec<ImageScoreEntry>,
    /// Image indices, worst score first.
    pub ranking: Vec<usize>,
}

impl ScoreReport {
    pub fn new(method: String) -> Self {
        Self {
            generator: "gt-rank".to_string(),
            generator_version: VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            method,
            scores: Vec::new(),
            ranking: Vec::new(),
        }
    }
}

impl AuditResult {
    pub fn new(
        method: String,
        overlapping_label_check: bool,
        prune_threshold: Option<f64>,
        total_images: usize,
        images_audited: usize,
    ) -> Self {
        Self {
            generator: "gt-rank".to_string(),
            generator_version: VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            method,
            overlapping_label_check,
            prune_threshold,
            total_images,
            images_audited,
            image_results: Vec::new(),
            summary: AuditSummary {
                total_images,
                images_audited,
                images_with_issues: 0,
                total_issues: 0,
                by_type: HashMap::new(),
            },
            flagged_images: Vec::new(),
        }
    }

    /// Record one image and update the summary counters.
    ///
    /// Call [`AuditResult::finalize`] once every image is added.
    pub fn add_image_result(&mut self, result: ImageResult) {
        self.summary.total_issues += result.issues.len();
        for issue in &result.issues {
            *self
                .summary
                .by_type
                .entry(issue.issue_type.to_string())
                .or_insert(0) += 1;
        }
        if result.has_issues() {
            self.summary.images_with_issues += 1;
            self.flagged_images.push(result.clone());
        }
        self.image_results.push(result);
    }

    /// Order flagged images worst first.
    pub fn finalize(&mut self) {
        self.flagged_images
            .sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
    }

    pub fn images_with_issues(&self) -> usize {
        self.summary.images_with_issues
    }

    pub fn total_issues(&self) -> usize {
        self.summary.total_issues
    }

    pub fn issues_by_type(&self) -> Vec<(String, usize)> {
        let mut items: Vec<_> = self
            .summary
            .by_type
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_result(index: usize, score: f64, issues: Vec<Issue>) -> ImageResult {
        ImageResult {
            index,
            image: None,
            label_count: 1,
            prediction_count: 1,
            score,
            overlooked_score: score,
            badloc_score: 1.0,
            swap_score: 1.0,
            issues,
        }
    }

    fn issue(image_index: usize, issue_type: IssueType) -> Issue {
        Issue {
            image_index,
            issue_type,
            box_index: 0,
            class_id: 0,
            score: 0.1,
            threshold: 0.5,
        }
    }

    #[test]
    fn test_annotation_validate() {
        let ok = Annotation::new(vec![[0.0, 0.0, 10.0, 10.0]], vec![1]);
        assert!(ok.validate().is_ok());

        let misaligned = Annotation::new(vec![[0.0, 0.0, 10.0, 10.0]], vec![1, 2]);
        assert!(misaligned.validate().is_err());

        let flipped = Annotation::new(vec![[10.0, 0.0, 0.0, 10.0]], vec![1]);
        assert!(flipped.validate().is_err());
    }

    #[test]
    fn test_prediction_json_layouts() {
        let nested: Prediction =
            serde_json::from_str("[[[0, 0, 10, 10, 0.9]], []]").unwrap();
        assert!(matches!(nested, Prediction::PerClass(ref c) if c.len() == 2));

        let flat_obj: Prediction = serde_json::from_str(
            r#"{"boxes": [[0, 0, 10, 10]], "labels": [1], "pred_probs": [[0.1, 0.9]]}"#,
        )
        .unwrap();
        assert!(matches!(flat_obj, Prediction::AllPred { .. }));

        let flat_seq: Prediction =
            serde_json::from_str("[[[0, 0, 10, 10]], [1], [[0.1, 0.9]]]").unwrap();
        assert_eq!(flat_seq, flat_obj);
    }

    #[test]
    fn test_summary_counts() {
        let mut result = AuditResult::new("subtype".to_string(), true, None, 3, 3);
        result.add_image_result(image_result(0, 0.95, vec![]));
        result.add_image_result(image_result(
            1,
            0.4,
            vec![issue(1, IssueType::Swap), issue(1, IssueType::Overlooked)],
        ));
        result.add_image_result(image_result(2, 0.2, vec![issue(2, IssueType::Swap)]));
        result.finalize();

        assert_eq!(result.images_with_issues(), 2);
        assert_eq!(result.total_issues(), 3);
        assert_eq!(result.issues_by_type()[0], ("swap".to_string(), 2));
        assert_eq!(result.flagged_images[0].index, 2);
        assert_eq!(result.flagged_images[1].count(IssueType::Overlooked), 1);
    }

    #[test]
    fn test_summary_after_bulk_build() {
        let types = [IssueType::Overlooked, IssueType::Badloc, IssueType::Swap];
        let mut result = AuditResult::new("subtype".to_string(), true, None, 3000, 3000);
        for index in 0..3000 {
            let issues = (0..index % 3)
                .map(|k| issue(index, types[(index + k) % 3]))
                .collect();
            let score = 1.0 - (index % 7) as f64 / 10.0;
            result.add_image_result(image_result(index, score, issues));
        }
        result.finalize();

        let expected_issues: usize = result.image_results.iter().map(|r| r.issues.len()).sum();
        assert_eq!(result.total_issues(), expected_issues);
        assert_eq!(result.total_issues(), 3000);
        assert_eq!(result.images_with_issues(), 2000);
        assert_eq!(result.flagged_images.len(), 2000);
        let by_type: usize = result.issues_by_type().iter().map(|(_, n)| n).sum();
        assert_eq!(by_type, expected_issues);
        assert!(result.flagged_images.windows(2).all(|w| {
            w[0].score < w[1].score || (w[0].score == w[1].score && w[0].index < w[1].index)
        }));
    }
}
