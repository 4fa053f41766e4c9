//! JSON dataset loading

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::inputs::{prediction_type, separate_prediction};
use crate::models::{Annotation, Prediction, PredictionType};

/// One entry of a labels file: an annotation, optionally tagged with its image.
#[derive(Debug, Deserialize)]
struct LabelRecord {
    #[serde(default)]
    image: Option<String>,
    #[serde(flatten)]
    annotation: Annotation,
}

/// Annotations and predictions for the same ordered list of images.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub labels_path: PathBuf,
    pub predictions_path: PathBuf,
    pub class_names: HashMap<usize, String>,
    /// Position of each image in the files it was loaded from.
    pub indices: Vec<usize>,
    pub images: Vec<Option<String>>,
    pub annotations: Vec<Annotation>,
    pub predictions: Vec<Prediction>,
    /// Number of images in the files, before any sampling.
    pub total_images: usize,
}

impl Dataset {
    pub fn load(labels_path: &Path, predictions_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(labels_path)
            .with_context(|| format!("Failed to read {}", labels_path.display()))?;
        let records: Vec<LabelRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", labels_path.display()))?;

        let content = fs::read_to_string(predictions_path)
            .with_context(|| format!("Failed to read {}", predictions_path.display()))?;
        let predictions: Vec<Prediction> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", predictions_path.display()))?;

        ensure!(
            records.len() == predictions.len(),
            "{} has {} images but {} has {}",
            labels_path.display(),
            records.len(),
            predictions_path.display(),
            predictions.len()
        );

        let (images, annotations): (Vec<_>, Vec<_>) =
            records.into_iter().map(|r| (r.image, r.annotation)).unzip();
        let class_names = Self::load_class_names(labels_path)?;
        let total_images = annotations.len();

        Ok(Self {
            labels_path: labels_path.to_path_buf(),
            predictions_path: predictions_path.to_path_buf(),
            class_names,
            indices: (0..total_images).collect(),
            images,
            annotations,
            predictions,
            total_images,
        })
    }

    /// Class names from a `dataset.yaml` or `classes.txt` next to the labels file.
    fn load_class_names(labels_path: &Path) -> Result<HashMap<usize, String>> {
        let mut class_names = HashMap::new();
        let dir = labels_path.parent().unwrap_or_else(|| Path::new("."));

        for yaml_path in [dir.join("dataset.yaml"), dir.join("data.yaml")] {
            if !yaml_path.exists() {
                continue;
            }
            let content = fs::read_to_string(&yaml_path)
                .with_context(|| format!("Failed to read {}", yaml_path.display()))?;

            let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", yaml_path.display()))?;

            if let Some(names) = yaml.get("names") {
                if let Some(seq) = names.as_sequence() {
                    for (i, name) in seq.iter().enumerate() {
                        if let Some(s) = name.as_str() {
                            class_names.insert(i, s.to_string());
                        }
                    }
                } else if let Some(map) = names.as_mapping() {
                    for (k, v) in map {
                        if let (Some(id), Some(name)) = (k.as_u64(), v.as_str()) {
                            class_names.insert(id as usize, name.to_string());
                        }
                    }
                }
            }

            if !class_names.is_empty() {
                return Ok(class_names);
            }
        }

        let txt_path = dir.join("classes.txt");
        if txt_path.exists() {
            let content = fs::read_to_string(&txt_path)?;
            for (i, line) in content.lines().enumerate() {
                let name = line.trim();
                if !name.is_empty() {
                    class_names.insert(i, name.to_string());
                }
            }
        }

        if class_names.is_empty() {
            log::debug!("No class names found next to {}", labels_path.display());
        }
        Ok(class_names)
    }

    pub fn image_count(&self) -> usize {
        self.annotations.len()
    }

    /// Keep only the images at the given positions, in that order.
    pub fn subset(&self, positions: &[usize]) -> Self {
        Self {
            labels_path: self.labels_path.clone(),
            predictions_path: self.predictions_path.clone(),
            class_names: self.class_names.clone(),
            indices: positions.iter().map(|&i| self.indices[i]).collect(),
            images: positions.iter().map(|&i| self.images[i].clone()).collect(),
            annotations: positions.iter().map(|&i| self.annotations[i].clone()).collect(),
            predictions: positions.iter().map(|&i| self.predictions[i].clone()).collect(),
            total_images: self.total_images,
        }
    }

    /// A random sample of `count` images, reproducible for a given seed.
    /// Returns the whole dataset when `count` is zero or not smaller than it.
    pub fn sample(&self, count: usize, seed: u64) -> Self {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        if count == 0 || count >= self.image_count() {
            return self.clone();
        }
        let mut positions: Vec<usize> = (0..self.image_count()).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        positions.shuffle(&mut rng);
        positions.truncate(count);
        positions.sort_unstable();
        self.subset(&positions)
    }

    pub fn label_count(&self) -> usize {
        self.annotations.iter().map(Annotation::len).sum()
    }

    /// Number of predicted boxes, skipping predictions that cannot be flattened.
    pub fn prediction_count(&self) -> usize {
        self.predictions
            .iter()
            .filter_map(|p| separate_prediction(p).ok())
            .map(|p| p.labels.len())
            .sum()
    }

    /// How many images use each prediction layout.
    pub fn layout_counts(&self) -> (usize, usize) {
        self.predictions
            .iter()
            .fold((0, 0), |(max_pred, all_pred), p| match prediction_type(p) {
                PredictionType::MaxPred => (max_pred + 1, all_pred),
                PredictionType::AllPred => (max_pred, all_pred + 1),
            })
    }

    pub fn get_class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dataset(dir: &Path, labels: &str, predictions: &str) -> (PathBuf, PathBuf) {
        fs::create_dir_all(dir).unwrap();
        let labels_path = dir.join("labels.json");
        let predictions_path = dir.join("predictions.json");
        fs::write(&labels_path, labels).unwrap();
        fs::write(&predictions_path, predictions).unwrap();
        (labels_path, predictions_path)
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gt-rank-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_load_dataset() {
        let dir = temp_dir("load");
        let (labels, predictions) = write_dataset(
            &dir,
            r#"[
                {"image": "a.jpg", "bboxes": [[0, 0, 10, 10]], "labels": [1]},
                {"bboxes": [], "labels": []}
            ]"#,
            r#"[
                [[], [[0, 0, 10, 10, 0.9]]],
                {"boxes": [[5, 5, 20, 20]], "labels": [0], "pred_probs": [[0.8, 0.2]]}
            ]"#,
        );
        fs::write(dir.join("classes.txt"), "cat\ndog\n").unwrap();

        let dataset = Dataset::load(&labels, &predictions).unwrap();
        assert_eq!(dataset.image_count(), 2);
        assert_eq!(dataset.images[0].as_deref(), Some("a.jpg"));
        assert!(dataset.images[1].is_none());
        assert_eq!(dataset.label_count(), 1);
        assert_eq!(dataset.prediction_count(), 2);
        assert_eq!(dataset.layout_counts(), (1, 1));
        assert_eq!(dataset.get_class_name(1), "dog");
        assert_eq!(dataset.get_class_name(7), "class_7");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_length_mismatch() {
        let dir = temp_dir("mismatch");
        let (labels, predictions) = write_dataset(
            &dir,
            r#"[{"bboxes": [], "labels": []}]"#,
            "[[[]], [[]]]",
        );
        assert!(Dataset::load(&labels, &predictions).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sample_is_reproducible() {
        let dir = temp_dir("sample");
        let labels = format!("[{}]", vec![r#"{"bboxes": [], "labels": []}"#; 10].join(","));
        let predictions = format!("[{}]", vec!["[[]]"; 10].join(","));
        let (labels, predictions) = write_dataset(&dir, &labels, &predictions);

        let dataset = Dataset::load(&labels, &predictions).unwrap();
        let a = dataset.sample(4, 42);
        let b = dataset.sample(4, 42);
        assert_eq!(a.indices, b.indices);
        assert_eq!(a.image_count(), 4);
        assert_eq!(a.total_images, 10);
        assert!(a.indices.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(dataset.sample(0, 42).image_count(), 10);

        fs::remove_dir_all(&dir).ok();
    }
}
