//! Tunable constants and configuration for label quality scoring

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{AuditError, Result};

/// Weight of IoU in the combined similarity; the rest goes to center distance.
pub const ALPHA: f64 = 0.91;
/// Predicted boxes at or below this probability are ignored by the badloc scorer.
pub const LOW_PROBABILITY_THRESHOLD: f64 = 0.5;
/// Predicted boxes below this probability are ignored by the overlooked and swap scorers.
pub const HIGH_PROBABILITY_THRESHOLD: f64 = 0.95;
/// Softmin temperature used to pool per-box scores into one score per image.
pub const TEMPERATURE: f64 = 0.99;
/// Decay rate applied to center distances (in pixels) before exponentiation.
pub const EUC_FACTOR: f64 = 0.1;
/// Fraction of emptied class arrays above which pruning warns.
pub const MAX_ALLOWED_BOX_PRUNE: f64 = 0.97;
/// Added before taking logarithms of sub-scores.
pub const TINY_VALUE: f64 = 1e-100;
/// IoU above which two annotations of different classes are considered ambiguous.
pub const OVERLAPPING_ANNOTATION_IOU: f64 = 0.95;
/// Multiplier applied to per-class average precision to obtain issue thresholds.
pub const AP_SCALE_FACTOR: f64 = 1.0;

pub const OVERLOOKED_THRESHOLD_FACTOR: f64 = 0.5;
pub const BADLOC_THRESHOLD_FACTOR: f64 = 1.0;
pub const SWAP_THRESHOLD_FACTOR: f64 = 1.0;

pub const CUSTOM_SCORE_WEIGHT_OVERLOOKED: f64 = 1.0 / 3.0;
pub const CUSTOM_SCORE_WEIGHT_SWAP: f64 = 1.0 / 3.0;
pub const CUSTOM_SCORE_WEIGHT_BADLOC: f64 = 1.0 / 3.0;

/// Optional overrides for the subtype scorer tunables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreParamOverrides {
    pub alpha: Option<f64>,
    pub low_probability_threshold: Option<f64>,
    pub high_probability_threshold: Option<f64>,
    pub temperature: Option<f64>,
}

/// Fully resolved subtype scorer tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreParams {
    pub alpha: f64,
    pub low_probability_threshold: f64,
    pub high_probability_threshold: f64,
    pub temperature: f64,
}

impl ScoreParams {
    /// Substitute the built-in default for every unset override.
    pub fn resolve(overrides: ScoreParamOverrides) -> Self {
        Self {
            alpha: overrides.alpha.unwrap_or(ALPHA),
            low_probability_threshold: overrides
                .low_probability_threshold
                .unwrap_or(LOW_PROBABILITY_THRESHOLD),
            high_probability_threshold: overrides
                .high_probability_threshold
                .unwrap_or(HIGH_PROBABILITY_THRESHOLD),
            temperature: overrides.temperature.unwrap_or(TEMPERATURE),
        }
    }
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self::resolve(ScoreParamOverrides::default())
    }
}

/// Weights of the three sub-scores in the overall per-image score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationWeights {
    pub overlooked: f64,
    pub swap: f64,
    pub badloc: f64,
}

impl Default for AggregationWeights {
    fn default() -> Self {
        Self {
            overlooked: CUSTOM_SCORE_WEIGHT_OVERLOOKED,
            swap: CUSTOM_SCORE_WEIGHT_SWAP,
            badloc: CUSTOM_SCORE_WEIGHT_BADLOC,
        }
    }
}

impl AggregationWeights {
    /// Every weight must lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("overlooked", self.overlooked),
            ("swap", self.swap),
            ("badloc", self.badloc),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(AuditError::InvalidConfig(format!(
                    "aggregation weight '{}' must be between 0 and 1, got {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

impl TryFrom<&HashMap<String, f64>> for AggregationWeights {
    type Error = AuditError;

    fn try_from(map: &HashMap<String, f64>) -> Result<Self> {
        if let Some(unknown) = map
            .keys()
            .find(|k| !matches!(k.as_str(), "overlooked" | "swap" | "badloc"))
        {
            return Err(AuditError::InvalidConfig(format!(
                "unknown aggregation weight '{}'",
                unknown
            )));
        }
        let get = |key: &str| {
            map.get(key).copied().ok_or_else(|| {
                AuditError::InvalidConfig(format!("missing aggregation weight '{}'", key))
            })
        };
        let weights = Self {
            overlooked: get("overlooked")?,
            swap: get("swap")?,
            badloc: get("badloc")?,
        };
        weights.validate()?;
        Ok(weights)
    }
}

/// Multipliers applied to per-class thresholds for each issue type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdFactors {
    pub overlooked: f64,
    pub badloc: f64,
    pub swap: f64,
}

impl Default for ThresholdFactors {
    fn default() -> Self {
        Self {
            overlooked: OVERLOOKED_THRESHOLD_FACTOR,
            badloc: BADLOC_THRESHOLD_FACTOR,
            swap: SWAP_THRESHOLD_FACTOR,
        }
    }
}

/// Configuration file contents. Every field is optional in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub alpha: Option<f64>,
    pub low_probability_threshold: Option<f64>,
    pub high_probability_threshold: Option<f64>,
    pub temperature: Option<f64>,
    pub aggregation_weights: Option<AggregationWeights>,
    pub threshold_factors: ThresholdFactors,
    pub overlapping_label_check: bool,
    pub prune_threshold: Option<f64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            alpha: None,
            low_probability_threshold: None,
            high_probability_threshold: None,
            temperature: None,
            aggregation_weights: None,
            threshold_factors: ThresholdFactors::default(),
            overlapping_label_check: true,
            prune_threshold: None,
        }
    }
}

impl AuditConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: AuditConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn score_overrides(&self) -> ScoreParamOverrides {
        ScoreParamOverrides {
            alpha: self.alpha,
            low_probability_threshold: self.low_probability_threshold,
            high_probability_threshold: self.high_probability_threshold,
            temperature: self.temperature,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("alpha", self.alpha),
            ("low_probability_threshold", self.low_probability_threshold),
            ("high_probability_threshold", self.high_probability_threshold),
            ("prune_threshold", self.prune_threshold),
        ];
        for (name, value) in unit {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(AuditError::InvalidConfig(format!(
                        "{} must be between 0 and 1, got {}",
                        name, v
                    )));
                }
            }
        }
        if let Some(t) = self.temperature {
            if t <= 0.0 {
                return Err(AuditError::InvalidConfig(format!(
                    "temperature must be positive, got {}",
                    t
                )));
            }
        }
        let factors = self.threshold_factors;
        if factors.overlooked < 0.0 || factors.badloc < 0.0 || factors.swap < 0.0 {
            return Err(AuditError::InvalidConfig(
                "threshold factors must be non-negative".to_string(),
            ));
        }
        if let Some(weights) = &self.aggregation_weights {
            weights.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let params = ScoreParams::resolve(ScoreParamOverrides::default());
        assert_eq!(params.alpha, ALPHA);
        assert_eq!(params.low_probability_threshold, LOW_PROBABILITY_THRESHOLD);
        assert_eq!(params.high_probability_threshold, HIGH_PROBABILITY_THRESHOLD);
        assert_eq!(params.temperature, TEMPERATURE);
    }

    #[test]
    fn test_resolve_keeps_overrides() {
        let params = ScoreParams::resolve(ScoreParamOverrides {
            alpha: Some(0.5),
            temperature: Some(0.1),
            ..Default::default()
        });
        assert_eq!(params.alpha, 0.5);
        assert_eq!(params.temperature, 0.1);
        assert_eq!(params.high_probability_threshold, HIGH_PROBABILITY_THRESHOLD);
    }

    #[test]
    fn test_weights_from_map() {
        let mut map = HashMap::new();
        map.insert("overlooked".to_string(), 1.0);
        map.insert("swap".to_string(), 0.0);
        assert!(AggregationWeights::try_from(&map).is_err());

        map.insert("badloc".to_string(), 0.0);
        let weights = AggregationWeights::try_from(&map).unwrap();
        assert_eq!(weights.overlooked, 1.0);

        map.insert("badloc".to_string(), 1.2);
        assert!(AggregationWeights::try_from(&map).is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = "alpha: 0.8\nthreshold_factors:\n  overlooked: 0.3\naggregation_weights:\n  overlooked: 0.5\n  swap: 0.25\n  badloc: 0.25\n";
        let config = AuditConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.alpha, Some(0.8));
        assert_eq!(config.threshold_factors.overlooked, 0.3);
        assert_eq!(config.threshold_factors.swap, SWAP_THRESHOLD_FACTOR);
        assert!(config.overlapping_label_check);
        assert_eq!(config.score_overrides().alpha, Some(0.8));
    }

    #[test]
    fn test_config_rejects_out_of_range() {
        assert!(AuditConfig::from_yaml_str("alpha: 1.5\n").is_err());
        assert!(AuditConfig::from_yaml_str("temperature: 0.0\n").is_err());
        assert!(AuditConfig::from_yaml_str(
            "aggregation_weights:\n  overlooked: -1.0\n  swap: 0.3\n  badloc: 0.3\n"
        )
        .is_err());
    }
}
