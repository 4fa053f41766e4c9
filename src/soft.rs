//! Temperature-controlled soft aggregation of per-box scores.

/// Softmax weights of `values / temperature`.
///
/// The maximum is subtracted before exponentiating so large inputs cannot
/// overflow. A single value gets weight `1.0`.
pub fn softmax(values: &[f64], temperature: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let scaled: Vec<f64> = values.iter().map(|v| v / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Smooth minimum: the average of `values` weighted by `exp(-value / temperature)`.
///
/// Lower temperatures approach the true minimum, higher ones the mean. An
/// empty input has no box to penalize and scores `1.0`.
pub fn softmin1d(values: &[f64], temperature: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let inverted: Vec<f64> = values.iter().map(|v| 1.0 - v).collect();
    softmax(&inverted, temperature)
        .iter()
        .zip(values)
        .map(|(w, v)| w * v)
        .sum()
}

/// Pool one image's per-box scores, ignoring NaN entries.
pub fn image_score_from_box_scores(box_scores: &[f64], temperature: f64) -> f64 {
    let valid: Vec<f64> = box_scores.iter().copied().filter(|s| !s.is_nan()).collect();
    if valid.is_empty() {
        return 1.0;
    }
    softmin1d(&valid, temperature)
}
