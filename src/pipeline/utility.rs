/// Mean of the present values; `None` when nothing is present.
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

/// Median of a slice. Returns `None` for empty input; even lengths average
/// the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some(0.5 * (sorted[n / 2 - 1] + sorted[n / 2]))
    }
}

pub fn clamp_percent(p: f64) -> f64 {
    p.clamp(0.0, 100.0)
}

pub fn round_to(x: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (x * scale).round() / scale
}

/// Provider value as used downstream: finite, clamped to [0,100], integer.
pub fn sanitize_percent(raw: Option<f64>) -> Option<f64> {
    raw.filter(|v| v.is_finite()).map(|v| clamp_percent(v).round())
}

/// Irradiance as used downstream: finite, non-negative, W/m².
pub fn sanitize_irradiance(raw: Option<f64>) -> Option<f64> {
    raw.filter(|v| v.is_finite()).map(|v| v.max(0.0))
}
