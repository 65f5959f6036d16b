use super::TimeSeries;

/// Per-point deviation test over a whole series.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlierScorer;

impl OutlierScorer {
    /// `|value - mean| / stddev` for every value; all zeros when the series is flat.
    pub fn score(values: &[f64]) -> Vec<f64> {
        if values.is_empty() {
            return Vec::new();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return vec![0.0; values.len()];
        }

        values.iter().map(|v| (v - mean).abs() / std_dev).collect()
    }

    pub fn score_series(series: &TimeSeries<f64>) -> Vec<f64> {
        Self::score(&series.to_values())
    }

    /// Mean of `values` where the first point and any point whose score exceeds
    /// `fence` contribute at most 1.0.
    pub fn capped_mean(values: &[f64], fence: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }

        let scores = Self::score(values);
        let total: f64 = values
            .iter()
            .zip(scores.iter())
            .enumerate()
            .map(|(i, (value, z))| {
                if i == 0 || *z > fence {
                    value.min(1.0)
                } else {
                    *value
                }
            })
            .sum();

        total / values.len() as f64
    }
}
