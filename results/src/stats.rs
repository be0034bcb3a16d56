//! Descriptive statistics over `f64` samples
//!
//! Every function returns 0 for empty input instead of dividing by zero.

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

/// Nearest-rank percentile, `p` in 0..=100
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let len = sorted.len();
    let index = ((len as f64 - 1.0) * p.clamp(0.0, 100.0) / 100.0).round() as usize;
    sorted[index.min(len - 1)]
}

/// Sample standard deviation
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean_val = mean(values);
    let variance = values.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// Percentage change from `baseline` to `current`; 0 when the baseline is 0
pub fn percent_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    (current - baseline) / baseline * 100.0
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Summary of one numeric series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
}

impl Distribution {
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            count: values.len(),
            min: min(values),
            max: max(values),
            mean: mean(values),
            median: median(values),
            stddev: standard_deviation(values),
        }
    }
}
