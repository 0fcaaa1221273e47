use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;

use super::median_in_place;

/// Outlier rejection applied per pixel position across the stack,
/// independent of the combination method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// All frames contribute.
    None,
    /// Iterative clipping around the per-pixel median: values more than
    /// `low` standard deviations below or `high` above the median are
    /// excluded, and the pass repeats on the survivors until it rejects
    /// nothing further.
    SigmaClip { low: f64, high: f64 },
    /// Unconditionally drop the lowest `min` and highest `max` values at
    /// each pixel position. No iteration.
    MinMax { min: usize, max: usize },
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self::SigmaClip {
            low: 3.0,
            high: 3.0,
        }
    }
}

impl RejectionPolicy {
    /// Reduce `values` to the surviving subset. May leave `values` empty
    /// (e.g. zero-width sigma bounds on an even-sized stack); the caller
    /// decides the fallback.
    pub fn apply(&self, values: &mut Vec<f64>) {
        match self {
            Self::None => {}
            Self::SigmaClip { low, high } => sigma_clip(values, *low, *high),
            Self::MinMax { min, max } => minmax_clip(values, *min, *max),
        }
    }
}

impl std::fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SigmaClip { low, high } => write!(f, "sigma_clip({low},{high})"),
            Self::MinMax { min, max } => write!(f, "minmax({min},{max})"),
        }
    }
}

fn sigma_clip(values: &mut Vec<f64>, low: f64, high: f64) {
    loop {
        if values.len() <= 1 {
            return;
        }
        let mut scratch = values.clone();
        let median = median_in_place(&mut scratch);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        let std = var.sqrt();
        if std < EPSILON {
            return;
        }
        let lo = median - low * std;
        let hi = median + high * std;
        let before = values.len();
        values.retain(|v| *v >= lo && *v <= hi);
        if values.len() == before {
            return;
        }
    }
}

fn minmax_clip(values: &mut Vec<f64>, min: usize, max: usize) {
    if min + max >= values.len() {
        values.clear();
        return;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    values.truncate(values.len() - max);
    values.drain(..min);
}
