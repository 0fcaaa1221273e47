use ndarray::Array2;

use crate::consts::EPSILON;

/// Robust background statistics from iterative sigma clipping.
#[derive(Clone, Copy, Debug)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

/// Iterative sigma-clipped statistics over the whole frame.
///
/// Each pass excludes values more than `sigma` standard deviations from
/// the running median, then recomputes. Stops after `max_iters` passes or
/// when a pass excludes nothing.
pub fn sigma_clipped_stats(data: &Array2<f64>, sigma: f64, max_iters: usize) -> ClippedStats {
    let mut values: Vec<f64> = data.iter().copied().collect();

    for _ in 0..max_iters {
        let (mean, median, std) = moments(&mut values);
        if std < EPSILON {
            return ClippedStats { mean, median, std };
        }
        let lo = median - sigma * std;
        let hi = median + sigma * std;
        let before = values.len();
        values.retain(|v| *v >= lo && *v <= hi);
        if values.len() == before || values.len() <= 1 {
            break;
        }
    }

    let (mean, median, std) = moments(&mut values);
    ClippedStats { mean, median, std }
}

fn moments(values: &mut [f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let median = crate::combine::median_in_place(values);
    (mean, median, var.sqrt())
}
