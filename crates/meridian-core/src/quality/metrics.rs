use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{BACKGROUND_CLIP_MAX_ITERS, BACKGROUND_CLIP_SIGMA};
use crate::io::fits::read_fits;
use crate::quality::background::sigma_clipped_stats;
use crate::quality::detect::{detect_sources, DetectionConfig};

/// Per-frame quality record.
///
/// `star_count == 0` with `error == None` means the frame analyzed cleanly
/// but contained no detectable sources; all star-dependent fields are
/// `None`. A populated `error` marks a processing failure (unreadable
/// file), distinguishable from the empty-sky outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub file: PathBuf,
    pub star_count: usize,
    pub fwhm_mean: Option<f64>,
    pub fwhm_median: Option<f64>,
    pub fwhm_std: Option<f64>,
    pub roundness_mean: Option<f64>,
    pub sharpness_mean: Option<f64>,
    pub background_mean: Option<f64>,
    pub background_median: Option<f64>,
    pub background_std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QualityMetrics {
    fn failed(file: &Path, error: String) -> Self {
        Self {
            file: file.to_path_buf(),
            star_count: 0,
            fwhm_mean: None,
            fwhm_median: None,
            fwhm_std: None,
            roundness_mean: None,
            sharpness_mean: None,
            background_mean: None,
            background_median: None,
            background_std: None,
            error: Some(error),
        }
    }
}

/// Analyze quality metrics for a single frame. Failures are captured in
/// the record, never raised.
pub fn analyze_frame(file_path: &Path, threshold_sigma: f64) -> QualityMetrics {
    debug!(path = %file_path.display(), "analyzing frame quality");

    let frame = match read_fits(file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %file_path.display(), error = %e, "quality analysis failed");
            return QualityMetrics::failed(file_path, e.to_string());
        }
    };

    let background = sigma_clipped_stats(
        &frame.data,
        BACKGROUND_CLIP_SIGMA,
        BACKGROUND_CLIP_MAX_ITERS,
    );
    let config = DetectionConfig {
        threshold_sigma,
        ..DetectionConfig::default()
    };
    let sources = detect_sources(&frame.data, &background, &config);

    let mut metrics = QualityMetrics {
        file: file_path.to_path_buf(),
        star_count: sources.len(),
        fwhm_mean: None,
        fwhm_median: None,
        fwhm_std: None,
        roundness_mean: None,
        sharpness_mean: None,
        background_mean: Some(background.mean),
        background_median: Some(background.median),
        background_std: Some(background.std),
        error: None,
    };

    if sources.is_empty() {
        debug!(path = %file_path.display(), "no sources detected");
        return metrics;
    }

    let fwhm: Vec<f64> = sources.iter().map(|s| s.fwhm).collect();
    let (fwhm_mean, fwhm_std) = mean_std(&fwhm);
    metrics.fwhm_mean = Some(fwhm_mean);
    metrics.fwhm_median = Some(median(&fwhm));
    metrics.fwhm_std = Some(fwhm_std);
    metrics.roundness_mean = Some(mean(sources.iter().map(|s| s.roundness)));
    metrics.sharpness_mean = Some(mean(sources.iter().map(|s| s.sharpness)));

    debug!(
        stars = metrics.star_count,
        fwhm = fwhm_mean,
        "quality metrics computed"
    );
    metrics
}

/// Analyze many frames independently; per-frame failures are captured in
/// each record and never abort the batch.
pub fn analyze_batch(file_paths: &[PathBuf], threshold_sigma: f64) -> Vec<QualityMetrics> {
    let results: Vec<QualityMetrics> = file_paths
        .iter()
        .map(|p| analyze_frame(p, threshold_sigma))
        .collect();
    info!(frames = results.len(), "quality analysis complete");
    results
}

/// Filter frames by quality criteria, returning the paths that pass.
///
/// A frame is excluded if it errored, lacks an FWHM while an FWHM bound
/// was requested, or violates any supplied bound.
pub fn filter_by_quality(
    metrics_list: &[QualityMetrics],
    min_stars: Option<usize>,
    max_fwhm: Option<f64>,
    min_fwhm: Option<f64>,
) -> Vec<PathBuf> {
    let mut passed = Vec::new();

    for metrics in metrics_list {
        if metrics.error.is_some() {
            continue;
        }
        if let Some(min_stars) = min_stars {
            if metrics.star_count < min_stars {
                debug!(file = %metrics.file.display(), "rejected: too few stars");
                continue;
            }
        }
        if max_fwhm.is_some() || min_fwhm.is_some() {
            let Some(fwhm) = metrics.fwhm_median else {
                debug!(file = %metrics.file.display(), "rejected: no FWHM measurement");
                continue;
            };
            if max_fwhm.is_some_and(|max| fwhm > max) {
                debug!(file = %metrics.file.display(), fwhm, "rejected: FWHM too high");
                continue;
            }
            if min_fwhm.is_some_and(|min| fwhm < min) {
                debug!(file = %metrics.file.display(), fwhm, "rejected: FWHM too low");
                continue;
            }
        }
        passed.push(metrics.file.clone());
    }

    info!(
        passed = passed.len(),
        total = metrics_list.len(),
        "quality filter applied"
    );
    passed
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut scratch = values.to_vec();
    crate::combine::median_in_place(&mut scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(file: &str, stars: usize, fwhm: Option<f64>) -> QualityMetrics {
        QualityMetrics {
            file: PathBuf::from(file),
            star_count: stars,
            fwhm_mean: fwhm,
            fwhm_median: fwhm,
            fwhm_std: fwhm.map(|_| 0.1),
            roundness_mean: None,
            sharpness_mean: None,
            background_mean: Some(100.0),
            background_median: Some(100.0),
            background_std: Some(2.0),
            error: None,
        }
    }

    #[test]
    fn filter_applies_all_bounds() {
        let list = vec![
            metrics("a.fits", 120, Some(3.2)),
            metrics("b.fits", 80, Some(1.8)),
            metrics("c.fits", 10, Some(2.5)),
            QualityMetrics::failed(Path::new("d.fits"), "broken".into()),
        ];
        let passed = filter_by_quality(&list, Some(50), Some(3.0), None);
        assert_eq!(passed, vec![PathBuf::from("b.fits")]);
    }

    #[test]
    fn starless_frame_passes_without_fwhm_bounds() {
        let list = vec![metrics("empty.fits", 0, None)];
        let passed = filter_by_quality(&list, None, None, None);
        assert_eq!(passed.len(), 1);
    }

    #[test]
    fn starless_frame_rejected_when_fwhm_bound_requested() {
        let list = vec![metrics("empty.fits", 0, None)];
        let passed = filter_by_quality(&list, None, Some(3.0), None);
        assert!(passed.is_empty());
    }
}
