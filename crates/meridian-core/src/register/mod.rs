//! Image registration: aligning source frames onto a reference pixel grid
//! through matched star patterns.

mod matching;
pub mod transform;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{BACKGROUND_CLIP_MAX_ITERS, BACKGROUND_CLIP_SIGMA};
use crate::error::{MeridianError, Result};
use crate::frame::Frame;
use crate::io::fits::{read_fits, write_fits};
use crate::quality::background::sigma_clipped_stats;
use crate::quality::detect::{detect_sources, DetectionConfig};
use crate::quality::metrics::QualityMetrics;

pub use transform::{bilinear_sample, warp_into, AffineTransform};

/// Successful registration of one frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub source: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
    /// Control points behind the fitted transform.
    pub num_matches: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub source: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RegistrationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of registering a batch against one reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationBatch {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub reference: PathBuf,
    pub results: Vec<RegistrationOutcome>,
}

fn frame_sources(frame: &Frame, detection_sigma: f64) -> Vec<crate::quality::DetectedSource> {
    let background = sigma_clipped_stats(
        &frame.data,
        BACKGROUND_CLIP_SIGMA,
        BACKGROUND_CLIP_MAX_ITERS,
    );
    let config = DetectionConfig {
        threshold_sigma: detection_sigma,
        ..DetectionConfig::default()
    };
    detect_sources(&frame.data, &background, &config)
}

/// Register `source_path` onto `reference_path`, writing the warped frame
/// to `output_path` with alignment provenance in its header.
pub fn register_frame(
    source_path: &Path,
    reference_path: &Path,
    output_path: &Path,
    detection_sigma: f64,
) -> Result<RegistrationResult> {
    info!(
        source = %source_path.display(),
        reference = %reference_path.display(),
        "registering frame"
    );

    let source = read_fits(source_path)?;
    let reference = read_fits(reference_path)?;

    let source_stars = frame_sources(&source, detection_sigma);
    let reference_stars = frame_sources(&reference, detection_sigma);

    let star_match = matching::match_stars(&source_stars, &reference_stars)?;
    info!(
        control_points = star_match.control_points,
        "transform found"
    );

    let aligned = warp_into(&source.data, &star_match.transform, reference.shape())
        .ok_or(MeridianError::InsufficientMatches { iterations: 0 })?;

    let mut header = source.header.clone();
    header.set_bool("ALIGNED", true);
    header.set_string(
        "ALIGNREF",
        reference_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default(),
    );
    header.set_int("NMATCHES", star_match.control_points as i64);

    write_fits(output_path, &Frame::new(aligned, header))?;
    info!(path = %output_path.display(), "registered frame saved");

    Ok(RegistrationResult {
        source: source_path.to_path_buf(),
        reference: reference_path.to_path_buf(),
        output: output_path.to_path_buf(),
        num_matches: star_match.control_points,
    })
}

/// Register many frames against one reference. The reference itself is
/// skipped (compared by resolved absolute path); per-frame failures are
/// captured and never abort the batch.
pub fn register_batch(
    source_paths: &[PathBuf],
    reference_path: &Path,
    output_dir: &Path,
    detection_sigma: f64,
) -> RegistrationBatch {
    let reference_resolved = resolve(reference_path);
    let mut results = Vec::new();

    for source_path in source_paths {
        if resolve(source_path) == reference_resolved {
            info!(path = %source_path.display(), "skipping reference image");
            continue;
        }

        let output_path = output_dir.join(registered_name(source_path));
        match register_frame(source_path, reference_path, &output_path, detection_sigma) {
            Ok(result) => results.push(RegistrationOutcome {
                source: source_path.clone(),
                success: true,
                result: Some(result),
                error: None,
            }),
            Err(e) => {
                warn!(path = %source_path.display(), error = %e, "registration failed");
                results.push(RegistrationOutcome {
                    source: source_path.clone(),
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let successful = results.iter().filter(|r| r.success).count();
    info!(
        successful,
        total = results.len(),
        "batch registration complete"
    );
    RegistrationBatch {
        total: results.len(),
        successful,
        failed: results.len() - successful,
        reference: reference_path.to_path_buf(),
        results,
    }
}

/// Pick the reference frame for a batch.
///
/// With quality metrics available, the frame with the best (lowest)
/// non-null median FWHM wins; otherwise the first input, deterministically.
pub fn select_reference(
    file_paths: &[PathBuf],
    quality_metrics: Option<&[QualityMetrics]>,
) -> Result<PathBuf> {
    if file_paths.is_empty() {
        return Err(MeridianError::Config(
            "no files provided for reference selection".into(),
        ));
    }

    if let Some(metrics) = quality_metrics {
        let best = metrics
            .iter()
            .filter_map(|m| m.fwhm_median.map(|f| (m, f)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((m, fwhm)) = best {
            info!(reference = %m.file.display(), fwhm, "selected reference by FWHM");
            return Ok(m.file.clone());
        }
    }

    info!(reference = %file_paths[0].display(), "selected reference (default)");
    Ok(file_paths[0].clone())
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn registered_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frame");
    format!("{stem}_registered.fits")
}
