//! Science frame calibration: bias subtraction, exposure-scaled dark
//! subtraction, and flat-field correction, in that fixed order. Each step
//! is optional and applied only when its master frame is supplied.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::combine::array_statistics;
use crate::consts::EPSILON;
use crate::error::{MeridianError, Result};
use crate::frame::Frame;
use crate::io::fits::{read_fits, write_fits};

/// Master frames to apply to a science frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub master_bias: Option<PathBuf>,
    pub master_dark: Option<PathBuf>,
    pub master_flat: Option<PathBuf>,
    /// Scale the dark by the science/dark exposure-time ratio when both
    /// times are known and nonzero.
    pub dark_scale: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            master_bias: None,
            master_dark: None,
            master_flat: None,
            dark_scale: true,
        }
    }
}

/// Per-frame calibration outcome statistics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationStats {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Ordered tags of the steps actually applied, e.g.
    /// `["bias_subtraction", "dark_subtraction_scaled_2.00x", "flat_correction"]`.
    pub steps_applied: Vec<String>,
    pub master_bias: Option<PathBuf>,
    pub master_dark: Option<PathBuf>,
    pub master_flat: Option<PathBuf>,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub input: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CalibrationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a calibration batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationBatch {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<CalibrationOutcome>,
}

fn load_master(path: &Path, science: &Frame) -> Result<Frame> {
    let master = read_fits(path)?;
    let (sh, sw) = science.shape();
    let (mh, mw) = master.shape();
    if (mh, mw) != (sh, sw) {
        return Err(MeridianError::DimensionMismatch {
            first_height: sh,
            first_width: sw,
            height: mh,
            width: mw,
        });
    }
    Ok(master)
}

/// Calibrate one science frame and write the result to `output_path`.
///
/// The applied steps and the master identities are embedded in the output
/// header (`CALIBRTD`, `CALSTEPS`, `MBIAS`, `MDARK`, `MFLAT`) so the
/// provenance is reproducible from the output file alone.
pub fn calibrate_frame(
    science_path: &Path,
    output_path: &Path,
    config: &CalibrationConfig,
) -> Result<CalibrationStats> {
    info!(path = %science_path.display(), "calibrating science frame");

    let science = read_fits(science_path)?;
    let mut calibrated = science.data.clone();
    let mut steps_applied: Vec<String> = Vec::new();

    if let Some(bias_path) = &config.master_bias {
        let bias = load_master(bias_path, &science)?;
        calibrated -= &bias.data;
        steps_applied.push("bias_subtraction".into());
        debug!("applied bias subtraction");
    }

    if let Some(dark_path) = &config.master_dark {
        let dark = load_master(dark_path, &science)?;
        let scale = if config.dark_scale {
            match (science.exposure_time(), dark.exposure_time()) {
                (Some(s), Some(d)) if s != 0.0 && d != 0.0 => Some(s / d),
                _ => None,
            }
        } else {
            None
        };
        match scale {
            Some(factor) => {
                calibrated.zip_mut_with(&dark.data, |c, d| *c -= d * factor);
                steps_applied.push(format!("dark_subtraction_scaled_{factor:.2}x"));
                debug!(factor, "applied dark subtraction (scaled)");
            }
            None => {
                calibrated -= &dark.data;
                steps_applied.push("dark_subtraction_unscaled".into());
                debug!("applied dark subtraction (unscaled)");
            }
        }
    }

    if let Some(flat_path) = &config.master_flat {
        let flat = load_master(flat_path, &science)?;
        // Divide by the flat normalized around its mean, preserving the
        // overall illumination level of the science frame.
        let flat_mean = flat.data.sum() / flat.data.len() as f64;
        if flat_mean.abs() < EPSILON {
            return Err(MeridianError::Config(format!(
                "master flat {} has zero mean",
                flat_path.display()
            )));
        }
        calibrated.zip_mut_with(&flat.data, |c, f| {
            let norm = f / flat_mean;
            if norm.abs() > EPSILON {
                *c /= norm;
            }
        });
        steps_applied.push("flat_correction".into());
        debug!("applied flat correction");
    }

    let mut header = science.header.clone();
    header.set_bool("CALIBRTD", true);
    header.set_string("CALSTEPS", &steps_applied.join(", "));
    if let Some(p) = &config.master_bias {
        header.set_string("MBIAS", &file_name(p));
    }
    if let Some(p) = &config.master_dark {
        header.set_string("MDARK", &file_name(p));
    }
    if let Some(p) = &config.master_flat {
        header.set_string("MFLAT", &file_name(p));
    }

    let output = Frame::new(calibrated, header);
    write_fits(output_path, &output)?;
    info!(path = %output_path.display(), "calibrated frame saved");

    let stats = array_statistics(&output.data);
    Ok(CalibrationStats {
        input: science_path.to_path_buf(),
        output: output_path.to_path_buf(),
        steps_applied,
        master_bias: config.master_bias.clone(),
        master_dark: config.master_dark.clone(),
        master_flat: config.master_flat.clone(),
        mean: stats.mean,
        median: stats.median,
        std: stats.std,
    })
}

/// Calibrate many science frames with the same masters. A failure on one
/// frame is captured in its outcome and never aborts the rest.
pub fn calibrate_batch(
    science_paths: &[PathBuf],
    output_dir: &Path,
    config: &CalibrationConfig,
) -> CalibrationBatch {
    let mut results = Vec::with_capacity(science_paths.len());

    for science_path in science_paths {
        let output_path = output_dir.join(calibrated_name(science_path));
        match calibrate_frame(science_path, &output_path, config) {
            Ok(stats) => results.push(CalibrationOutcome {
                input: science_path.clone(),
                success: true,
                stats: Some(stats),
                error: None,
            }),
            Err(e) => {
                warn!(path = %science_path.display(), error = %e, "calibration failed");
                results.push(CalibrationOutcome {
                    input: science_path.clone(),
                    success: false,
                    stats: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let successful = results.iter().filter(|r| r.success).count();
    info!(
        successful,
        total = results.len(),
        "batch calibration complete"
    );
    CalibrationBatch {
        total: results.len(),
        successful,
        failed: results.len() - successful,
        results,
    }
}

fn calibrated_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frame");
    format!("{stem}_calibrated.fits")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
