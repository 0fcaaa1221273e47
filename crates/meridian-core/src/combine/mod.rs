//! Master-frame combination: per-pixel rejection followed by an
//! average or median reduction over the surviving values.

pub mod rejection;
pub mod validate;

use std::path::{Path, PathBuf};

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{MeridianError, Result};
use crate::frame::Frame;
use crate::io::fits::{read_fits, write_fits};

pub use rejection::RejectionPolicy;

/// How surviving pixel values are reduced to one output value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMethod {
    Average,
    Median,
}

impl std::fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "average"),
            Self::Median => write!(f, "median"),
        }
    }
}

/// Descriptive statistics of a pixel array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Compute mean/median/std/min/max over a whole array.
pub fn array_statistics(data: &Array2<f64>) -> ArrayStats {
    let n = data.len() as f64;
    let mean = data.sum() / n;
    let var = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let mut values: Vec<f64> = data.iter().copied().collect();
    let median = median_in_place(&mut values);
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ArrayStats {
        mean,
        median,
        std: var.sqrt(),
        min,
        max,
    }
}

/// Result of combining a set of frames into one output file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CombineStats {
    pub num_frames: usize,
    pub method: CombineMethod,
    pub rejection: RejectionPolicy,
    pub output_path: PathBuf,
    #[serde(flatten)]
    pub stats: ArrayStats,
}

/// Combine multiple frames into a master frame written to `output_path`.
///
/// Frames that fail to load are skipped with a warning; the combination
/// proceeds over the loadable subset. Loading zero frames, or loading
/// frames of disagreeing shapes, fails the whole operation before any
/// pixel work is done.
pub fn combine_frames(
    file_paths: &[PathBuf],
    output_path: &Path,
    method: CombineMethod,
    rejection: &RejectionPolicy,
) -> Result<CombineStats> {
    if file_paths.is_empty() {
        return Err(MeridianError::Config(
            "no files provided for combination".into(),
        ));
    }

    info!(
        frames = file_paths.len(),
        %method,
        rejection = %rejection,
        "combining frames"
    );

    let frames = load_consistent_frames(file_paths)?;

    if let RejectionPolicy::MinMax { min, max } = rejection {
        if min + max >= frames.len() {
            return Err(MeridianError::Config(format!(
                "minmax rejection would discard all {} frames (min={min}, max={max})",
                frames.len()
            )));
        }
    }

    let combined = combine_stack(&frames, method, rejection);

    // The master carries the first frame's header plus combination provenance.
    let mut header = frames[0].header.clone();
    header.set_bool("COMBINED", true);
    header.set_int("NCOMBINE", frames.len() as i64);
    header.set_string("COMBMETH", &method.to_string());
    header.set_string("COMBREJ", &rejection.to_string());

    let master = Frame::new(combined, header);
    write_fits(output_path, &master)?;
    info!(path = %output_path.display(), "master frame saved");

    Ok(CombineStats {
        num_frames: frames.len(),
        method,
        rejection: rejection.clone(),
        output_path: output_path.to_path_buf(),
        stats: array_statistics(&master.data),
    })
}

/// Load every loadable frame, requiring shape agreement among them.
///
/// Unloadable frames are skipped with a warning; zero loadable frames or
/// disagreeing shapes fail the whole operation.
pub(crate) fn load_consistent_frames(file_paths: &[PathBuf]) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(file_paths.len());
    for path in file_paths {
        match read_fits(path) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unloadable frame"),
        }
    }
    if frames.is_empty() {
        return Err(MeridianError::NoValidFrames);
    }

    let (h, w) = frames[0].shape();
    for frame in &frames[1..] {
        let (fh, fw) = frame.shape();
        if (fh, fw) != (h, w) {
            return Err(MeridianError::DimensionMismatch {
                first_height: h,
                first_width: w,
                height: fh,
                width: fw,
            });
        }
    }
    Ok(frames)
}

/// Per-pixel rejection + reduction over already-loaded frames.
///
/// Row-parallel for images above [`PARALLEL_PIXEL_THRESHOLD`] pixels;
/// all arithmetic in f64.
pub fn combine_stack(
    frames: &[Frame],
    method: CombineMethod,
    rejection: &RejectionPolicy,
) -> Array2<f64> {
    let (h, w) = frames[0].shape();
    let n = frames.len();

    let combine_row = |row: usize| -> Vec<f64> {
        let mut pixel_values = Vec::with_capacity(n);
        let mut row_result = vec![0.0f64; w];
        for (col, result) in row_result.iter_mut().enumerate() {
            pixel_values.clear();
            pixel_values.extend(frames.iter().map(|f| f.data[[row, col]]));
            rejection.apply(&mut pixel_values);
            if pixel_values.is_empty() {
                // All values rejected: fall back to the full stack.
                pixel_values.extend(frames.iter().map(|f| f.data[[row, col]]));
            }
            *result = match method {
                CombineMethod::Average => {
                    pixel_values.iter().sum::<f64>() / pixel_values.len() as f64
                }
                CombineMethod::Median => median_in_place(&mut pixel_values),
            };
        }
        row_result
    };

    let rows: Vec<Vec<f64>> = if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        (0..h).into_par_iter().map(combine_row).collect()
    } else {
        (0..h).map(combine_row).collect()
    };

    let mut result = Array2::<f64>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

/// Median via `select_nth_unstable` without a full sort. Reorders `values`.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return values[0];
    }
    let mid = n / 2;
    if n % 2 == 1 {
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let upper = values[mid];
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) / 2.0
    }
}
