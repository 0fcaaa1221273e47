use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::fits::read_fits;

/// Outcome of checking a batch of frames before combination.
///
/// Individual unreadable files are reported, never raised; combination is
/// refused separately when `dimension_mismatch` is set or nothing loaded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameValidation {
    pub valid_count: usize,
    pub invalid_count: usize,
    pub valid_files: Vec<PathBuf>,
    pub invalid_files: Vec<InvalidFrame>,
    /// Distinct (height, width) shapes among the valid files.
    pub dimensions: Vec<(usize, usize)>,
    /// True iff more than one distinct shape exists among valid files.
    pub dimension_mismatch: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvalidFrame {
    pub path: PathBuf,
    pub reason: String,
}

/// Open every frame, recording failures and the set of pixel-array shapes.
pub fn validate_frames(file_paths: &[PathBuf]) -> FrameValidation {
    let mut report = FrameValidation::default();

    for path in file_paths {
        match read_fits(path) {
            Ok(frame) => {
                let shape = frame.shape();
                if !report.dimensions.contains(&shape) {
                    report.dimensions.push(shape);
                }
                report.valid_files.push(path.clone());
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "frame failed validation");
                report.invalid_files.push(InvalidFrame {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report.valid_count = report.valid_files.len();
    report.invalid_count = report.invalid_files.len();
    report.dimension_mismatch = report.dimensions.len() > 1;
    report
}
