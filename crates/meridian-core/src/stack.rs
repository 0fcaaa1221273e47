//! Science image integration.
//!
//! Stacking reuses the combination engine and adds stack provenance
//! headers plus a per-filter grouping wrapper.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::combine::{
    array_statistics, combine_stack, load_consistent_frames, CombineMethod, CombineStats,
    RejectionPolicy,
};
use crate::error::{MeridianError, Result};
use crate::frame::Frame;
use crate::io::fits::{read_fits_header, write_fits};

/// Stack aligned frames into one integrated image at `output_path`.
pub fn stack_images(
    file_paths: &[PathBuf],
    output_path: &Path,
    method: CombineMethod,
    rejection: &RejectionPolicy,
) -> Result<CombineStats> {
    if file_paths.is_empty() {
        return Err(MeridianError::Config(
            "no files provided for stacking".into(),
        ));
    }

    info!(frames = file_paths.len(), %method, rejection = %rejection, "stacking images");

    let frames = load_consistent_frames(file_paths)?;
    if let RejectionPolicy::MinMax { min, max } = rejection {
        if min + max >= frames.len() {
            return Err(MeridianError::Config(format!(
                "minmax rejection would discard all {} frames (min={min}, max={max})",
                frames.len()
            )));
        }
    }

    let stacked = combine_stack(&frames, method, rejection);

    let mut header = frames[0].header.clone();
    header.set_bool("STACKED", true);
    header.set_int("NSTACKED", frames.len() as i64);
    header.set_string("STKMETOD", &method.to_string());
    header.set_string("STKREJCT", &rejection.to_string());

    let result = Frame::new(stacked, header);
    write_fits(output_path, &result)?;
    info!(path = %output_path.display(), "stacked image saved");

    Ok(CombineStats {
        num_frames: frames.len(),
        method,
        rejection: rejection.clone(),
        output_path: output_path.to_path_buf(),
        stats: array_statistics(&result.data),
    })
}

/// Per-filter stacking outcome. A failed group never blocks its siblings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterStackOutcome {
    pub success: bool,
    pub num_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CombineStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Group name for frames whose filter tag cannot be read.
pub const UNKNOWN_FILTER: &str = "UNKNOWN";

/// Stack frames grouped by their `FILTER` header tag.
///
/// Frames with an unreadable filter tag (missing keyword or unreadable
/// header) land in the [`UNKNOWN_FILTER`] group rather than being dropped.
/// Each group is stacked independently into `output_dir/stacked_<filter>.fits`.
pub fn stack_by_filter(
    file_paths: &[PathBuf],
    output_dir: &Path,
    method: CombineMethod,
    rejection: &RejectionPolicy,
) -> BTreeMap<String, FilterStackOutcome> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for path in file_paths {
        let filter = match read_fits_header(path) {
            Ok(header) => header
                .get_string("FILTER")
                .map(|s| s.to_string())
                .unwrap_or_else(|| UNKNOWN_FILTER.to_string()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read filter tag");
                UNKNOWN_FILTER.to_string()
            }
        };
        groups.entry(filter).or_default().push(path.clone());
    }

    let mut results = BTreeMap::new();
    for (filter, group_files) in groups {
        let output_path = output_dir.join(format!("stacked_{filter}.fits"));
        let outcome = match stack_images(&group_files, &output_path, method, rejection) {
            Ok(stats) => {
                info!(filter = %filter, frames = group_files.len(), "filter group stacked");
                FilterStackOutcome {
                    success: true,
                    num_files: group_files.len(),
                    stats: Some(stats),
                    error: None,
                }
            }
            Err(e) => {
                error!(filter = %filter, error = %e, "filter group failed to stack");
                FilterStackOutcome {
                    success: false,
                    num_files: group_files.len(),
                    stats: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.insert(filter, outcome);
    }

    results
}
