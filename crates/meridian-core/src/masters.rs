//! Calibration session and master-frame management.
//!
//! Sessions group the raw calibration frames taken on one night with one
//! rig; masters record each combined output and the parameters that
//! produced it. Both live behind the repository abstraction.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::combine::validate::validate_frames;
use crate::combine::{array_statistics, combine_frames, CombineMethod, RejectionPolicy};
use crate::error::{MeridianError, Result};
use crate::frame::ImageType;
use crate::io::fits::read_fits;
use crate::registry::{JsonRepository, Record, Repository};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub id: String,
    pub name: String,
    /// Session date, YYYY-MM-DD.
    pub date: String,
    pub telescope: Option<String>,
    pub camera: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for CalibrationSession {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterCalibration {
    pub id: String,
    pub session_id: String,
    pub frame_type: ImageType,
    pub exposure_time: Option<f64>,
    pub gain: Option<i64>,
    pub filter: Option<String>,
    pub filename: String,
    pub num_frames: usize,
    pub combination_method: CombineMethod,
    pub rejection_method: RejectionPolicy,
    pub created_at: DateTime<Utc>,
}

impl Record for MasterCalibration {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Optional acquisition tags recorded on a master and folded into its
/// filename.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MasterTags {
    pub exposure_time: Option<f64>,
    pub gain: Option<i64>,
    pub filter: Option<String>,
}

/// Summary of a single calibration frame on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameInfo {
    pub filename: String,
    pub path: PathBuf,
    pub dimensions: Option<(usize, usize)>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub exposure_time: Option<f64>,
    pub gain: Option<f64>,
    pub instrument: Option<String>,
    pub ccd_temp: Option<f64>,
    pub image_type: Option<ImageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service owning the calibration-session registry and the master files
/// beneath `masters_dir`.
pub struct MasterService<S, M>
where
    S: Repository<CalibrationSession>,
    M: Repository<MasterCalibration>,
{
    masters_dir: PathBuf,
    sessions: S,
    masters: M,
}

impl MasterService<JsonRepository<CalibrationSession>, JsonRepository<MasterCalibration>> {
    /// Open the default JSON-backed service under a project directory.
    pub fn open(project_path: &Path) -> Self {
        let masters_dir = project_path.join("masters");
        let sessions = JsonRepository::new(masters_dir.join(".sessions.json"));
        let masters = JsonRepository::new(masters_dir.join(".masters.json"));
        Self::new(masters_dir, sessions, masters)
    }
}

impl<S, M> MasterService<S, M>
where
    S: Repository<CalibrationSession>,
    M: Repository<MasterCalibration>,
{
    pub fn new(masters_dir: PathBuf, sessions: S, masters: M) -> Self {
        Self {
            masters_dir,
            sessions,
            masters,
        }
    }

    pub fn create_session(
        &self,
        name: &str,
        date: &str,
        telescope: Option<String>,
        camera: Option<String>,
    ) -> Result<CalibrationSession> {
        let session = CalibrationSession {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            date: date.to_string(),
            telescope,
            camera,
            created_at: Utc::now(),
        };
        self.sessions.put(&session)?;
        info!(name, id = %session.id, "created calibration session");
        Ok(session)
    }

    pub fn sessions(&self) -> Result<Vec<CalibrationSession>> {
        self.sessions.list()
    }

    pub fn session(&self, session_id: &str) -> Result<Option<CalibrationSession>> {
        self.sessions.get(session_id)
    }

    /// Per-frame info for every FITS file in a directory.
    pub fn scan_frames(&self, frames_dir: &Path) -> Result<Vec<FrameInfo>> {
        let mut frames = Vec::new();
        if !frames_dir.exists() {
            debug!(dir = %frames_dir.display(), "frames directory does not exist");
            return Ok(frames);
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(frames_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("fit") || e.eq_ignore_ascii_case("fits"))
            })
            .collect();
        entries.sort();

        for path in entries {
            frames.push(frame_info(&path));
        }
        info!(count = frames.len(), dir = %frames_dir.display(), "scanned calibration frames");
        Ok(frames)
    }

    /// Create a master calibration frame for a session.
    ///
    /// Validation failures (dimension mismatch, zero loadable frames) fail
    /// the whole operation before any combination is attempted.
    pub fn create_master(
        &self,
        session_id: &str,
        frame_type: ImageType,
        file_paths: &[PathBuf],
        method: CombineMethod,
        rejection: &RejectionPolicy,
        tags: MasterTags,
    ) -> Result<MasterCalibration> {
        let session = self
            .sessions
            .get(session_id)?
            .ok_or_else(|| MeridianError::NotFound {
                kind: "session",
                id: session_id.to_string(),
            })?;

        let validation = validate_frames(file_paths);
        if validation.dimension_mismatch {
            let a = validation.dimensions[0];
            let b = validation.dimensions[1];
            return Err(MeridianError::DimensionMismatch {
                first_height: a.0,
                first_width: a.1,
                height: b.0,
                width: b.1,
            });
        }
        if validation.valid_count == 0 {
            return Err(MeridianError::NoValidFrames);
        }

        let filename = master_filename(frame_type, &tags);
        let output_path = self.masters_dir.join(&session.name).join(&filename);

        info!(
            %frame_type,
            frames = file_paths.len(),
            session = %session.name,
            "creating master frame"
        );
        let stats = combine_frames(file_paths, &output_path, method, rejection)?;

        let master = MasterCalibration {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            frame_type,
            exposure_time: tags.exposure_time,
            gain: tags.gain,
            filter: tags.filter,
            filename,
            num_frames: stats.num_frames,
            combination_method: method,
            rejection_method: rejection.clone(),
            created_at: Utc::now(),
        };
        self.masters.put(&master)?;
        info!(id = %master.id, file = %master.filename, "master calibration recorded");
        Ok(master)
    }

    /// Masters, optionally filtered to one session.
    pub fn masters(&self, session_id: Option<&str>) -> Result<Vec<MasterCalibration>> {
        let mut masters = self.masters.list()?;
        if let Some(session_id) = session_id {
            masters.retain(|m| m.session_id == session_id);
        }
        Ok(masters)
    }

    pub fn master(&self, master_id: &str) -> Result<Option<MasterCalibration>> {
        self.masters.get(master_id)
    }

    /// Path to a master's backing file.
    pub fn master_path(&self, master: &MasterCalibration) -> Result<PathBuf> {
        let session = self
            .sessions
            .get(&master.session_id)?
            .ok_or_else(|| MeridianError::NotFound {
                kind: "session",
                id: master.session_id.clone(),
            })?;
        Ok(self.masters_dir.join(session.name).join(&master.filename))
    }

    /// Delete a master record, optionally removing the backing file.
    /// Returns false when the id is unknown.
    pub fn delete_master(&self, master_id: &str, delete_file: bool) -> Result<bool> {
        let Some(master) = self.masters.get(master_id)? else {
            return Ok(false);
        };

        if delete_file {
            let path = self.master_path(&master)?;
            if path.exists() {
                std::fs::remove_file(&path)?;
                info!(path = %path.display(), "deleted master file");
            }
        }

        self.masters.delete(master_id)?;
        info!(id = master_id, file = %master.filename, "deleted master calibration");
        Ok(true)
    }
}

fn master_filename(frame_type: ImageType, tags: &MasterTags) -> String {
    let mut parts = vec!["master".to_string(), frame_type.to_string().to_lowercase()];
    if let Some(exposure) = tags.exposure_time {
        parts.push(format!("{}s", exposure as i64));
    }
    if let Some(gain) = tags.gain {
        parts.push(format!("gain{gain}"));
    }
    if let Some(filter) = &tags.filter {
        parts.push(filter.clone());
    }
    format!("{}.fits", parts.join("_"))
}

fn frame_info(path: &Path) -> FrameInfo {
    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    match read_fits(path) {
        Ok(frame) => {
            let stats = array_statistics(&frame.data);
            FrameInfo {
                filename,
                path: path.to_path_buf(),
                dimensions: Some(frame.shape()),
                mean: Some(stats.mean),
                median: Some(stats.median),
                std: Some(stats.std),
                min: Some(stats.min),
                max: Some(stats.max),
                exposure_time: frame.exposure_time(),
                gain: frame.gain(),
                instrument: frame.header.get_string("INSTRUME").map(String::from),
                ccd_temp: frame.header.get_float("CCD-TEMP"),
                image_type: frame.image_type(),
                error: None,
            }
        }
        Err(e) => FrameInfo {
            filename,
            path: path.to_path_buf(),
            dimensions: None,
            mean: None,
            median: None,
            std: None,
            min: None,
            max: None,
            exposure_time: None,
            gain: None,
            instrument: None,
            ccd_temp: None,
            image_type: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_filename_includes_tags() {
        let tags = MasterTags {
            exposure_time: Some(300.0),
            gain: Some(100),
            filter: Some("Ha".into()),
        };
        assert_eq!(
            master_filename(ImageType::Dark, &tags),
            "master_dark_300s_gain100_Ha.fits"
        );
        assert_eq!(
            master_filename(ImageType::Bias, &MasterTags::default()),
            "master_bias.fits"
        );
    }
}
