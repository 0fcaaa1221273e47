//! Pipeline orchestration.
//!
//! The service owns step sequencing and persisted pipeline state. It does
//! no numerical work itself: each `execute_*` dispatches to the leaf
//! modules, records step status and progress through the repository, and
//! returns the aggregate batch result.

mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibrate::{calibrate_batch, CalibrationBatch, CalibrationConfig};
use crate::combine::{CombineMethod, RejectionPolicy};
use crate::error::{MeridianError, Result};
use crate::quality::metrics::{analyze_batch, QualityMetrics};
use crate::register::{register_batch, select_reference, RegistrationBatch};
use crate::registry::{JsonRepository, Repository};
use crate::stack::{stack_by_filter, FilterStackOutcome};

pub use types::{Pipeline, ProcessingStep, Status, StepType};

/// Quality-analysis step result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityReport {
    pub total: usize,
    pub metrics: Vec<QualityMetrics>,
}

/// Stacking step result, per filter group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackingReport {
    pub total_filters: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: BTreeMap<String, FilterStackOutcome>,
}

/// Service owning pipeline records and per-object output directories.
pub struct PipelineService<R: Repository<Pipeline>> {
    project_path: PathBuf,
    repo: R,
}

impl PipelineService<JsonRepository<Pipeline>> {
    /// Open the default JSON-backed service under a project directory.
    pub fn open(project_path: &Path) -> Self {
        let repo = JsonRepository::new(project_path.join("processed").join(".pipelines.json"));
        Self::new(project_path.to_path_buf(), repo)
    }
}

impl<R: Repository<Pipeline>> PipelineService<R> {
    pub fn new(project_path: PathBuf, repo: R) -> Self {
        Self { project_path, repo }
    }

    pub fn create_pipeline(
        &self,
        object_name: &str,
        filters: Vec<String>,
        panels: Option<Vec<String>>,
    ) -> Result<Pipeline> {
        let pipeline = Pipeline::new(object_name, filters, panels);
        self.repo.put(&pipeline)?;
        info!(object = object_name, id = %pipeline.id, "created pipeline");
        Ok(pipeline)
    }

    pub fn pipelines(&self) -> Result<Vec<Pipeline>> {
        self.repo.list()
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Result<Pipeline> {
        self.repo
            .get(pipeline_id)?
            .ok_or_else(|| MeridianError::NotFound {
                kind: "pipeline",
                id: pipeline_id.to_string(),
            })
    }

    pub fn delete_pipeline(&self, pipeline_id: &str) -> Result<bool> {
        let deleted = self.repo.delete(pipeline_id)?;
        if deleted {
            info!(id = pipeline_id, "deleted pipeline");
        }
        Ok(deleted)
    }

    fn object_dir(&self, pipeline: &Pipeline, stage: &str) -> PathBuf {
        self.project_path
            .join("processed")
            .join(&pipeline.object_name)
            .join(stage)
    }

    /// Run one step body, bracketing it with persisted status updates.
    fn run_step<T>(
        &self,
        pipeline_id: &str,
        step_type: StepType,
        body: impl FnOnce(&Pipeline) -> Result<T>,
    ) -> Result<T> {
        let mut pipeline = self.pipeline(pipeline_id)?;
        let step = pipeline.begin_step(step_type)?;
        self.repo.put(&pipeline)?;

        match body(&pipeline) {
            Ok(value) => {
                pipeline.complete_step(step)?;
                self.repo.put(&pipeline)?;
                Ok(value)
            }
            Err(e) => {
                pipeline.fail_step(step, &e.to_string())?;
                self.repo.put(&pipeline)?;
                Err(e)
            }
        }
    }

    /// Calibrate a batch of science frames. Per-frame failures are part of
    /// the aggregate result; the step itself fails only on whole-batch
    /// errors.
    pub fn execute_calibration(
        &self,
        pipeline_id: &str,
        science_paths: &[PathBuf],
        config: &CalibrationConfig,
    ) -> Result<CalibrationBatch> {
        self.run_step(pipeline_id, StepType::Calibration, |pipeline| {
            let output_dir = self.object_dir(pipeline, "calibrated");
            std::fs::create_dir_all(&output_dir)?;
            info!(frames = science_paths.len(), "executing calibration step");
            Ok(calibrate_batch(science_paths, &output_dir, config))
        })
    }

    pub fn execute_quality_analysis(
        &self,
        pipeline_id: &str,
        file_paths: &[PathBuf],
        threshold_sigma: f64,
    ) -> Result<QualityReport> {
        self.run_step(pipeline_id, StepType::QualityAnalysis, |_| {
            info!(frames = file_paths.len(), "executing quality analysis step");
            let metrics = analyze_batch(file_paths, threshold_sigma);
            Ok(QualityReport {
                total: metrics.len(),
                metrics,
            })
        })
    }

    /// Register frames against a reference, selecting one by best FWHM
    /// when none is supplied.
    pub fn execute_registration(
        &self,
        pipeline_id: &str,
        source_paths: &[PathBuf],
        reference_path: Option<PathBuf>,
        quality_metrics: Option<&[QualityMetrics]>,
        detection_sigma: f64,
    ) -> Result<RegistrationBatch> {
        self.run_step(pipeline_id, StepType::Registration, |pipeline| {
            let reference = match reference_path {
                Some(path) => path,
                None => select_reference(source_paths, quality_metrics)?,
            };
            let output_dir = self.object_dir(pipeline, "registered");
            std::fs::create_dir_all(&output_dir)?;
            info!(frames = source_paths.len(), "executing registration step");
            Ok(register_batch(
                source_paths,
                &reference,
                &output_dir,
                detection_sigma,
            ))
        })
    }

    /// Stack registered frames per filter group. A finished stacking step
    /// completes the pipeline.
    pub fn execute_stacking(
        &self,
        pipeline_id: &str,
        file_paths: &[PathBuf],
        method: CombineMethod,
        rejection: &RejectionPolicy,
    ) -> Result<StackingReport> {
        self.run_step(pipeline_id, StepType::Stacking, |pipeline| {
            let output_dir = self.object_dir(pipeline, "stacked");
            std::fs::create_dir_all(&output_dir)?;
            info!(frames = file_paths.len(), "executing stacking step");
            let results = stack_by_filter(file_paths, &output_dir, method, rejection);
            let successful = results.values().filter(|r| r.success).count();
            Ok(StackingReport {
                total_filters: results.len(),
                successful,
                failed: results.len() - successful,
                results,
            })
        })
    }
}
