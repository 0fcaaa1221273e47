use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MeridianError, Result};
use crate::registry::Record;

/// Processing step kind, in canonical pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Calibration,
    QualityAnalysis,
    Registration,
    Stacking,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibration => write!(f, "calibration"),
            Self::QualityAnalysis => write!(f, "quality_analysis"),
            Self::Registration => write!(f, "registration"),
            Self::Stacking => write!(f, "stacking"),
        }
    }
}

/// Execution status shared by steps and the pipeline record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Status {
    /// Step transitions are one-directional:
    /// pending -> running -> completed | failed.
    pub fn can_transition(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Running)
                | (Status::Running, Status::Completed)
                | (Status::Running, Status::Failed)
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One step in a processing pipeline. There is no automatic retry; a
/// retried step is a new record appended by re-invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub step_type: StepType,
    pub status: Status,
    /// 0..100.
    pub progress: f64,
    pub error_message: Option<String>,
}

impl ProcessingStep {
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            status: Status::Pending,
            progress: 0.0,
            error_message: None,
        }
    }

    fn transition(&mut self, next: Status) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(MeridianError::Config(format!(
                "invalid step transition: {} -> {next}",
                self.status
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Persisted processing pipeline for one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub object_name: String,
    pub filters: Vec<String>,
    /// Mosaic panel names, when the object is shot as a mosaic.
    pub panels: Option<Vec<String>>,
    pub steps: Vec<ProcessingStep>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Pipeline {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Pipeline {
    pub fn new(object_name: &str, filters: Vec<String>, panels: Option<Vec<String>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            object_name: object_name.to_string(),
            filters,
            panels,
            steps: Vec::new(),
            status: Status::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step and move it to running. The pipeline itself goes to
    /// running; re-invoking a step after a failure restarts from there.
    pub fn begin_step(&mut self, step_type: StepType) -> Result<usize> {
        let mut step = ProcessingStep::new(step_type);
        step.transition(Status::Running)?;
        self.steps.push(step);
        self.status = Status::Running;
        self.touch();
        Ok(self.steps.len() - 1)
    }

    /// Mark a running step completed. A finished stacking step completes
    /// the whole pipeline.
    pub fn complete_step(&mut self, index: usize) -> Result<()> {
        let step = self.step_mut(index)?;
        step.transition(Status::Completed)?;
        step.progress = 100.0;
        if self.steps[index].step_type == StepType::Stacking {
            self.status = Status::Completed;
        }
        self.touch();
        Ok(())
    }

    /// Mark a running step failed; the failure propagates to the pipeline.
    pub fn fail_step(&mut self, index: usize, message: &str) -> Result<()> {
        let step = self.step_mut(index)?;
        step.transition(Status::Failed)?;
        step.error_message = Some(message.to_string());
        self.status = Status::Failed;
        self.touch();
        Ok(())
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut ProcessingStep> {
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or_else(|| MeridianError::Config(format!("step index {index} out of range ({len} steps)")))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut p = Pipeline::new("M31", vec!["L".into()], None);
        assert_eq!(p.status, Status::Pending);

        let cal = p.begin_step(StepType::Calibration).unwrap();
        assert_eq!(p.status, Status::Running);
        p.complete_step(cal).unwrap();
        // Only stacking completes the pipeline.
        assert_eq!(p.status, Status::Running);

        let stack = p.begin_step(StepType::Stacking).unwrap();
        p.complete_step(stack).unwrap();
        assert_eq!(p.status, Status::Completed);
        assert_eq!(p.steps[stack].progress, 100.0);
    }

    #[test]
    fn failure_propagates_to_pipeline() {
        let mut p = Pipeline::new("M31", vec![], None);
        let idx = p.begin_step(StepType::Registration).unwrap();
        p.fail_step(idx, "could not find enough matching stars").unwrap();
        assert_eq!(p.status, Status::Failed);
        assert_eq!(p.steps[idx].status, Status::Failed);
        assert!(p.steps[idx].error_message.is_some());
    }

    #[test]
    fn completed_step_cannot_rerun() {
        let mut p = Pipeline::new("M31", vec![], None);
        let idx = p.begin_step(StepType::Calibration).unwrap();
        p.complete_step(idx).unwrap();
        assert!(p.complete_step(idx).is_err());
        assert!(p.fail_step(idx, "late failure").is_err());
    }

    #[test]
    fn retry_after_failure_appends_new_step() {
        let mut p = Pipeline::new("M31", vec![], None);
        let first = p.begin_step(StepType::Stacking).unwrap();
        p.fail_step(first, "no valid frames").unwrap();
        assert_eq!(p.status, Status::Failed);

        let second = p.begin_step(StepType::Stacking).unwrap();
        assert_ne!(first, second);
        assert_eq!(p.status, Status::Running);
        p.complete_step(second).unwrap();
        assert_eq!(p.status, Status::Completed);
    }
}
