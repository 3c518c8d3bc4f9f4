//! Status enumerations for pipelines, stages, and steps.

use serde::{Deserialize, Serialize};

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    Running,
    Success,
    PartialSuccess,
    Failure,
    Cancelled,
    Timeout,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineStatus::Running)
    }

    /// Rolls up a set of stage statuses per the table in the stage executor design.
    pub fn rollup<'a>(statuses: impl IntoIterator<Item = &'a StageStatus>) -> Self {
        let statuses: Vec<&StageStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return PipelineStatus::Success;
        }
        if statuses.iter().any(|s| matches!(s, StageStatus::Cancelled)) {
            return PipelineStatus::Cancelled;
        }
        if statuses.iter().any(|s| matches!(s, StageStatus::Timeout)) {
            return PipelineStatus::Timeout;
        }
        let all_success = statuses.iter().all(|s| matches!(s, StageStatus::Success));
        let all_failure = statuses.iter().all(|s| matches!(s, StageStatus::Failure));

        if all_success {
            PipelineStatus::Success
        } else if all_failure {
            PipelineStatus::Failure
        } else {
            // Mixed Success/Failure, or any PartialSuccess/PartialFailure
            // present — both collapse to the same roll-up per §4.9's table.
            PipelineStatus::PartialSuccess
        }
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageStatus {
    Running,
    Success,
    PartialSuccess,
    Failure,
    Cancelled,
    Timeout,
    Skipped,
    PartialFailure,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Running)
    }

    /// Computed from the step statuses of a completed (non-skipped) stage,
    /// per §4.5 step 5.
    pub fn from_step_statuses<'a>(statuses: impl IntoIterator<Item = &'a StepStatus>) -> Self {
        let statuses: Vec<&StepStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return StageStatus::Success;
        }
        if statuses
            .iter()
            .any(|s| matches!(s, StepStatus::Cancelled))
        {
            return StageStatus::Cancelled;
        }
        if statuses.iter().any(|s| matches!(s, StepStatus::Timeout)) {
            return StageStatus::Timeout;
        }
        let all_success = statuses.iter().all(|s| matches!(s, StepStatus::Success));
        if all_success {
            return StageStatus::Success;
        }
        let any_success = statuses.iter().any(|s| matches!(s, StepStatus::Success));
        if any_success {
            StageStatus::PartialSuccess
        } else {
            StageStatus::Failure
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Running,
    Success,
    Failure,
    Cancelled,
    Timeout,
    Skipped,
    ValidationFailed,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }

    pub fn is_failure_like(&self) -> bool {
        matches!(
            self,
            StepStatus::Failure | StepStatus::Timeout | StepStatus::ValidationFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_status_all_success() {
        let statuses = vec![StepStatus::Success, StepStatus::Success];
        assert_eq!(
            StageStatus::from_step_statuses(&statuses),
            StageStatus::Success
        );
    }

    #[test]
    fn stage_status_mixed_is_partial() {
        let statuses = vec![StepStatus::Success, StepStatus::Failure];
        assert_eq!(
            StageStatus::from_step_statuses(&statuses),
            StageStatus::PartialSuccess
        );
    }

    #[test]
    fn stage_status_all_failure() {
        let statuses = vec![StepStatus::Failure, StepStatus::Failure];
        assert_eq!(
            StageStatus::from_step_statuses(&statuses),
            StageStatus::Failure
        );
    }

    #[test]
    fn stage_status_timeout_dominates() {
        let statuses = vec![StepStatus::Success, StepStatus::Timeout];
        assert_eq!(
            StageStatus::from_step_statuses(&statuses),
            StageStatus::Timeout
        );
    }

    #[test]
    fn pipeline_status_empty_is_success() {
        assert_eq!(PipelineStatus::rollup(&[]), PipelineStatus::Success);
    }

    #[test]
    fn pipeline_status_all_success() {
        let s = vec![StageStatus::Success, StageStatus::Success];
        assert_eq!(PipelineStatus::rollup(&s), PipelineStatus::Success);
    }

    #[test]
    fn pipeline_status_mixed() {
        let s = vec![StageStatus::Success, StageStatus::Failure];
        assert_eq!(PipelineStatus::rollup(&s), PipelineStatus::PartialSuccess);
    }

    #[test]
    fn pipeline_status_cancelled_dominates() {
        let s = vec![StageStatus::Success, StageStatus::Cancelled];
        assert_eq!(PipelineStatus::rollup(&s), PipelineStatus::Cancelled);
    }

    #[test]
    fn pipeline_status_all_partial_failure_is_partial_success() {
        let s = vec![StageStatus::PartialFailure, StageStatus::PartialFailure];
        assert_eq!(PipelineStatus::rollup(&s), PipelineStatus::PartialSuccess);
    }
}
