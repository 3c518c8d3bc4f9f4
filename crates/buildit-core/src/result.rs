//! Result trees produced by the pipeline, stage, and step executors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::id::ResourceId;
use crate::status::{PipelineStatus, StageStatus, StepStatus};

/// Free-form observability metadata attached to any result.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Result of a single step invocation, possibly composite (nested results
/// for `Dir`/`WithEnv`/`Retry`/`Timeout`/`Parallel`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    /// Results of nested steps, in declaration order, for composite steps.
    pub nested: Vec<StepResult>,
    pub metadata: Metadata,
    pub error: Option<String>,
}

impl StepResult {
    pub fn leaf(status: StepStatus, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        let duration = (ended_at - started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self {
            status,
            started_at,
            ended_at,
            duration,
            nested: Vec::new(),
            metadata: Metadata::new(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_nested(mut self, nested: Vec<StepResult>) -> Self {
        self.nested = nested;
        self
    }

    /// Invariant 1: for composite steps, success iff every nested result succeeded.
    pub fn all_nested_succeeded(&self) -> bool {
        self.nested.iter().all(|n| n.status.is_success())
    }
}

/// Result of executing one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub steps: Vec<StepResult>,
    pub post_actions: Vec<StepResult>,
    pub metadata: Metadata,
}

impl StageResult {
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            "skip_reason".to_string(),
            serde_json::Value::String(reason.into()),
        );
        Self {
            name: name.into(),
            status: StageStatus::Skipped,
            started_at: None,
            ended_at: None,
            duration: Duration::ZERO,
            steps: Vec::new(),
            post_actions: Vec::new(),
            metadata,
        }
    }
}

/// Result of executing an entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub execution_id: ResourceId,
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub stages: Vec<StageResult>,
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_result_leaf_computes_duration() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(250);
        let result = StepResult::leaf(StepStatus::Success, start, end);
        assert_eq!(result.duration, Duration::from_millis(250));
        assert!(result.nested.is_empty());
    }

    #[test]
    fn composite_success_iff_all_nested_success() {
        let start = Utc::now();
        let ok = StepResult::leaf(StepStatus::Success, start, start);
        let bad = StepResult::leaf(StepStatus::Failure, start, start);

        let all_ok = StepResult::leaf(StepStatus::Success, start, start)
            .with_nested(vec![ok.clone(), ok.clone()]);
        assert!(all_ok.all_nested_succeeded());

        let one_bad =
            StepResult::leaf(StepStatus::Failure, start, start).with_nested(vec![ok, bad]);
        assert!(!one_bad.all_nested_succeeded());
    }
}
