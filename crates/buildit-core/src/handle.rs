//! Capability handles back-referenced from `ExecutionContext`.
//!
//! `buildit-core` defines the data model and `ExecutionContext`, but
//! recursive step execution (composite steps like `Dir`/`Retry`/`Parallel`
//! need to invoke the step executor on their nested steps) and stash
//! storage both live in downstream crates (`buildit-executor`,
//! `buildit-stash`) to avoid a circular crate dependency. Both sides agree
//! on these trait contracts instead: `buildit-executor`/`buildit-stash`
//! implement them, `buildit-core` only calls through `Arc<dyn ...>`.

use async_trait::async_trait;
use std::path::Path;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::model::Step;
use crate::result::StepResult;

/// Back-reference from `ExecutionContext` to the event bus (C12, §6), so
/// the step executor and the `Parallel` handler can publish
/// `StepStarted`/`StepCompleted`/`BranchStarted`/`BranchCompleted`/
/// `ErrorOccurred` without this crate depending on `buildit-scheduler`.
/// A concrete publisher is scoped to one stage's execution (it already
/// knows the execution id and stage name), so these methods only need
/// what the call site itself can't supply.
pub trait EventPublisher: Send + Sync {
    fn step_started(&self, step_tag: &'static str);
    fn step_completed(&self, result: &StepResult);
    fn branch_started(&self, branch_name: &str);
    fn branch_completed(&self, branch_name: &str, result: &StepResult);
    fn error_occurred(&self, message: &str, detail: serde_json::Value);
}

/// Default publisher for contexts no embedder has wired an event bus into.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn step_started(&self, _step_tag: &'static str) {}
    fn step_completed(&self, _result: &StepResult) {}
    fn branch_started(&self, _branch_name: &str) {}
    fn branch_completed(&self, _branch_name: &str, _result: &StepResult) {}
    fn error_occurred(&self, _message: &str, _detail: serde_json::Value) {}
}

/// Back-reference from `ExecutionContext` to the step executor (C7), so
/// composite step handlers can recurse into nested steps without this
/// crate depending on `buildit-executor`.
#[async_trait]
pub trait StepExecutorHandle: Send + Sync {
    async fn execute_step(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult>;
}

/// Back-reference from `ExecutionContext` to stash storage (C4), so the
/// `Stash`/`Unstash` handlers can reach it without this crate depending on
/// `buildit-stash`.
#[async_trait]
pub trait StashHandle: Send + Sync {
    async fn stash(
        &self,
        name: &str,
        work_dir: &Path,
        includes: &str,
        excludes: &str,
    ) -> Result<()>;

    async fn unstash(&self, name: &str, work_dir: &Path) -> Result<()>;
}
