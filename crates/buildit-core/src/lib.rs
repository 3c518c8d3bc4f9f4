//! Core domain types and contracts for the BuildIt pipeline engine.
//!
//! This crate contains:
//! - The immutable `Pipeline`/`Stage`/`Step` data model (`model`)
//! - `ExecutionContext`, the collaborator bundle threaded through every
//!   handler invocation (`context`)
//! - The `CommandLauncher` contract, the engine's sole boundary for running
//!   step work (`launcher`)
//! - The `Logger` contract and its default `tracing`-backed implementation
//!   (`logger`)
//! - Capability back-references (`StepExecutorHandle`, `StashHandle`) that
//!   let `ExecutionContext` reach into downstream crates without a circular
//!   dependency (`handle`)
//! - Result/status trees and the error taxonomy (`result`, `status`, `error`)
//! - Resource identifiers (`id`)

pub mod context;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod id;
pub mod launcher;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod result;
pub mod status;

pub use context::{ExecutionContext, ExecutionContextBuilder, JobInfo};
pub use dispatch::{DispatchPermit, UnboundedDispatcher, WorkloadDispatcher};
pub use error::{Error, Result};
pub use handle::{EventPublisher, NoopEventPublisher, StashHandle, StepExecutorHandle};
pub use id::ResourceId;
pub use launcher::{CommandLauncher, CommandOutput, LauncherKind};
pub use logger::{Logger, TracingLogger};
pub use metrics::{MetricsSink, NoopMetricsSink};
pub use model::{
    Agent, Pipeline, PipelineBuilder, PostAction, PostActionScope, Stage, StageBuilder, Step,
    WhenCondition, WorkloadClass,
};
pub use result::{Metadata, PipelineResult, StageResult, StepResult};
pub use status::{PipelineStatus, StageStatus, StepStatus};
