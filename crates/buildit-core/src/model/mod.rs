//! The immutable pipeline/stage/step data model (C1).

mod agent;
mod pipeline;
mod stage;
mod step;
mod when;

pub use agent::Agent;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use stage::{PostAction, PostActionScope, Stage, StageBuilder};
pub use step::{Step, WorkloadClass};
pub use when::{ChangeSetMode, WhenCondition};
