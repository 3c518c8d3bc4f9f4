//! Pipeline/stage scheduling, dispatch pools, fault tolerance, and the
//! event bus for the BuildIt pipeline engine.
//!
//! - `dispatch` implements §5's named dispatcher pools.
//! - `event_bus` implements C12, the in-process lifecycle pub/sub.
//! - `fault_tolerance` implements C10: circuit breaker, jittered-backoff
//!   retry policy, bulkhead, and graceful degradation.
//! - `stage_executor`/`pipeline_executor` implement C8/C9.

pub mod dispatch;
pub mod error;
pub mod event_bus;
pub mod fault_tolerance;
pub mod pipeline_executor;
pub mod stage_executor;

pub use dispatch::DispatcherPools;
pub use error::{SchedulerError, SchedulerResult};
pub use event_bus::{Event, EventBus, EventSubscription};
pub use fault_tolerance::{
    Bulkhead, CircuitBreaker, CircuitState, DegradationGuard, GracefulDegradation, Priority,
    RetryPolicy,
};
pub use pipeline_executor::PipelineExecutor;
pub use stage_executor::{effective_agent, execute_stage, AgentResolver};
