//! The dispatcher contract (§5).
//!
//! A dispatcher gates how many steps of a given `WorkloadClass` may run
//! concurrently. The concrete named `tokio::sync::Semaphore`-backed pools
//! live in `buildit-scheduler` (alongside the rest of the scheduling
//! machinery); this crate only defines the contract so the step executor
//! (in `buildit-executor`) can acquire capacity without depending on the
//! scheduler crate — the same back-reference pattern as `StepExecutorHandle`
//! and `StashHandle`. Any implementation providing first-come-first-served
//! counting-semaphore behavior per workload class satisfies this contract.

use async_trait::async_trait;

use crate::model::WorkloadClass;

/// An acquired unit of dispatch capacity. Dropping it releases the permit.
/// Implementations box their concrete guard type (e.g.
/// `tokio::sync::OwnedSemaphorePermit`) behind this wrapper.
pub struct DispatchPermit(pub Box<dyn Send + Sync>);

#[async_trait]
pub trait WorkloadDispatcher: Send + Sync {
    /// Waits until capacity for `class` is available and returns a permit
    /// that releases it on drop.
    async fn acquire(&self, class: WorkloadClass) -> DispatchPermit;
}

/// A dispatcher with no capacity limit, used as the default when no
/// scheduler-provided dispatcher is wired in (e.g. in unit tests, or an
/// embedder that doesn't need bounded concurrency).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedDispatcher;

#[async_trait]
impl WorkloadDispatcher for UnboundedDispatcher {
    async fn acquire(&self, _class: WorkloadClass) -> DispatchPermit {
        DispatchPermit(Box::new(()))
    }
}
