//! Named dispatcher pools (§5): one `tokio::sync::Semaphore` per workload
//! class, sized from [`buildit_config::DispatchConfig`]. Implements
//! `buildit_core::WorkloadDispatcher`, the contract the step executor
//! acquires capacity through.

use std::sync::Arc;

use async_trait::async_trait;
use buildit_config::DispatchConfig;
use buildit_core::{DispatchPermit, WorkloadClass, WorkloadDispatcher};
use tokio::sync::Semaphore;

/// Counting-semaphore pool per workload class. `WorkloadClass::Default`
/// shares the `io` pool — it's the class steps fall into when a shell
/// script doesn't match any classification regex, which skews towards
/// ordinary file/process work rather than CPU- or network-bound work.
pub struct DispatcherPools {
    cpu: Arc<Semaphore>,
    io: Arc<Semaphore>,
    network: Arc<Semaphore>,
    blocking: Arc<Semaphore>,
    system: Arc<Semaphore>,
}

impl DispatcherPools {
    pub fn new(config: &DispatchConfig) -> Arc<Self> {
        Arc::new(Self {
            cpu: Arc::new(Semaphore::new(config.cpu_permits)),
            io: Arc::new(Semaphore::new(config.io_permits)),
            network: Arc::new(Semaphore::new(config.network_permits)),
            blocking: Arc::new(Semaphore::new(config.blocking_permits)),
            system: Arc::new(Semaphore::new(config.system_permits)),
        })
    }

    fn pool_for(&self, class: WorkloadClass) -> &Arc<Semaphore> {
        match class {
            WorkloadClass::Cpu => &self.cpu,
            WorkloadClass::Io | WorkloadClass::Default => &self.io,
            WorkloadClass::Network => &self.network,
            WorkloadClass::Blocking => &self.blocking,
            WorkloadClass::System => &self.system,
        }
    }

    /// Current available permits for `class`, for observability.
    pub fn available_permits(&self, class: WorkloadClass) -> usize {
        self.pool_for(class).available_permits()
    }
}

#[async_trait]
impl WorkloadDispatcher for DispatcherPools {
    async fn acquire(&self, class: WorkloadClass) -> DispatchPermit {
        let pool = self.pool_for(class).clone();
        let permit = pool
            .acquire_owned()
            .await
            .expect("dispatcher semaphore is never closed");
        DispatchPermit(Box::new(permit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquiring_a_permit_reduces_available_capacity() {
        let config = DispatchConfig {
            cpu_permits: 1,
            ..DispatchConfig::default()
        };
        let pools = DispatcherPools::new(&config);
        assert_eq!(pools.available_permits(WorkloadClass::Cpu), 1);
        let permit = pools.acquire(WorkloadClass::Cpu).await;
        assert_eq!(pools.available_permits(WorkloadClass::Cpu), 0);
        drop(permit);
        assert_eq!(pools.available_permits(WorkloadClass::Cpu), 1);
    }

    #[tokio::test]
    async fn default_class_shares_the_io_pool() {
        let config = DispatchConfig {
            io_permits: 1,
            ..DispatchConfig::default()
        };
        let pools = DispatcherPools::new(&config);
        let _permit = pools.acquire(WorkloadClass::Default).await;
        assert_eq!(pools.available_permits(WorkloadClass::Io), 0);
    }
}
