//! `EngineConfig`: the configuration surface the engine reads (§6).
//!
//! Plain, `serde`-deserializable data with a `Default` for every field, so
//! an embedder can construct it programmatically without touching KDL at
//! all (SPEC_FULL §10.3). Durations are stored as millisecond counts
//! because `serde` has no native `Duration` support and this crate avoids
//! pulling in `serde_with` for one conversion; `*_ms` fields pair with a
//! `Duration`-typed accessor for callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// §6 "maxConcurrentPipelines", "defaultFailFast".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_pipelines: usize,
    pub default_fail_fast: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: 8,
            default_fail_fast: true,
        }
    }
}

/// §6 "defaultStageTimeout, defaultStepTimeout, globalTimeout".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub default_stage_timeout_ms: Option<u64>,
    pub default_step_timeout_ms: Option<u64>,
    pub global_timeout_ms: Option<u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default_stage_timeout_ms: Some(3_600_000),
            default_step_timeout_ms: Some(1_800_000),
            global_timeout_ms: None,
        }
    }
}

impl TimeoutsConfig {
    pub fn default_stage_timeout(&self) -> Option<Duration> {
        self.default_stage_timeout_ms.map(Duration::from_millis)
    }

    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_ms.map(Duration::from_millis)
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_ms.map(Duration::from_millis)
    }
}

/// §6 "maxRetryAttempts, retryBaseDelay, retryMaxDelay" plus the
/// multiplier/jitter knobs §4.10's `RetryPolicy` needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// §5 dispatcher sizes per workload class, plus the event bus's buffer
/// size since both are "how big is this channel/pool" knobs read at
/// startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub cpu_permits: usize,
    pub io_permits: usize,
    pub network_permits: usize,
    pub blocking_permits: usize,
    pub system_permits: usize,
    pub event_channel_buffer_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            cpu_permits: cpus,
            io_permits: (cpus * 8).max(64),
            network_permits: (cpus * 16).max(256),
            blocking_permits: 32,
            system_permits: 1,
            event_channel_buffer_size: 1024,
        }
    }
}

/// §4.10 circuit breaker / bulkhead / graceful degradation thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    pub circuit_failure_threshold: u32,
    pub circuit_window_ms: u64,
    pub circuit_half_open_retry_timeout_ms: u64,
    pub bulkhead_max_concurrent_calls: usize,
    pub bulkhead_acquire_timeout_ms: u64,
    pub max_load_threshold: f64,
    pub max_error_rate_threshold: f64,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: 5,
            circuit_window_ms: 60_000,
            circuit_half_open_retry_timeout_ms: 30_000,
            bulkhead_max_concurrent_calls: 16,
            bulkhead_acquire_timeout_ms: 5_000,
            max_load_threshold: 0.9,
            max_error_rate_threshold: 0.5,
        }
    }
}

impl FaultToleranceConfig {
    pub fn circuit_window(&self) -> Duration {
        Duration::from_millis(self.circuit_window_ms)
    }

    pub fn circuit_half_open_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_half_open_retry_timeout_ms)
    }

    pub fn bulkhead_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.bulkhead_acquire_timeout_ms)
    }
}

/// §6 "cache: maxCacheSize, maxCacheAge, backgroundCleanupInterval".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSectionConfig {
    pub max_cache_size_bytes: u64,
    pub max_cache_age_ms: u64,
    pub background_cleanup_interval_ms: u64,
}

impl Default for CacheSectionConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 512 * 1024 * 1024,
            max_cache_age_ms: 24 * 3_600_000,
            background_cleanup_interval_ms: 300_000,
        }
    }
}

impl CacheSectionConfig {
    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age_ms)
    }

    pub fn background_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.background_cleanup_interval_ms)
    }

    pub fn to_cache_config(self) -> buildit_cache::CacheConfig {
        buildit_cache::CacheConfig {
            max_cache_size_bytes: self.max_cache_size_bytes,
            max_cache_age: self.max_cache_age(),
            background_cleanup_interval: self.background_cleanup_interval(),
        }
    }
}

/// The full configuration surface the engine reads (§6), grouped into the
/// KDL sections `concurrency`, `timeouts`, `retry`, `dispatch`,
/// `fault-tolerance`, `cache`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub fault_tolerance: FaultToleranceConfig,
    pub cache: CacheSectionConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dispatch_sizes_respect_the_spec_minimums() {
        let dispatch = DispatchConfig::default();
        assert!(dispatch.io_permits >= 64);
        assert!(dispatch.network_permits >= 256);
        assert_eq!(dispatch.system_permits, 1);
    }

    #[test]
    fn default_config_round_trips_through_cache_config() {
        let cache = CacheSectionConfig::default().to_cache_config();
        assert_eq!(cache.max_cache_size_bytes, 512 * 1024 * 1024);
    }
}
