//! Engine configuration for the pipeline execution runtime (§6, §10.3).
//!
//! `EngineConfig` is plain, `serde`-deserializable data with a `Default`
//! for every field, so an embedder can build one programmatically without
//! ever touching KDL. [`kdl::parse_engine_config`] is the on-disk path:
//! a small, strict KDL document with one node per configuration section.

pub mod engine;
pub mod error;
pub mod parser;

pub use engine::{
    CacheSectionConfig, ConcurrencyConfig, DispatchConfig, EngineConfig, FaultToleranceConfig,
    RetryConfig, TimeoutsConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use parser::parse_engine_config;
