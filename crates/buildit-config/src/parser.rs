//! KDL parsing for [`EngineConfig`] (§10.3).
//!
//! The document is a flat list of section nodes — `concurrency`,
//! `timeouts`, `retry`, `dispatch`, `fault-tolerance`, `cache` — each
//! holding a block of single-value child nodes named in kebab-case. A
//! section or a child node that's absent just keeps its `Default`; an
//! unrecognized node name is a hard parse error rather than silently
//! ignored, so a typo in a config file surfaces immediately.
//!
//! Example:
//!
//! ```kdl
//! concurrency {
//!     max-concurrent-pipelines 16
//!     default-fail-fast true
//! }
//! retry {
//!     max-attempts 5
//!     base-delay-ms 250
//! }
//! ```

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::engine::{
    CacheSectionConfig, ConcurrencyConfig, DispatchConfig, EngineConfig, FaultToleranceConfig,
    RetryConfig, TimeoutsConfig,
};
use crate::error::{ConfigError, ConfigResult};

pub fn parse_engine_config(text: &str) -> ConfigResult<EngineConfig> {
    let doc: KdlDocument = text.parse()?;
    let mut config = EngineConfig::default();

    for node in doc.nodes() {
        let section = node.name().value();
        let children = node.children().map(|c| c.nodes()).unwrap_or(&[]);
        match section {
            "concurrency" => parse_concurrency(children, &mut config.concurrency)?,
            "timeouts" => parse_timeouts(children, &mut config.timeouts)?,
            "retry" => parse_retry(children, &mut config.retry)?,
            "dispatch" => parse_dispatch(children, &mut config.dispatch)?,
            "fault-tolerance" => parse_fault_tolerance(children, &mut config.fault_tolerance)?,
            "cache" => parse_cache(children, &mut config.cache)?,
            other => {
                return Err(ConfigError::UnknownNode {
                    section: "<document>".to_string(),
                    node: other.to_string(),
                });
            }
        }
    }

    Ok(config)
}

fn arg_value<'a>(node: &'a KdlNode) -> Option<&'a KdlValue> {
    node.entries().iter().find(|e| e.name().is_none()).map(|e| e.value())
}

fn require_u64(section: &str, node: &KdlNode) -> ConfigResult<u64> {
    let name = node.name().value().to_string();
    let value = arg_value(node).ok_or_else(|| ConfigError::MissingArgument { node: name.clone() })?;
    value
        .as_integer()
        .map(|i| i as u64)
        .ok_or_else(|| invalid_value(section, &name, "expected an integer"))
}

fn require_usize(section: &str, node: &KdlNode) -> ConfigResult<usize> {
    require_u64(section, node).map(|v| v as usize)
}

fn require_u32(section: &str, node: &KdlNode) -> ConfigResult<u32> {
    require_u64(section, node).map(|v| v as u32)
}

fn require_f64(section: &str, node: &KdlNode) -> ConfigResult<f64> {
    let name = node.name().value().to_string();
    let value = arg_value(node).ok_or_else(|| ConfigError::MissingArgument { node: name.clone() })?;
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
        .ok_or_else(|| invalid_value(section, &name, "expected a number"))
}

fn require_bool(section: &str, node: &KdlNode) -> ConfigResult<bool> {
    let name = node.name().value().to_string();
    let value = arg_value(node).ok_or_else(|| ConfigError::MissingArgument { node: name.clone() })?;
    value
        .as_bool()
        .ok_or_else(|| invalid_value(section, &name, "expected a boolean"))
}

fn require_u64_opt(section: &str, node: &KdlNode) -> ConfigResult<Option<u64>> {
    match arg_value(node) {
        None => Ok(None),
        Some(KdlValue::Null) => Ok(None),
        Some(value) => value
            .as_integer()
            .map(|i| Some(i as u64))
            .ok_or_else(|| invalid_value(section, node.name().value(), "expected an integer or null")),
    }
}

fn invalid_value(section: &str, field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: format!("{section}.{field}"),
        message: message.to_string(),
    }
}

fn unknown(section: &str, node: &KdlNode) -> ConfigError {
    ConfigError::UnknownNode {
        section: section.to_string(),
        node: node.name().value().to_string(),
    }
}

fn parse_concurrency(nodes: &[KdlNode], out: &mut ConcurrencyConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "max-concurrent-pipelines" => {
                out.max_concurrent_pipelines = require_usize("concurrency", node)?
            }
            "default-fail-fast" => out.default_fail_fast = require_bool("concurrency", node)?,
            _ => return Err(unknown("concurrency", node)),
        }
    }
    Ok(())
}

fn parse_timeouts(nodes: &[KdlNode], out: &mut TimeoutsConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "default-stage-timeout-ms" => {
                out.default_stage_timeout_ms = require_u64_opt("timeouts", node)?
            }
            "default-step-timeout-ms" => {
                out.default_step_timeout_ms = require_u64_opt("timeouts", node)?
            }
            "global-timeout-ms" => out.global_timeout_ms = require_u64_opt("timeouts", node)?,
            _ => return Err(unknown("timeouts", node)),
        }
    }
    Ok(())
}

fn parse_retry(nodes: &[KdlNode], out: &mut RetryConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "max-attempts" => out.max_attempts = require_u32("retry", node)?,
            "base-delay-ms" => out.base_delay_ms = require_u64("retry", node)?,
            "max-delay-ms" => out.max_delay_ms = require_u64("retry", node)?,
            "multiplier" => out.multiplier = require_f64("retry", node)?,
            "jitter-ms" => out.jitter_ms = require_u64("retry", node)?,
            _ => return Err(unknown("retry", node)),
        }
    }
    Ok(())
}

fn parse_dispatch(nodes: &[KdlNode], out: &mut DispatchConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "cpu-permits" => out.cpu_permits = require_usize("dispatch", node)?,
            "io-permits" => out.io_permits = require_usize("dispatch", node)?,
            "network-permits" => out.network_permits = require_usize("dispatch", node)?,
            "blocking-permits" => out.blocking_permits = require_usize("dispatch", node)?,
            "system-permits" => out.system_permits = require_usize("dispatch", node)?,
            "event-channel-buffer-size" => {
                out.event_channel_buffer_size = require_usize("dispatch", node)?
            }
            _ => return Err(unknown("dispatch", node)),
        }
    }
    Ok(())
}

fn parse_fault_tolerance(nodes: &[KdlNode], out: &mut FaultToleranceConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "circuit-failure-threshold" => {
                out.circuit_failure_threshold = require_u32("fault-tolerance", node)?
            }
            "circuit-window-ms" => out.circuit_window_ms = require_u64("fault-tolerance", node)?,
            "circuit-half-open-retry-timeout-ms" => {
                out.circuit_half_open_retry_timeout_ms = require_u64("fault-tolerance", node)?
            }
            "bulkhead-max-concurrent-calls" => {
                out.bulkhead_max_concurrent_calls = require_usize("fault-tolerance", node)?
            }
            "bulkhead-acquire-timeout-ms" => {
                out.bulkhead_acquire_timeout_ms = require_u64("fault-tolerance", node)?
            }
            "max-load-threshold" => {
                out.max_load_threshold = require_f64("fault-tolerance", node)?
            }
            "max-error-rate-threshold" => {
                out.max_error_rate_threshold = require_f64("fault-tolerance", node)?
            }
            _ => return Err(unknown("fault-tolerance", node)),
        }
    }
    Ok(())
}

fn parse_cache(nodes: &[KdlNode], out: &mut CacheSectionConfig) -> ConfigResult<()> {
    for node in nodes {
        match node.name().value() {
            "max-cache-size-bytes" => out.max_cache_size_bytes = require_u64("cache", node)?,
            "max-cache-age-ms" => out.max_cache_age_ms = require_u64("cache", node)?,
            "background-cleanup-interval-ms" => {
                out.background_cleanup_interval_ms = require_u64("cache", node)?
            }
            _ => return Err(unknown("cache", node)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_engine_config("").unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(
            config.concurrency.max_concurrent_pipelines,
            defaults.concurrency.max_concurrent_pipelines
        );
    }

    #[test]
    fn overrides_apply_and_other_sections_keep_defaults() {
        let text = r#"
            concurrency {
                max-concurrent-pipelines 16
                default-fail-fast false
            }
            retry {
                max-attempts 5
                multiplier 1.5
            }
        "#;
        let config = parse_engine_config(text).unwrap();
        assert_eq!(config.concurrency.max_concurrent_pipelines, 16);
        assert!(!config.concurrency.default_fail_fast);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
        assert_eq!(
            config.dispatch.io_permits,
            DispatchConfig::default().io_permits
        );
    }

    #[test]
    fn null_timeout_clears_the_default() {
        let text = r#"
            timeouts {
                global-timeout-ms null
            }
        "#;
        let config = parse_engine_config(text).unwrap();
        assert_eq!(config.timeouts.global_timeout_ms, None);
    }

    #[test]
    fn unknown_node_in_known_section_is_an_error() {
        let text = r#"
            concurrency {
                max-concurrent-frobnicators 16
            }
        "#;
        let err = parse_engine_config(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { .. }));
    }

    #[test]
    fn unknown_top_level_section_is_an_error() {
        let err = parse_engine_config("bogus-section {\n}\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { .. }));
    }

    #[test]
    fn malformed_kdl_is_a_parse_error() {
        let err = parse_engine_config("concurrency {").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
