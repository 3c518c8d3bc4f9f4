//! Step variants (§3).

use std::time::Duration;

/// A hint used by the step executor to pick a dispatcher (§4.4, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadClass {
    Cpu,
    Io,
    Network,
    Blocking,
    System,
    Default,
}

/// A single unit of work, possibly composite. Sealed by construction: this
/// crate is the only place new variants are added.
#[derive(Debug, Clone)]
pub enum Step {
    Shell {
        script: String,
        timeout: Option<Duration>,
        workload_hint: Option<WorkloadClass>,
    },
    Echo {
        message: String,
    },
    Dir {
        path: String,
        steps: Vec<Step>,
    },
    WithEnv {
        variables: Vec<(String, String)>,
        steps: Vec<Step>,
    },
    Parallel {
        branches: Vec<(String, Vec<Step>)>,
        /// Whether the first branch failure cancels the peers still
        /// running, or whether peers are left to finish (§9 open
        /// question, pinned here as a per-`Parallel` setting).
        fail_fast: bool,
    },
    Retry {
        times: u32,
        steps: Vec<Step>,
    },
    Timeout {
        duration: Duration,
        steps: Vec<Step>,
    },
    ArchiveArtifacts {
        pattern: String,
        allow_empty: bool,
        fingerprint: bool,
    },
    PublishTestResults {
        pattern: String,
        allow_empty: bool,
    },
    Stash {
        name: String,
        includes: String,
        excludes: String,
    },
    Unstash {
        name: String,
    },
}

impl Step {
    /// A short, stable tag identifying the step's variant, used as the
    /// handler registry key (C5).
    pub fn variant_tag(&self) -> &'static str {
        match self {
            Step::Shell { .. } => "shell",
            Step::Echo { .. } => "echo",
            Step::Dir { .. } => "dir",
            Step::WithEnv { .. } => "withEnv",
            Step::Parallel { .. } => "parallel",
            Step::Retry { .. } => "retry",
            Step::Timeout { .. } => "timeout",
            Step::ArchiveArtifacts { .. } => "archiveArtifacts",
            Step::PublishTestResults { .. } => "publishTestResults",
            Step::Stash { .. } => "stash",
            Step::Unstash { .. } => "unstash",
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Step::Shell {
            script: script.into(),
            timeout: None,
            workload_hint: None,
        }
    }

    pub fn echo(message: impl Into<String>) -> Self {
        Step::Echo {
            message: message.into(),
        }
    }

    /// Structural validation independent of any context — checks the
    /// invariants in §3 that can be decided from the step alone (e.g.
    /// `Timeout` duration bounds, `Retry` attempt count).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Step::Timeout { duration, steps } => {
                if duration.is_zero() || *duration > Duration::from_secs(24 * 3600) {
                    return Err(format!(
                        "timeout duration must be > 0 and <= 24h, got {:?}",
                        duration
                    ));
                }
                if steps.is_empty() {
                    return Err("timeout step requires at least one nested step".to_string());
                }
                steps.iter().try_for_each(Step::validate)
            }
            Step::Retry { times, steps } => {
                if *times == 0 {
                    return Err("retry times must be positive".to_string());
                }
                steps.iter().try_for_each(Step::validate)
            }
            Step::Dir { steps, .. } | Step::WithEnv { steps, .. } => {
                steps.iter().try_for_each(Step::validate)
            }
            Step::Parallel { branches, .. } => branches
                .iter()
                .flat_map(|(_, steps)| steps.iter())
                .try_for_each(Step::validate),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_is_invalid() {
        let step = Step::Timeout {
            duration: Duration::ZERO,
            steps: vec![Step::echo("hi")],
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn timeout_over_24h_is_invalid() {
        let step = Step::Timeout {
            duration: Duration::from_secs(25 * 3600),
            steps: vec![Step::echo("hi")],
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn timeout_requires_nonempty_steps() {
        let step = Step::Timeout {
            duration: Duration::from_secs(1),
            steps: vec![],
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn retry_requires_positive_times() {
        let step = Step::Retry {
            times: 0,
            steps: vec![Step::echo("hi")],
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn variant_tags_are_stable() {
        assert_eq!(Step::echo("x").variant_tag(), "echo");
        assert_eq!(Step::shell("x").variant_tag(), "shell");
    }
}
