//! `when` condition evaluation (§3, §4.8).

use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;

/// A predicate gating stage execution. Evaluation is side-effect-free and
/// must terminate (§4.8); `AllOf`/`AnyOf` short-circuit in declaration order.
#[derive(Clone)]
pub enum WhenCondition {
    /// Matches a glob `pattern` against the current branch, read from
    /// `GIT_BRANCH` (or `BRANCH_NAME`) in the context environment.
    Branch { pattern: String },
    /// Compares an environment variable's value exactly.
    Environment { name: String, value: String },
    /// Matches a file-change set, supplied out-of-band via context
    /// metadata under the key `"changed_files"`. Per the source's open
    /// question, evaluates to `false` when that metadata is absent.
    ChangeSet {
        patterns: Vec<String>,
        mode: ChangeSetMode,
    },
    /// An opaque caller-supplied predicate.
    Predicate(Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>),
    Not(Box<WhenCondition>),
    AllOf(Vec<WhenCondition>),
    AnyOf(Vec<WhenCondition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetMode {
    /// Any changed file matching any pattern satisfies the condition.
    Any,
    /// Every changed file must match at least one pattern.
    All,
}

impl fmt::Debug for WhenCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhenCondition::Branch { pattern } => {
                f.debug_struct("Branch").field("pattern", pattern).finish()
            }
            WhenCondition::Environment { name, value } => f
                .debug_struct("Environment")
                .field("name", name)
                .field("value", value)
                .finish(),
            WhenCondition::ChangeSet { patterns, mode } => f
                .debug_struct("ChangeSet")
                .field("patterns", patterns)
                .field("mode", mode)
                .finish(),
            WhenCondition::Predicate(_) => f.write_str("Predicate(..)"),
            WhenCondition::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            WhenCondition::AllOf(items) => f.debug_tuple("AllOf").field(items).finish(),
            WhenCondition::AnyOf(items) => f.debug_tuple("AnyOf").field(items).finish(),
        }
    }
}

impl WhenCondition {
    /// Evaluates the condition against a context. Deterministic: invoking
    /// twice on the same context yields the same boolean (invariant 9).
    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        match self {
            WhenCondition::Branch { pattern } => {
                let branch = ctx
                    .environment()
                    .get("GIT_BRANCH")
                    .or_else(|| ctx.environment().get("BRANCH_NAME"))
                    .map(String::as_str)
                    .unwrap_or("");
                glob_match(pattern, branch)
            }
            WhenCondition::Environment { name, value } => {
                ctx.environment().get(name).map(String::as_str) == Some(value.as_str())
            }
            WhenCondition::ChangeSet { patterns, mode } => {
                let changed = match ctx.metadata().get("changed_files") {
                    Some(serde_json::Value::Array(files)) => files
                        .iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>(),
                    _ => return false,
                };
                if changed.is_empty() {
                    return false;
                }
                match mode {
                    ChangeSetMode::Any => changed
                        .iter()
                        .any(|f| patterns.iter().any(|p| glob_match(p, f))),
                    ChangeSetMode::All => changed
                        .iter()
                        .all(|f| patterns.iter().any(|p| glob_match(p, f))),
                }
            }
            WhenCondition::Predicate(f) => f(ctx),
            WhenCondition::Not(inner) => !inner.evaluate(ctx),
            WhenCondition::AllOf(items) => items.iter().all(|c| c.evaluate(ctx)),
            WhenCondition::AnyOf(items) => items.iter().any(|c| c.evaluate(ctx)),
        }
    }
}

/// Glob-matches `pattern` against `text`; malformed patterns fall back to
/// an exact-literal comparison rather than erroring, matching the stash
/// store's "attempt as literal path" fallback (§4.3).
fn glob_match(pattern: &str, text: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(text),
        Err(_) => pattern == text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContextBuilder;

    fn ctx_with_env(pairs: &[(&str, &str)]) -> ExecutionContext {
        let mut builder = ExecutionContextBuilder::new_for_test();
        for (k, v) in pairs {
            builder = builder.with_env(*k, *v);
        }
        builder.build()
    }

    #[test]
    fn branch_glob_matches() {
        let ctx = ctx_with_env(&[("GIT_BRANCH", "release/1.2")]);
        let cond = WhenCondition::Branch {
            pattern: "release/*".to_string(),
        };
        assert!(cond.evaluate(&ctx));
    }

    #[test]
    fn environment_exact_match() {
        let ctx = ctx_with_env(&[("ENV", "dev")]);
        assert!(WhenCondition::Environment {
            name: "ENV".to_string(),
            value: "dev".to_string()
        }
        .evaluate(&ctx));
        assert!(!WhenCondition::Environment {
            name: "ENV".to_string(),
            value: "prod".to_string()
        }
        .evaluate(&ctx));
    }

    #[test]
    fn changeset_without_metadata_is_false() {
        let ctx = ctx_with_env(&[]);
        let cond = WhenCondition::ChangeSet {
            patterns: vec!["src/**".to_string()],
            mode: ChangeSetMode::Any,
        };
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn all_of_short_circuits() {
        let ctx = ctx_with_env(&[("ENV", "dev")]);
        let cond = WhenCondition::AllOf(vec![
            WhenCondition::Environment {
                name: "ENV".to_string(),
                value: "prod".to_string(),
            },
            WhenCondition::Predicate(Arc::new(|_| panic!("should short-circuit"))),
        ]);
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn any_of_short_circuits() {
        let ctx = ctx_with_env(&[("ENV", "dev")]);
        let cond = WhenCondition::AnyOf(vec![
            WhenCondition::Environment {
                name: "ENV".to_string(),
                value: "dev".to_string(),
            },
            WhenCondition::Predicate(Arc::new(|_| panic!("should short-circuit"))),
        ]);
        assert!(cond.evaluate(&ctx));
    }

    #[test]
    fn not_negates() {
        let ctx = ctx_with_env(&[("ENV", "dev")]);
        let cond = WhenCondition::Not(Box::new(WhenCondition::Environment {
            name: "ENV".to_string(),
            value: "dev".to_string(),
        }));
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let ctx = ctx_with_env(&[("ENV", "dev")]);
        let cond = WhenCondition::Environment {
            name: "ENV".to_string(),
            value: "dev".to_string(),
        };
        assert_eq!(cond.evaluate(&ctx), cond.evaluate(&ctx));
    }
}
