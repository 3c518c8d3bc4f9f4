//! Stage definition (§3).

use std::collections::HashMap;
use std::time::Duration;

use super::agent::Agent;
use super::step::Step;
use super::when::WhenCondition;

/// When a post-action runs, relative to the stage's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostActionScope {
    Always,
    Success,
    Failure,
    Changed,
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct PostAction {
    pub scope: PostActionScope,
    pub steps: Vec<Step>,
}

/// An ordered, named phase of the pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub steps: Vec<Step>,
    pub agent: Option<Agent>,
    pub environment: HashMap<String, String>,
    pub when: Option<WhenCondition>,
    pub post_actions: Vec<PostAction>,
    pub fail_fast: bool,
    pub timeout: Option<Duration>,
}

impl Stage {
    pub fn builder(name: impl Into<String>) -> StageBuilder {
        StageBuilder::new(name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("stage name must not be empty".to_string());
        }
        if self.environment.keys().any(|k| k.is_empty()) {
            return Err(format!("stage {:?} has an empty env key", self.name));
        }
        self.steps.iter().try_for_each(Step::validate)
    }
}

pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stage: Stage {
                name: name.into(),
                steps: Vec::new(),
                agent: None,
                environment: HashMap::new(),
                when: None,
                post_actions: Vec::new(),
                fail_fast: true,
                timeout: None,
            },
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.stage.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.stage.steps.extend(steps);
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.stage.agent = Some(agent);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.stage.environment.insert(key.into(), value.into());
        self
    }

    pub fn when(mut self, condition: WhenCondition) -> Self {
        self.stage.when = Some(condition);
        self
    }

    pub fn post(mut self, scope: PostActionScope, steps: Vec<Step>) -> Self {
        self.stage.post_actions.push(PostAction { scope, steps });
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.stage.fail_fast = fail_fast;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.stage.timeout = Some(duration);
        self
    }

    pub fn build(self) -> Stage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_stage() {
        let stage = Stage::builder("build")
            .step(Step::echo("hi"))
            .env("KEY", "value")
            .build();
        assert!(stage.validate().is_ok());
        assert_eq!(stage.name, "build");
    }

    #[test]
    fn empty_name_fails_validation() {
        let stage = Stage::builder("").build();
        assert!(stage.validate().is_err());
    }

    #[test]
    fn empty_env_key_fails_validation() {
        let stage = Stage::builder("build").env("", "value").build();
        assert!(stage.validate().is_err());
    }
}
