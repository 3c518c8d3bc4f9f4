//! Pipeline definition (§3).

use std::collections::HashMap;

use super::agent::Agent;
use super::stage::Stage;

/// A CI/CD pipeline definition. Immutable once built; `id` is unique per
/// execution.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: String,
    pub stages: Vec<Stage>,
    pub global_environment: HashMap<String, String>,
    pub agent: Option<Agent>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Pipeline {
    pub fn builder(id: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(id)
    }

    /// Validates the invariants in §3: non-empty id, unique stage names, no
    /// empty env keys. An empty pipeline (zero stages) is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("pipeline id must not be empty".to_string());
        }
        if self.global_environment.keys().any(|k| k.is_empty()) {
            return Err("pipeline has an empty global env key".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(format!("duplicate stage name: {}", stage.name));
            }
            stage.validate()?;
        }
        Ok(())
    }
}

pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline {
                id: id.into(),
                stages: Vec::new(),
                global_environment: HashMap::new(),
                agent: None,
                metadata: HashMap::new(),
            },
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pipeline
            .global_environment
            .insert(key.into(), value.into());
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.pipeline.agent = Some(agent);
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::step::Step;

    #[test]
    fn empty_pipeline_is_valid() {
        let pipeline = Pipeline::builder("p").build();
        assert!(pipeline.validate().is_ok());
        assert!(pipeline.stages.is_empty());
    }

    #[test]
    fn duplicate_stage_names_rejected() {
        let pipeline = Pipeline::builder("p")
            .stage(Stage::builder("build").step(Step::echo("a")).build())
            .stage(Stage::builder("build").step(Step::echo("b")).build())
            .build();
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn empty_id_rejected() {
        let pipeline = Pipeline::builder("").build();
        assert!(pipeline.validate().is_err());
    }
}
