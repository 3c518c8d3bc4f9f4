//! The pipeline executor (C9, §4.9): admission control, stage iteration,
//! the optional global deadline, and status roll-up.
//!
//! The fault-tolerance envelope (§4.10) wraps *admission* to a stage
//! execution — the bulkhead bounding concurrent in-flight stages and the
//! circuit breaker tripping on sustained bulkhead rejections — not the
//! stage's own business outcome. A stage that runs to completion and ends
//! in `Failure` is not itself a fault-tolerance event: `Step::Retry`
//! already gives pipeline authors outcome-level retries at the step where
//! they belong, so folding business failures into the same envelope would
//! conflate "the system is overloaded" with "the build failed," which
//! should never trip a circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use buildit_core::{
    Agent, ExecutionContext, Pipeline, PipelineResult, PipelineStatus, ResourceId, StageResult,
    StageStatus,
};
use buildit_config::EngineConfig;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::event_bus::{Event, EventBus};
use crate::fault_tolerance::{Bulkhead, CircuitBreaker};
use crate::stage_executor::{execute_stage, AgentResolver};

fn rejected_stage_result(name: &str, reason: &str) -> StageResult {
    let mut result = StageResult::skipped(name, reason);
    result.status = StageStatus::Cancelled;
    result
}

/// Runs pipelines end to end: admission (`maxConcurrentPipelines`),
/// per-stage fault tolerance, halt decisions, the optional global
/// deadline, and status roll-up.
pub struct PipelineExecutor {
    concurrency: Arc<Semaphore>,
    default_fail_fast: bool,
    global_timeout: Option<Duration>,
    bus: Arc<EventBus>,
    circuit_breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
    agent_resolver: Option<Arc<dyn AgentResolver>>,
}

impl PipelineExecutor {
    pub fn new(config: &EngineConfig, bus: Arc<EventBus>) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(config.concurrency.max_concurrent_pipelines)),
            default_fail_fast: config.concurrency.default_fail_fast,
            global_timeout: config.timeouts.global_timeout(),
            bus,
            circuit_breaker: CircuitBreaker::new(config.fault_tolerance),
            bulkhead: Bulkhead::new(&config.fault_tolerance),
            retry_max_attempts: config.retry.max_attempts,
            retry_base_delay_ms: config.retry.base_delay_ms,
            agent_resolver: None,
        }
    }

    pub fn with_agent_resolver(mut self, resolver: Arc<dyn AgentResolver>) -> Self {
        self.agent_resolver = Some(resolver);
        self
    }

    /// Admits one stage execution through the fault-tolerance envelope,
    /// retrying bulkhead rejections up to the configured retry budget
    /// before giving up and returning a synthetic cancelled `StageResult`.
    async fn admit_and_run_stage(
        &self,
        stage: &buildit_core::Stage,
        pipeline_agent: Option<&Agent>,
        ctx: &ExecutionContext,
        previous_outcome: Option<StageStatus>,
    ) -> StageResult {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.circuit_breaker.allow() {
                warn!(stage = %stage.name, "circuit breaker open, rejecting stage admission");
                return rejected_stage_result(&stage.name, "rejected: circuit breaker open");
            }
            match self.bulkhead.acquire().await {
                Ok(permit) => {
                    let result = execute_stage(
                        stage,
                        pipeline_agent,
                        ctx,
                        &self.bus,
                        self.agent_resolver.as_deref(),
                        previous_outcome,
                    )
                    .await;
                    drop(permit);
                    self.circuit_breaker.record_success();
                    return result;
                }
                Err(_) => {
                    self.circuit_breaker.record_failure();
                    if attempt >= self.retry_max_attempts {
                        warn!(stage = %stage.name, "bulkhead saturated past retry budget, giving up");
                        return rejected_stage_result(&stage.name, "rejected: bulkhead saturated");
                    }
                    tokio::time::sleep(Duration::from_millis(self.retry_base_delay_ms)).await;
                }
            }
        }
    }

    async fn run_stages(
        &self,
        pipeline: &Pipeline,
        ctx: &ExecutionContext,
    ) -> Vec<StageResult> {
        let mut results = Vec::with_capacity(pipeline.stages.len());
        let mut prior_outcomes: HashMap<String, StageStatus> = HashMap::new();
        for stage in &pipeline.stages {
            let previous_outcome = prior_outcomes.get(&stage.name).copied();
            let result = self
                .admit_and_run_stage(stage, pipeline.agent.as_ref(), ctx, previous_outcome)
                .await;
            prior_outcomes.insert(stage.name.clone(), result.status);

            let halt = (result.status == StageStatus::Failure && self.default_fail_fast)
                || result.status == StageStatus::Timeout
                || result.status == StageStatus::Cancelled;
            results.push(result);
            if halt {
                break;
            }
        }
        results
    }

    /// Executes `pipeline` to completion, publishing lifecycle events along
    /// the way (§4.9).
    pub async fn execute(&self, pipeline: &Pipeline, ctx: &ExecutionContext) -> PipelineResult {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("pipeline concurrency semaphore is never closed");

        let execution_id: ResourceId = ctx.execution_id;
        let started_at = Utc::now();
        info!(pipeline_id = %pipeline.id, %execution_id, "pipeline started");
        self.bus.publish(Event::PipelineStarted {
            execution_id,
            timestamp: started_at,
            pipeline_id: pipeline.id.clone(),
        });

        let stages = match self.global_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, self.run_stages(pipeline, ctx)).await
            {
                Ok(stages) => stages,
                Err(_) => {
                    warn!(pipeline_id = %pipeline.id, "pipeline exceeded global timeout");
                    let ended_at = Utc::now();
                    let result = PipelineResult {
                        execution_id,
                        pipeline_id: pipeline.id.clone(),
                        status: PipelineStatus::Timeout,
                        started_at,
                        ended_at,
                        duration: (ended_at - started_at).to_std().unwrap_or_default(),
                        stages: Vec::new(),
                        metadata: HashMap::new(),
                    };
                    self.bus.publish(Event::PipelineCompleted {
                        execution_id,
                        timestamp: ended_at,
                        result: Box::new(result.clone()),
                    });
                    return result;
                }
            },
            None => self.run_stages(pipeline, ctx).await,
        };

        let ended_at = Utc::now();
        let status = PipelineStatus::rollup(stages.iter().map(|s| &s.status));
        let result = PipelineResult {
            execution_id,
            pipeline_id: pipeline.id.clone(),
            status,
            started_at,
            ended_at,
            duration: (ended_at - started_at).to_std().unwrap_or_default(),
            stages,
            metadata: pipeline.metadata.clone(),
        };

        info!(pipeline_id = %pipeline.id, %execution_id, status = ?result.status, "pipeline completed");
        self.bus.publish(Event::PipelineCompleted {
            execution_id,
            timestamp: ended_at,
            result: Box::new(result.clone()),
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::model::Step;
    use buildit_core::Stage;

    fn executor() -> PipelineExecutor {
        PipelineExecutor::new(&EngineConfig::default(), Arc::new(EventBus::new(64)))
    }

    #[tokio::test]
    async fn empty_pipeline_succeeds() {
        let pipeline = Pipeline::builder("p").build();
        let ctx = ExecutionContext::new_for_test();
        let result = executor().execute(&pipeline, &ctx).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert!(result.stages.is_empty());
    }

    #[tokio::test]
    async fn all_stages_success_rolls_up_to_success() {
        let pipeline = Pipeline::builder("p")
            .stage(Stage::builder("build").step(Step::echo("a")).build())
            .stage(Stage::builder("test").step(Step::echo("b")).build())
            .build();
        let ctx = ExecutionContext::new_for_test();
        let result = executor().execute(&pipeline, &ctx).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.stages.len(), 2);
    }

    #[tokio::test]
    async fn skipped_stage_does_not_halt_the_pipeline() {
        let pipeline = Pipeline::builder("p")
            .stage(
                Stage::builder("build")
                    .step(Step::echo("a"))
                    .when(buildit_core::WhenCondition::Environment {
                        name: "NEVER".to_string(),
                        value: "set".to_string(),
                    })
                    .build(),
            )
            .stage(Stage::builder("test").step(Step::echo("b")).build())
            .build();
        let ctx = ExecutionContext::new_for_test();
        let result = executor().execute(&pipeline, &ctx).await;
        assert_eq!(result.stages.len(), 2);
        assert_eq!(result.stages[0].status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn concurrency_limit_serializes_pipeline_execution() {
        let config = EngineConfig {
            concurrency: buildit_config::ConcurrencyConfig {
                max_concurrent_pipelines: 1,
                default_fail_fast: true,
            },
            ..EngineConfig::default()
        };
        let exec = PipelineExecutor::new(&config, Arc::new(EventBus::new(64)));
        let pipeline = Pipeline::builder("p")
            .stage(Stage::builder("build").step(Step::echo("a")).build())
            .build();
        let ctx = ExecutionContext::new_for_test();
        let (a, b) = tokio::join!(
            exec.execute(&pipeline, &ctx),
            exec.execute(&pipeline, &ctx)
        );
        assert_eq!(a.status, PipelineStatus::Success);
        assert_eq!(b.status, PipelineStatus::Success);
    }
}
