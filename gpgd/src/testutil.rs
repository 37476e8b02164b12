//! Shared test fixtures for the engine modules.

use chrono::{DateTime, Utc};
use gpg_common::{
    AgentId, ClusterId, ExecOutcome, ExecutionId, ExecutionPath, FailureCode, PipelineExecution,
    TaskType,
};

use crate::store::ExecutionStore;

/// Builder for execution records with sensible defaults.
pub struct ExecutionBuilder {
    inner: PipelineExecution,
}

impl ExecutionBuilder {
    pub fn new(agent: &str) -> Self {
        Self {
            inner: PipelineExecution {
                id: ExecutionId::generate(),
                agent_id: AgentId::new(agent),
                task_type: TaskType::Coding,
                execution_path: ExecutionPath::Single,
                outcome: ExecOutcome::Success,
                cost_usd: 0.25,
                latency_ms: 800.0,
                recorded_at: Utc::now(),
                cluster_id: None,
            },
        }
    }

    pub fn cluster(mut self, id: &str) -> Self {
        self.inner.cluster_id = Some(ClusterId::new(id));
        self
    }

    pub fn failure(mut self, code: FailureCode) -> Self {
        self.inner.outcome = ExecOutcome::Failure(code);
        self
    }

    pub fn latency(mut self, ms: f64) -> Self {
        self.inner.latency_ms = ms;
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.inner.task_type = task_type;
        self
    }

    pub fn path(mut self, path: ExecutionPath) -> Self {
        self.inner.execution_path = path;
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.inner.recorded_at = at;
        self
    }

    pub fn build(self) -> PipelineExecution {
        self.inner
    }
}

/// Seed a cluster with `successes` + `failures` executions at a fixed latency.
pub fn seed_cluster(
    store: &ExecutionStore,
    cluster: &str,
    agent: &str,
    successes: usize,
    failures: usize,
    latency_ms: f64,
) {
    for _ in 0..successes {
        store
            .append(
                ExecutionBuilder::new(agent)
                    .cluster(cluster)
                    .latency(latency_ms)
                    .build(),
            )
            .unwrap();
    }
    for _ in 0..failures {
        store
            .append(
                ExecutionBuilder::new(agent)
                    .cluster(cluster)
                    .latency(latency_ms)
                    .failure(FailureCode::ToolError)
                    .build(),
            )
            .unwrap();
    }
}
