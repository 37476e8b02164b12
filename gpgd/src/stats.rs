//! Cluster statistics engine.
//!
//! Recomputes per-cluster aggregates (sample count, success rate, cost
//! and latency means, task-type mix) from the execution store, replacing
//! stored values wholesale rather than patching them incrementally so
//! repeated passes cannot accumulate floating-point drift.
//!
//! Work is chunked over the sorted cluster-id range with a checkpoint
//! committed after every chunk: a pass that runs out of wall-clock budget
//! reports partial completion and the next invocation resumes after the
//! last committed cluster instead of restarting.

use crate::jobs::JobBudget;
use crate::store::{ClusterDirectory, ExecutionStore};
use chrono::Utc;
use gpg_common::util::{mean, percentile};
use gpg_common::{ClusterId, ClusterStats, JobError, PipelineExecution, StatsRecomputeSummary};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ClusterStatsEngine {
    store: Arc<ExecutionStore>,
    clusters: Arc<ClusterDirectory>,
    /// Clusters recomputed between budget checks.
    chunk_size: usize,
}

impl ClusterStatsEngine {
    pub fn new(
        store: Arc<ExecutionStore>,
        clusters: Arc<ClusterDirectory>,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            clusters,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Recompute statistics for every cluster with assigned executions.
    ///
    /// Idempotent: a second pass over unchanged data recommits nothing
    /// and leaves every stored row byte-identical, timestamps included.
    pub async fn recompute_all(
        &self,
        budget: &JobBudget,
    ) -> Result<StatsRecomputeSummary, JobError> {
        let all_ids = self.store.cluster_ids()?;

        let resume_idx = match self.clusters.checkpoint() {
            Some(checkpoint) => match all_ids.binary_search(&checkpoint) {
                Ok(idx) => {
                    info!(resume_after = %checkpoint, "Resuming stats recomputation from checkpoint");
                    idx + 1
                }
                Err(_) => {
                    debug!(checkpoint = %checkpoint, "Checkpoint cluster no longer active, restarting pass");
                    0
                }
            },
            None => 0,
        };

        let mut clusters_updated = 0u64;
        let mut executions_processed = 0u64;
        let mut last_committed = if resume_idx > 0 {
            Some(all_ids[resume_idx - 1].clone())
        } else {
            None
        };

        for chunk in all_ids[resume_idx..].chunks(self.chunk_size) {
            if budget.exhausted() {
                self.clusters.set_checkpoint(last_committed.clone());
                warn!(
                    clusters_updated,
                    executions_processed,
                    "Stats recomputation budget exhausted; checkpointed for the next invocation"
                );
                return Ok(StatsRecomputeSummary {
                    clusters_updated,
                    executions_processed,
                    completed: false,
                });
            }

            let grouped = self.store.executions_for_clusters(chunk)?;
            let prior = self.clusters.snapshot();
            let mut rows = Vec::new();
            for cluster_id in chunk {
                // A listed cluster always has records in the same scan;
                // anything that lost its last record is pruned below.
                let Some(executions) = grouped.get(cluster_id) else {
                    continue;
                };
                executions_processed += executions.len() as u64;
                clusters_updated += 1;

                let row = compute_cluster_row(cluster_id, executions, prior.get(cluster_id));
                let unchanged = prior
                    .get(cluster_id)
                    .is_some_and(|existing| existing.stats_eq(&row));
                if !unchanged {
                    rows.push(row);
                }
            }
            self.clusters.commit_rows(rows);
            last_committed = chunk.last().cloned();
            tokio::task::yield_now().await;
        }

        // Completed pass: clusters with zero assigned executions leave the
        // active set instead of lingering at success rate 0.
        let active: BTreeSet<ClusterId> = all_ids.into_iter().collect();
        self.clusters.retain_only(&active);
        self.clusters.set_checkpoint(None);

        info!(
            clusters_updated,
            executions_processed, "Cluster statistics recomputed"
        );
        Ok(StatsRecomputeSummary {
            clusters_updated,
            executions_processed,
            completed: true,
        })
    }
}

/// Build a full replacement row for one cluster.
///
/// The detector-owned fields (suspicious flag, risk score) carry over from
/// the prior row; this engine never decides them.
fn compute_cluster_row(
    cluster_id: &ClusterId,
    executions: &[PipelineExecution],
    prior: Option<&ClusterStats>,
) -> ClusterStats {
    let sample_count = executions.len() as u64;
    let successes = executions
        .iter()
        .filter(|e| e.outcome.is_success())
        .count() as f64;

    let costs: Vec<f64> = executions.iter().map(|e| e.cost_usd).collect();
    let latencies: Vec<f64> = executions.iter().map(|e| e.latency_ms).collect();

    let mut task_type_counts = BTreeMap::new();
    for execution in executions {
        *task_type_counts.entry(execution.task_type).or_insert(0u64) += 1;
    }
    let multi_step = executions.iter().filter(|e| e.is_multi_step()).count() as f64;

    ClusterStats {
        cluster_id: cluster_id.clone(),
        sample_count,
        success_rate: successes / sample_count as f64,
        mean_cost_usd: mean(&costs),
        mean_latency_ms: mean(&latencies),
        p95_latency_ms: percentile(&latencies, 0.95),
        task_type_counts,
        multi_step_share: multi_step / sample_count as f64,
        suspicious: prior.is_some_and(|p| p.suspicious),
        risk_score: prior.map_or(0.0, |p| p.risk_score),
        recomputed_at: Utc::now(),
    }
}
