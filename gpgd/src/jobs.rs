//! Recomputation job orchestration.
//!
//! Jobs are bounded, single-invocation batch tasks fired by an external
//! trigger. Each invocation carries a [`JobBudget`]: a wall-clock ceiling
//! plus a cooperative abort flag, checked between chunks of work. An
//! exhausted budget checkpoints and reports partial completion; it never
//! truncates silently, and a failed invocation leaves the previously
//! committed snapshots untouched.
//!
//! The only ordering the engines require is enforced here: within one
//! graph pass, cluster statistics are fully recomputed before the
//! integrity detector evaluates them.

#![allow(dead_code)] // Abort handles are exercised by the job tests.

use crate::caches::SignalCaches;
use crate::events::EventBus;
use crate::integrity::IntegrityDetector;
use crate::metrics::Metrics;
use crate::reliability::ReliabilityEngine;
use crate::stats::ClusterStatsEngine;
use gpg_common::{GpgConfig, IntegritySummary, JobError, ReliabilitySummary, StatsRecomputeSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const STATS_JOB: &str = "recompute-stats";
const INTEGRITY_JOB: &str = "integrity";
const RELIABILITY_JOB: &str = "recompute-reliability";

// ── Job Budget ─────────────────────────────────────────────────────────────

/// Wall-clock ceiling and cooperative abort for one job invocation.
#[derive(Clone)]
pub struct JobBudget {
    deadline: Option<Instant>,
    abort: Arc<AtomicBool>,
}

impl JobBudget {
    /// Budget that expires `limit` from now.
    pub fn new(limit: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + limit),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Budget with no deadline; still abortable.
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the job should stop at the next chunk boundary.
    pub fn exhausted(&self) -> bool {
        if self.abort.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Request cooperative abort, e.g. when the external trigger times
    /// out. Committed work stays committed.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }
}

// ── Summaries ──────────────────────────────────────────────────────────────

/// Combined result of one graph pass: statistics, then integrity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPassSummary {
    pub stats: StatsRecomputeSummary,
    pub integrity: IntegritySummary,
}

// ── Runner ─────────────────────────────────────────────────────────────────

/// Entry points the trigger boundary invokes. All idempotent and safe to
/// call more often than strictly necessary.
pub struct JobRunner {
    stats: ClusterStatsEngine,
    integrity: IntegrityDetector,
    reliability: ReliabilityEngine,
    caches: Arc<SignalCaches>,
    events: EventBus,
    metrics: Arc<Metrics>,
    config: Arc<GpgConfig>,
}

impl JobRunner {
    pub fn new(
        stats: ClusterStatsEngine,
        integrity: IntegrityDetector,
        reliability: ReliabilityEngine,
        caches: Arc<SignalCaches>,
        events: EventBus,
        metrics: Arc<Metrics>,
        config: Arc<GpgConfig>,
    ) -> Self {
        Self {
            stats,
            integrity,
            reliability,
            caches,
            events,
            metrics,
            config,
        }
    }

    /// One graph pass: recompute cluster statistics, then re-derive the
    /// suspicious flags over the freshly committed rows.
    pub async fn run_stats_pass(&self) -> Result<GraphPassSummary, JobError> {
        let started = Instant::now();
        self.events.job_started(STATS_JOB);
        let budget = JobBudget::new(self.config.job_budget());

        let stats = match self.stats.recompute_all(&budget).await {
            Ok(summary) => summary,
            Err(err) => {
                self.metrics.observe_job(STATS_JOB, "error", started.elapsed());
                self.events.job_failed(STATS_JOB, &err.to_string());
                return Err(err);
            }
        };

        // The stats engine has returned, so every cluster this pass
        // covered is fully committed before the detector reads it.
        let integrity = self.integrity.flag_suspicious();

        let outcome = if stats.completed { "ok" } else { "partial" };
        self.metrics.observe_job(STATS_JOB, outcome, started.elapsed());
        let summary = GraphPassSummary { stats, integrity };
        self.events.job_completed(STATS_JOB, &summary);

        let pruned = self.caches.prune_all();
        if pruned > 0 {
            debug!(pruned, "Pruned expired cache entries after graph pass");
        }
        Ok(summary)
    }

    /// Standalone integrity pass over the current committed snapshot.
    pub fn run_integrity_pass(&self) -> IntegritySummary {
        let started = Instant::now();
        self.events.job_started(INTEGRITY_JOB);
        let summary = self.integrity.flag_suspicious();
        self.metrics
            .observe_job(INTEGRITY_JOB, "ok", started.elapsed());
        self.events.job_completed(INTEGRITY_JOB, &summary);
        summary
    }

    /// Recompute per-agent reliability metrics and refresh their gauges.
    pub async fn run_reliability_pass(&self) -> Result<ReliabilitySummary, JobError> {
        let started = Instant::now();
        self.events.job_started(RELIABILITY_JOB);
        let budget = JobBudget::new(self.config.job_budget());

        let summary = match self.reliability.recompute_all_metrics(&budget).await {
            Ok(summary) => summary,
            Err(err) => {
                self.metrics
                    .observe_job(RELIABILITY_JOB, "error", started.elapsed());
                self.events.job_failed(RELIABILITY_JOB, &err.to_string());
                return Err(err);
            }
        };

        for row in self.reliability.all_metrics().await {
            self.metrics.set_agent_gauges(&row);
        }

        let outcome = if summary.completed { "ok" } else { "partial" };
        self.metrics
            .observe_job(RELIABILITY_JOB, outcome, started.elapsed());
        self.events.job_completed(RELIABILITY_JOB, &summary);
        Ok(summary)
    }

    pub fn reliability(&self) -> &ReliabilityEngine {
        &self.reliability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::SignalEngine;
    use crate::store::{ClusterDirectory, ExecutionStore};
    use crate::testutil::seed_cluster;
    use gpg_common::{AgentId, ClusterId};

    struct Fixture {
        store: Arc<ExecutionStore>,
        clusters: Arc<ClusterDirectory>,
        engine: SignalEngine,
        runner: JobRunner,
        events: EventBus,
        metrics: Arc<Metrics>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(GpgConfig::default());
        let store = Arc::new(ExecutionStore::new());
        let clusters = Arc::new(ClusterDirectory::new());
        let caches = Arc::new(SignalCaches::new(&config));
        let events = EventBus::new(64);
        let metrics = Arc::new(Metrics::new().unwrap());

        let runner = JobRunner::new(
            ClusterStatsEngine::new(
                Arc::clone(&store),
                Arc::clone(&clusters),
                config.stats_chunk_size,
            ),
            IntegrityDetector::new(Arc::clone(&clusters), Arc::clone(&config)),
            ReliabilityEngine::new(Arc::clone(&store), Arc::clone(&config)),
            caches,
            events.clone(),
            Arc::clone(&metrics),
            Arc::clone(&config),
        );
        Fixture {
            engine: SignalEngine::new(Arc::clone(&clusters), Arc::clone(&config)),
            store,
            clusters,
            runner,
            events,
            metrics,
        }
    }

    #[test]
    fn test_budget_zero_duration_is_immediately_exhausted() {
        let budget = JobBudget::new(Duration::ZERO);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_budget_abort_overrides_deadline() {
        let budget = JobBudget::unlimited();
        assert!(!budget.exhausted());
        budget.request_abort();
        assert!(budget.exhausted());

        // Clones share the abort flag, as workers would.
        let second = JobBudget::unlimited();
        let clone = second.clone();
        second.request_abort();
        assert!(clone.exhausted());
    }

    #[tokio::test]
    async fn test_full_pipeline_flow_through_runner() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        seed_cluster(&f.store, "baseline", "pop", 50, 50, 2000.0);
        seed_cluster(&f.store, "cheater", "cheat-agent", 40, 0, 2000.0);

        let graph = f.runner.run_stats_pass().await.unwrap();
        assert!(graph.stats.completed);
        assert_eq!(graph.stats.clusters_updated, 2);
        assert_eq!(graph.integrity.clusters_flagged, 1);

        // Read side sees flagged risk immediately after the pass.
        let signals = f.engine.compute_signals(Some(&ClusterId::new("cheater")));
        assert!(signals.risk > 0.5);
        let clean = f.engine.compute_signals(Some(&ClusterId::new("baseline")));
        assert!(clean.risk < signals.risk);

        let blended = f.engine.blend_execute_score(0.6, Some(signals.gpg_score));
        assert!((0.0..=1.0).contains(&blended));

        let reliability = f.runner.run_reliability_pass().await.unwrap();
        assert_eq!(reliability.agents_processed, 2);
        assert!(
            f.runner
                .reliability()
                .metric_for(&AgentId::new("pop"))
                .await
                .is_some()
        );

        // Gauges exported for both agents.
        let text = f.metrics.encode().unwrap();
        assert!(text.contains("gpg_agent_success_rate{agent=\"pop\"}"));
        assert!(text.contains("gpg_agent_success_rate{agent=\"cheat-agent\"}"));

        // Lifecycle events in order for the stats pass.
        let started: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(started["event"], "job_started");
        let completed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(completed["event"], "job_completed");
        assert_eq!(completed["data"]["summary"]["integrity"]["clusters_flagged"], 1);
    }

    #[tokio::test]
    async fn test_triggers_are_idempotent() {
        let f = fixture();
        seed_cluster(&f.store, "c1", "a1", 10, 2, 800.0);

        let first = f.runner.run_stats_pass().await.unwrap();
        let second = f.runner.run_stats_pass().await.unwrap();
        assert_eq!(
            serde_json::to_string(&first.stats).unwrap(),
            serde_json::to_string(&second.stats).unwrap()
        );
        assert_eq!(second.integrity.clusters_flagged, 0);
        assert_eq!(second.integrity.clusters_cleared, 0);

        let r1 = f.runner.run_reliability_pass().await.unwrap();
        let r2 = f.runner.run_reliability_pass().await.unwrap();
        assert_eq!(r1.agents_processed, r2.agents_processed);
    }

    #[tokio::test]
    async fn test_integrity_pass_runs_standalone() {
        let f = fixture();
        seed_cluster(&f.store, "c1", "a1", 10, 2, 800.0);
        f.runner.run_stats_pass().await.unwrap();

        let summary = f.runner.run_integrity_pass();
        assert_eq!(summary.clusters_flagged, 0);

        let text = f.metrics.encode().unwrap();
        assert!(text.contains("job=\"integrity\",outcome=\"ok\"} 1"));
        assert!(!f.clusters.is_empty());
    }
}
