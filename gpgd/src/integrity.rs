//! Integrity detection over recomputed cluster statistics.
//!
//! Runs after each statistics pass and flags clusters whose aggregates
//! look manipulated or self-reported rather than earned:
//!
//! - a Bayesian-shrunk success rate sitting implausibly far above the
//!   population mean, gated on a minimum sample size so extremity on
//!   thin evidence never flags by itself;
//! - a mean latency inconsistent with the cluster's task mix, i.e.
//!   near-zero latency for work that structurally requires multiple
//!   steps.
//!
//! The flag is a live derived property: a cluster whose recomputed
//! statistics return within bounds is cleared on the next pass. The
//! detector writes nothing but the suspicious flag and the risk score;
//! execution records are never touched, preserving auditability.

use crate::scoring::{RiskWeights, bayesian_success, cluster_risk};
use crate::store::ClusterDirectory;
use gpg_common::{ClusterStats, GpgConfig, IntegritySummary};
use std::sync::Arc;
use tracing::{debug, info};

pub struct IntegrityDetector {
    clusters: Arc<ClusterDirectory>,
    config: Arc<GpgConfig>,
    weights: RiskWeights,
}

impl IntegrityDetector {
    pub fn new(clusters: Arc<ClusterDirectory>, config: Arc<GpgConfig>) -> Self {
        let weights = RiskWeights::from_config(&config);
        Self {
            clusters,
            config,
            weights,
        }
    }

    /// Re-derive the suspicious flag for every committed cluster.
    ///
    /// Idempotent and safe to invoke more often than necessary; a pass
    /// over unchanged statistics flags and clears nothing.
    pub fn flag_suspicious(&self) -> IntegritySummary {
        let snapshot = self.clusters.snapshot();
        if snapshot.is_empty() {
            return IntegritySummary {
                clusters_flagged: 0,
                clusters_cleared: 0,
            };
        }

        let population_mean = population_success_mean(snapshot.values());

        let mut clusters_flagged = 0u64;
        let mut clusters_cleared = 0u64;
        let mut verdicts = Vec::with_capacity(snapshot.len());

        let mut rows: Vec<&ClusterStats> = snapshot.values().collect();
        rows.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));

        for stats in rows {
            let suspicious = self.is_success_rate_implausible(stats, population_mean)
                || self.is_latency_implausible(stats);

            if suspicious && !stats.suspicious {
                clusters_flagged += 1;
                debug!(
                    cluster = %stats.cluster_id,
                    success_rate = stats.success_rate,
                    sample_count = stats.sample_count,
                    mean_latency_ms = stats.mean_latency_ms,
                    "Cluster flagged suspicious"
                );
            } else if !suspicious && stats.suspicious {
                clusters_cleared += 1;
                debug!(cluster = %stats.cluster_id, "Cluster cleared");
            }

            let risk_score = cluster_risk(
                suspicious,
                stats.sample_count,
                1.0 - stats.success_rate,
                &self.weights,
                self.config.min_sample_size,
            );
            verdicts.push((stats.cluster_id.clone(), suspicious, risk_score));
        }

        self.clusters.apply_verdicts(&verdicts);
        info!(clusters_flagged, clusters_cleared, "Integrity pass complete");
        IntegritySummary {
            clusters_flagged,
            clusters_cleared,
        }
    }

    /// Success rate far above the population mean, with enough samples
    /// that shrinkage cannot explain it away.
    fn is_success_rate_implausible(&self, stats: &ClusterStats, population_mean: f64) -> bool {
        if stats.sample_count < u64::from(self.config.min_sample_size) {
            return false;
        }
        let successes = stats.success_rate * stats.sample_count as f64;
        let shrunk = bayesian_success(
            successes,
            stats.sample_count as f64,
            self.config.bayes_alpha,
            self.config.bayes_beta,
        );
        shrunk - population_mean > self.config.success_rate_deviation_threshold
    }

    /// Mean latency below the floor for a cluster dominated by work that
    /// cannot structurally complete that fast.
    fn is_latency_implausible(&self, stats: &ClusterStats) -> bool {
        stats.sample_count > 0
            && stats.multi_step_share >= 0.5
            && stats.mean_latency_ms < self.config.min_plausible_latency_ms
    }
}

/// Sample-weighted mean success rate across the population.
fn population_success_mean<'a>(rows: impl Iterator<Item = &'a ClusterStats>) -> f64 {
    let mut successes = 0.0;
    let mut samples = 0.0;
    for row in rows {
        successes += row.success_rate * row.sample_count as f64;
        samples += row.sample_count as f64;
    }
    if samples == 0.0 {
        return 0.0;
    }
    successes / samples
}
