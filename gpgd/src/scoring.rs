//! Risk scoring and decision-score blending.
//!
//! `SignalEngine` is the read side of the graph: it turns the committed
//! cluster snapshot into per-request [`GpgSignals`] and blends the
//! composite gpg score with a caller-supplied legacy heuristic into the
//! single number a router consumes. Read paths never block on a
//! recomputation in progress (they only ever see the last committed
//! snapshot) and never fail for missing data; unknown clusters resolve
//! to the configured neutral prior.

use crate::store::ClusterDirectory;
use gpg_common::util::{clamp01, round4};
use gpg_common::{ClusterId, GpgConfig, GpgSignals};
use std::sync::Arc;
use tracing::debug;

// ── Risk Weights ───────────────────────────────────────────────────────────

/// Weights for the components of a cluster risk score.
///
/// Normalized such that their sum is 1.0.
#[derive(Debug, Clone)]
pub struct RiskWeights {
    /// Weight on the integrity detector's suspicious flag.
    pub flag: f64,
    /// Weight on the cluster's failure share.
    pub variance: f64,
    /// Weight on small-sample uncertainty.
    pub uncertainty: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            flag: 0.5,
            variance: 0.3,
            uncertainty: 0.2,
        }
    }
}

impl RiskWeights {
    pub fn from_config(config: &GpgConfig) -> Self {
        Self {
            flag: config.risk_weight_flag,
            variance: config.risk_weight_variance,
            uncertainty: config.risk_weight_uncertainty,
        }
    }

    /// Normalize weights so they sum to 1.0.
    fn normalized(&self) -> Self {
        let sum = self.flag + self.variance + self.uncertainty;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            flag: self.flag / sum,
            variance: self.variance / sum,
            uncertainty: self.uncertainty / sum,
        }
    }
}

// ── Score Primitives ───────────────────────────────────────────────────────

/// Beta-shrunk success estimate: `(successes + α) / (total + α + β)`.
///
/// With no observations this is exactly the prior mean, which is the
/// neutral fallback for unknown clusters.
pub fn bayesian_success(successes: f64, total: f64, alpha: f64, beta: f64) -> f64 {
    let successes = successes.max(0.0);
    let total = total.max(0.0);
    round4(clamp01((successes + alpha) / (total + alpha + beta)))
}

/// Risk for a cluster, in [0, 1].
///
/// Monotonically increasing in the suspicious flag and in the failure
/// share, and decreasing in sample count: the uncertainty term is
/// `k / (n + k)` with `k = min_sample_size`, so a thin cluster carries
/// risk even without a flag.
pub fn cluster_risk(
    flagged: bool,
    sample_count: u64,
    failure_share: f64,
    weights: &RiskWeights,
    min_sample_size: u32,
) -> f64 {
    let weights = weights.normalized();
    let k = f64::from(min_sample_size.max(1));
    let uncertainty = k / (sample_count as f64 + k);

    let score = weights.flag * f64::from(u8::from(flagged))
        + weights.variance * clamp01(failure_share)
        + weights.uncertainty * uncertainty;
    round4(clamp01(score))
}

// ── Signal Engine ──────────────────────────────────────────────────────────

/// Read-side signal computation over the committed cluster snapshot.
pub struct SignalEngine {
    clusters: Arc<ClusterDirectory>,
    config: Arc<GpgConfig>,
    weights: RiskWeights,
}

impl SignalEngine {
    pub fn new(clusters: Arc<ClusterDirectory>, config: Arc<GpgConfig>) -> Self {
        let weights = RiskWeights::from_config(&config);
        Self {
            clusters,
            config,
            weights,
        }
    }

    /// Derive the signal bundle for one decision request.
    ///
    /// Deterministic over the current snapshot. `None`, an unknown
    /// cluster, and a known-but-thin cluster all degrade to the neutral
    /// prior rather than failing.
    pub fn compute_signals(&self, cluster_id: Option<&ClusterId>) -> GpgSignals {
        let Some(cluster_id) = cluster_id else {
            return self.unattributed_signals();
        };
        let Some(stats) = self.clusters.get(cluster_id) else {
            debug!(cluster = %cluster_id, "No committed stats for cluster, using prior");
            return self.unattributed_signals();
        };

        let n = stats.sample_count;
        let successes = stats.success_rate * n as f64;
        let p_success = if n < u64::from(self.config.min_sample_size) {
            round4(self.config.prior_mean())
        } else {
            bayesian_success(
                successes,
                n as f64,
                self.config.bayes_alpha,
                self.config.bayes_beta,
            )
        };
        let risk = cluster_risk(
            stats.suspicious,
            n,
            1.0 - stats.success_rate,
            &self.weights,
            self.config.min_sample_size,
        );

        GpgSignals {
            cluster_id: Some(cluster_id.clone()),
            p_success,
            risk,
            expected_cost_usd: stats.mean_cost_usd,
            expected_latency_ms: stats.mean_latency_ms,
            gpg_score: self.gpg_score(p_success, risk, stats.mean_cost_usd, stats.mean_latency_ms),
        }
    }

    /// Blend the caller's legacy heuristic with the graph score.
    ///
    /// Both inputs are clamped to [0, 1]; the result is rounded to four
    /// decimals. With no graph score the legacy score passes through
    /// unchanged; a scoring request never fails for lack of graph data.
    pub fn blend_execute_score(&self, legacy_score: f64, gpg_score: Option<f64>) -> f64 {
        let legacy = clamp01(legacy_score);
        let Some(gpg) = gpg_score else {
            return round4(legacy);
        };
        let gpg = clamp01(gpg);
        let weight = clamp01(self.config.execute_blend_weight);
        round4(legacy * (1.0 - weight) + gpg * weight)
    }

    fn unattributed_signals(&self) -> GpgSignals {
        let p_success = round4(self.config.prior_mean());
        let risk = cluster_risk(
            false,
            0,
            1.0 - self.config.prior_mean(),
            &self.weights,
            self.config.min_sample_size,
        );
        GpgSignals {
            cluster_id: None,
            p_success,
            risk,
            expected_cost_usd: 0.0,
            expected_latency_ms: 0.0,
            gpg_score: self.gpg_score(p_success, risk, 0.0, 0.0),
        }
    }

    /// Composite quality score: success probability, risk complement, and
    /// cost/latency efficiency against the configured references.
    fn gpg_score(&self, p_success: f64, risk: f64, expected_cost: f64, expected_latency: f64) -> f64 {
        let cost_efficiency = clamp01(1.0 - expected_cost / self.config.reference_budget_usd);
        let latency_efficiency = clamp01(1.0 - expected_latency / self.config.reference_latency_ms);

        let score = 0.55 * clamp01(p_success)
            + 0.25 * (1.0 - clamp01(risk))
            + 0.10 * cost_efficiency
            + 0.10 * latency_efficiency;
        round4(clamp01(score))
    }
}
