//! Configuration for the signal engine.
//!
//! Every policy knob the engines consume is runtime-tunable through
//! `GPG_`-prefixed environment variables: the execute blend weight, the
//! anomaly-detection thresholds, bayes priors, job budgets, cache sizing,
//! and the reliability-score shape. Invalid values are clamped into range
//! and logged, never propagated into a score.

pub mod env;

pub use env::{ConfigWarning, EnvParser};

use std::time::Duration;

/// Engine configuration, loaded once at process start.
#[derive(Debug, Clone)]
pub struct GpgConfig {
    /// Fraction of the final decision score taken from the graph signal,
    /// in [0, 1]. The remainder comes from the caller's legacy heuristic.
    pub execute_blend_weight: f64,
    /// Minimum cluster sample count before success-rate extremity alone
    /// can flag a cluster, and before a cluster's own rate (rather than
    /// the prior) dominates `p_success`.
    pub min_sample_size: u32,
    /// How far a shrunken success rate may sit above the population mean
    /// before the integrity detector flags the cluster.
    pub success_rate_deviation_threshold: f64,
    /// Beta-prior pseudo-successes for Bayesian shrinkage.
    pub bayes_alpha: f64,
    /// Beta-prior pseudo-failures for Bayesian shrinkage.
    pub bayes_beta: f64,
    /// Mean latency below this is implausible for clusters dominated by
    /// multi-step work.
    pub min_plausible_latency_ms: f64,
    /// Reference budget for the cost-efficiency term of the gpg score.
    pub reference_budget_usd: f64,
    /// Reference latency for the latency-efficiency term of the gpg score.
    pub reference_latency_ms: f64,
    /// Rolling evaluation window for reliability metrics, in days.
    pub reliability_window_days: i64,
    /// Latency-variance penalty: scale per unit coefficient of variation.
    pub latency_penalty_scale: f64,
    /// Latency-variance penalty ceiling.
    pub latency_penalty_cap: f64,
    /// Failure-diversity penalty added per distinct failure code.
    pub diversity_penalty_step: f64,
    /// Failure-diversity penalty ceiling.
    pub diversity_penalty_cap: f64,
    /// Risk weight on the suspicious flag.
    pub risk_weight_flag: f64,
    /// Risk weight on the failure share.
    pub risk_weight_variance: f64,
    /// Risk weight on small-sample uncertainty.
    pub risk_weight_uncertainty: f64,
    /// Clusters committed per chunk between budget checks.
    pub stats_chunk_size: usize,
    /// Wall-clock ceiling for one recomputation invocation, milliseconds.
    pub job_budget_ms: u64,
    /// Concurrent workers for per-agent reliability fan-out.
    pub worker_pool_size: usize,
    /// Entries per logical cache instance.
    pub cache_capacity: usize,
    /// Default TTL for cached read-side results, milliseconds.
    pub cache_ttl_ms: u64,
    /// Shared-secret bearer token required by the job trigger boundary.
    /// Unset means triggers are refused.
    pub trigger_token: Option<String>,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            execute_blend_weight: 0.3,
            min_sample_size: 10,
            success_rate_deviation_threshold: 0.25,
            bayes_alpha: 2.0,
            bayes_beta: 2.0,
            min_plausible_latency_ms: 250.0,
            reference_budget_usd: 10.0,
            reference_latency_ms: 12_000.0,
            reliability_window_days: 30,
            latency_penalty_scale: 0.15,
            latency_penalty_cap: 0.3,
            diversity_penalty_step: 0.05,
            diversity_penalty_cap: 0.25,
            risk_weight_flag: 0.5,
            risk_weight_variance: 0.3,
            risk_weight_uncertainty: 0.2,
            stats_chunk_size: 64,
            job_budget_ms: 120_000,
            worker_pool_size: 4,
            cache_capacity: 160,
            cache_ttl_ms: 30_000,
            trigger_token: None,
        }
    }
}

impl GpgConfig {
    /// Load from the environment, clamping out-of-range values.
    ///
    /// Returns the configuration together with any warnings produced
    /// while parsing; callers log the warnings once at startup.
    pub fn load_with_warnings() -> (Self, Vec<ConfigWarning>) {
        let mut parser = EnvParser::new();
        let defaults = Self::default();

        let config = Self {
            execute_blend_weight: parser.get_f64_range(
                "EXECUTE_BLEND_WEIGHT",
                defaults.execute_blend_weight,
                0.0,
                1.0,
            ),
            min_sample_size: parser.get_u32_range(
                "MIN_SAMPLE_SIZE",
                defaults.min_sample_size,
                1,
                10_000,
            ),
            success_rate_deviation_threshold: parser.get_f64_range(
                "SUCCESS_RATE_DEVIATION_THRESHOLD",
                defaults.success_rate_deviation_threshold,
                0.0,
                1.0,
            ),
            bayes_alpha: parser.get_f64_range("BAYES_ALPHA", defaults.bayes_alpha, 0.01, 100.0),
            bayes_beta: parser.get_f64_range("BAYES_BETA", defaults.bayes_beta, 0.01, 100.0),
            min_plausible_latency_ms: parser.get_f64_range(
                "MIN_PLAUSIBLE_LATENCY_MS",
                defaults.min_plausible_latency_ms,
                0.0,
                60_000.0,
            ),
            reference_budget_usd: parser.get_f64_range(
                "REFERENCE_BUDGET_USD",
                defaults.reference_budget_usd,
                0.01,
                100_000.0,
            ),
            reference_latency_ms: parser.get_f64_range(
                "REFERENCE_LATENCY_MS",
                defaults.reference_latency_ms,
                1.0,
                3_600_000.0,
            ),
            reliability_window_days: parser.get_i64_range(
                "RELIABILITY_WINDOW_DAYS",
                defaults.reliability_window_days,
                1,
                365,
            ),
            latency_penalty_scale: parser.get_f64_range(
                "LATENCY_PENALTY_SCALE",
                defaults.latency_penalty_scale,
                0.0,
                1.0,
            ),
            latency_penalty_cap: parser.get_f64_range(
                "LATENCY_PENALTY_CAP",
                defaults.latency_penalty_cap,
                0.0,
                1.0,
            ),
            diversity_penalty_step: parser.get_f64_range(
                "DIVERSITY_PENALTY_STEP",
                defaults.diversity_penalty_step,
                0.0,
                1.0,
            ),
            diversity_penalty_cap: parser.get_f64_range(
                "DIVERSITY_PENALTY_CAP",
                defaults.diversity_penalty_cap,
                0.0,
                1.0,
            ),
            risk_weight_flag: parser.get_f64_range(
                "RISK_WEIGHT_FLAG",
                defaults.risk_weight_flag,
                0.0,
                1.0,
            ),
            risk_weight_variance: parser.get_f64_range(
                "RISK_WEIGHT_VARIANCE",
                defaults.risk_weight_variance,
                0.0,
                1.0,
            ),
            risk_weight_uncertainty: parser.get_f64_range(
                "RISK_WEIGHT_UNCERTAINTY",
                defaults.risk_weight_uncertainty,
                0.0,
                1.0,
            ),
            stats_chunk_size: parser.get_usize_range(
                "STATS_CHUNK_SIZE",
                defaults.stats_chunk_size,
                1,
                100_000,
            ),
            job_budget_ms: parser.get_u64_range(
                "JOB_BUDGET_MS",
                defaults.job_budget_ms,
                100,
                3_600_000,
            ),
            worker_pool_size: parser.get_usize_range(
                "WORKER_POOL_SIZE",
                defaults.worker_pool_size,
                1,
                64,
            ),
            cache_capacity: parser.get_usize_range(
                "CACHE_CAPACITY",
                defaults.cache_capacity,
                16,
                4096,
            ),
            cache_ttl_ms: parser.get_u64_range(
                "CACHE_TTL_MS",
                defaults.cache_ttl_ms,
                100,
                3_600_000,
            ),
            trigger_token: parser.get_string_opt("TRIGGER_TOKEN"),
        };

        (config, parser.take_warnings())
    }

    /// Load from the environment, logging any warnings.
    pub fn from_env() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for warning in &warnings {
            tracing::warn!("Config: {warning}");
        }
        config
    }

    /// Mean of the beta prior; the neutral `p_success` fallback.
    pub fn prior_mean(&self) -> f64 {
        self.bayes_alpha / (self.bayes_alpha + self.bayes_beta)
    }

    /// Wall-clock budget for one recomputation invocation.
    pub fn job_budget(&self) -> Duration {
        Duration::from_millis(self.job_budget_ms)
    }

    /// Default TTL for cached read-side results.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Rolling reliability window as a chrono duration.
    pub fn reliability_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.reliability_window_days)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_neutral() {
        let config = GpgConfig::default();
        assert_eq!(config.execute_blend_weight, 0.3);
        assert_eq!(config.min_sample_size, 10);
        assert_eq!(config.prior_mean(), 0.5);
        assert!(config.trigger_token.is_none());
    }

    #[test]
    fn test_from_env_clamps_blend_weight() {
        let _guard = env_test_lock();
        unsafe { std::env::set_var("GPG_EXECUTE_BLEND_WEIGHT", "3.0") };
        let (config, warnings) = GpgConfig::load_with_warnings();
        assert_eq!(config.execute_blend_weight, 1.0);
        assert!(
            warnings
                .iter()
                .any(|w| w.var == "GPG_EXECUTE_BLEND_WEIGHT" && w.message.contains("clamped"))
        );
        unsafe { std::env::remove_var("GPG_EXECUTE_BLEND_WEIGHT") };
    }

    #[test]
    fn test_from_env_reads_trigger_token() {
        let _guard = env_test_lock();
        unsafe { std::env::set_var("GPG_TRIGGER_TOKEN", "hunter2") };
        let (config, _) = GpgConfig::load_with_warnings();
        assert_eq!(config.trigger_token.as_deref(), Some("hunter2"));
        unsafe { std::env::remove_var("GPG_TRIGGER_TOKEN") };
    }

    #[test]
    fn test_durations_derived_from_millis() {
        let config = GpgConfig::default();
        assert_eq!(config.job_budget(), Duration::from_millis(120_000));
        assert_eq!(config.cache_ttl(), Duration::from_millis(30_000));
        assert_eq!(config.reliability_window(), chrono::Duration::days(30));
    }
}
