//! Prometheus metrics for the observability boundary.
//!
//! One `Metrics` instance is constructed at startup and passed to the
//! components that record into it; no global registry. Reliability
//! output is exported as simple numeric gauges per agent.

use gpg_common::ReliabilityMetric;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    job_runs: IntCounterVec,
    job_duration_seconds: HistogramVec,
    cache_events: IntCounterVec,
    agent_success_rate: GaugeVec,
    agent_reliability_score: GaugeVec,
    agent_mean_latency_ms: GaugeVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let job_runs = IntCounterVec::new(
            Opts::new("gpg_job_runs_total", "Recomputation job invocations"),
            &["job", "outcome"],
        )?;
        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("gpg_job_duration_seconds", "Recomputation job wall time"),
            &["job"],
        )?;
        let cache_events = IntCounterVec::new(
            Opts::new("gpg_cache_events_total", "Read-side cache hits and misses"),
            &["cache", "event"],
        )?;
        let agent_success_rate = GaugeVec::new(
            Opts::new("gpg_agent_success_rate", "Windowed per-agent success rate"),
            &["agent"],
        )?;
        let agent_reliability_score = GaugeVec::new(
            Opts::new("gpg_agent_reliability_score", "Per-agent reliability score"),
            &["agent"],
        )?;
        let agent_mean_latency_ms = GaugeVec::new(
            Opts::new("gpg_agent_mean_latency_ms", "Windowed per-agent mean latency"),
            &["agent"],
        )?;

        registry.register(Box::new(job_runs.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(cache_events.clone()))?;
        registry.register(Box::new(agent_success_rate.clone()))?;
        registry.register(Box::new(agent_reliability_score.clone()))?;
        registry.register(Box::new(agent_mean_latency_ms.clone()))?;

        Ok(Self {
            registry,
            job_runs,
            job_duration_seconds,
            cache_events,
            agent_success_rate,
            agent_reliability_score,
            agent_mean_latency_ms,
        })
    }

    pub fn observe_job(&self, job: &str, outcome: &str, duration: Duration) {
        self.job_runs.with_label_values(&[job, outcome]).inc();
        self.job_duration_seconds
            .with_label_values(&[job])
            .observe(duration.as_secs_f64());
    }

    pub fn record_cache_event(&self, cache: &str, hit: bool) {
        let event = if hit { "hit" } else { "miss" };
        self.cache_events.with_label_values(&[cache, event]).inc();
    }

    /// Export one agent's committed metric row as gauges.
    pub fn set_agent_gauges(&self, metric: &ReliabilityMetric) {
        let agent = metric.agent_id.as_str();
        self.agent_success_rate
            .with_label_values(&[agent])
            .set(metric.success_rate);
        self.agent_reliability_score
            .with_label_values(&[agent])
            .set(metric.reliability_score);
        self.agent_mean_latency_ms
            .with_label_values(&[agent])
            .set(metric.mean_latency_ms);
    }

    /// Encode the registry in Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpg_common::AgentId;
    use std::collections::BTreeMap;

    #[test]
    fn test_encode_contains_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_job("recompute-stats", "ok", Duration::from_millis(12));
        metrics.record_cache_event("recommendation", true);
        metrics.record_cache_event("recommendation", false);

        let text = metrics.encode().unwrap();
        assert!(text.contains("gpg_job_runs_total"));
        assert!(text.contains("gpg_cache_events_total"));
        assert!(text.contains("# HELP"));
    }

    #[test]
    fn test_agent_gauges_exported_per_agent() {
        let metrics = Metrics::new().unwrap();
        metrics.set_agent_gauges(&ReliabilityMetric {
            agent_id: AgentId::new("agent-7"),
            success_rate: 0.92,
            mean_latency_ms: 640.0,
            p50_latency_ms: 500.0,
            p95_latency_ms: 1400.0,
            failure_counts: BTreeMap::new(),
            reliability_score: 0.87,
            computed_at: chrono::Utc::now(),
        });

        let text = metrics.encode().unwrap();
        assert!(text.contains("gpg_agent_success_rate{agent=\"agent-7\"} 0.92"));
        assert!(text.contains("gpg_agent_reliability_score{agent=\"agent-7\"} 0.87"));
    }
}
