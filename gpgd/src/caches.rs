//! Cache instances fronting the read-side query families.
//!
//! Recommendation, plan, related, and top-N queries each get an
//! independent bounded cache so pressure in one query type cannot evict
//! another. The set is constructed once at process start and handed to
//! every caller that needs it; no module-level singletons.

use crate::metrics::Metrics;
use crate::scoring::SignalEngine;
use gpg_common::{BoundedCache, ClusterId, GpgConfig, GpgSignals, build_cache_key};

pub struct SignalCaches {
    pub recommendation: BoundedCache<GpgSignals>,
    pub plan: BoundedCache<serde_json::Value>,
    pub related: BoundedCache<serde_json::Value>,
    pub top_n: BoundedCache<serde_json::Value>,
}

impl SignalCaches {
    pub fn new(config: &GpgConfig) -> Self {
        let capacity = config.cache_capacity;
        let ttl = config.cache_ttl();
        Self {
            recommendation: BoundedCache::new("recommendation", capacity, ttl),
            plan: BoundedCache::new("plan", capacity, ttl),
            related: BoundedCache::new("related", capacity, ttl),
            top_n: BoundedCache::new("top_n", capacity, ttl),
        }
    }

    /// Signal lookup through the recommendation cache.
    ///
    /// Unattributed requests share one key: the neutral-prior signals are
    /// identical for every caller without a cluster.
    pub fn cached_signals(
        &self,
        engine: &SignalEngine,
        metrics: &Metrics,
        cluster_id: Option<&ClusterId>,
    ) -> GpgSignals {
        let key = build_cache_key(&[(
            "cluster",
            cluster_id.map(ClusterId::as_str).unwrap_or("none"),
        )]);
        if let Some(signals) = self.recommendation.get(&key) {
            metrics.record_cache_event(self.recommendation.name(), true);
            return signals;
        }
        metrics.record_cache_event(self.recommendation.name(), false);
        let signals = engine.compute_signals(cluster_id);
        self.recommendation.insert(key, signals.clone());
        signals
    }

    /// Sweep expired entries from every instance.
    pub fn prune_all(&self) -> usize {
        self.recommendation.prune() + self.plan.prune() + self.related.prune() + self.top_n.prune()
    }
}
