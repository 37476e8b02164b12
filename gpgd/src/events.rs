//! Event broadcast for job lifecycle updates.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Broadcast channel for engine events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// The effective buffer is clamped to at least `DEFAULT_BUFFER` to
    /// avoid frequent lag/drop behavior for bursty event streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// A recomputation job started.
    pub fn job_started(&self, job: &str) {
        self.emit("job_started", &json!({ "job": job }));
    }

    /// A recomputation job finished; the summary is attached verbatim.
    pub fn job_completed<T: Serialize>(&self, job: &str, summary: &T) {
        self.emit("job_completed", &json!({ "job": job, "summary": summary }));
    }

    /// A recomputation job aborted without committing a full pass.
    pub fn job_failed(&self, job: &str, error: &str) {
        self.emit("job_failed", &json!({ "job": job, "error": error }));
    }

    fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_events_round_trip() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.job_started("recompute-stats");
        bus.job_completed("recompute-stats", &json!({ "clusters_updated": 3 }));
        bus.job_failed("reliability", "store unavailable");

        let started: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(started["event"], "job_started");
        assert_eq!(started["data"]["job"], "recompute-stats");

        let completed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(completed["data"]["summary"]["clusters_updated"], 3);

        let failed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(failed["data"]["error"], "store unavailable");
        assert!(failed["timestamp"].is_string());
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(1);
        bus.job_started("integrity");
    }
}
