//! Common types shared across the signal engine components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for an agent participating in pipelines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a behavioral cluster of executions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a recorded pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of work an execution performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    Automation,
    Retrieval,
    Coding,
    Analysis,
    Research,
    Support,
    Orchestration,
}

impl TaskType {
    /// Parse a task-type string from the ingestion boundary.
    ///
    /// Unrecognized values canonicalize to `General`, the domain default,
    /// so a record is never dropped over an unknown label.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "automation" => Self::Automation,
            "retrieval" => Self::Retrieval,
            "coding" => Self::Coding,
            "analysis" => Self::Analysis,
            "research" => Self::Research,
            "support" => Self::Support,
            "orchestration" => Self::Orchestration,
            _ => Self::General,
        }
    }

    /// Whether this task type structurally involves multi-step execution.
    ///
    /// Used by the integrity detector's latency-plausibility rule: a
    /// near-zero mean latency is inconsistent with clusters dominated by
    /// these types.
    pub fn structurally_multi_step(&self) -> bool {
        matches!(
            self,
            Self::Orchestration | Self::Research | Self::Coding | Self::Analysis
        )
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::General => "general",
            Self::Automation => "automation",
            Self::Retrieval => "retrieval",
            Self::Coding => "coding",
            Self::Analysis => "analysis",
            Self::Research => "research",
            Self::Support => "support",
            Self::Orchestration => "orchestration",
        };
        write!(f, "{label}")
    }
}

/// How an execution was routed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// Handled by a single agent end to end.
    Single,
    /// Handed off to one or more downstream agents.
    Delegated,
    /// Executed as part of a bundled multi-task batch.
    Bundled,
}

impl ExecutionPath {
    /// Parse an execution-path string, defaulting to `Single`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delegated" => Self::Delegated,
            "bundled" => Self::Bundled,
            _ => Self::Single,
        }
    }
}

/// Closed set of failure categories for unsuccessful executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Timeout,
    Auth,
    RateLimit,
    ToolError,
    SchemaMismatch,
    Network,
    /// Catch-all for values the ingestion boundary does not recognize.
    Unknown,
}

impl FailureCode {
    /// Parse a failure-code string; anything unrecognized maps to `Unknown`
    /// rather than being silently dropped.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "timeout" => Self::Timeout,
            "auth" => Self::Auth,
            "rate_limit" => Self::RateLimit,
            "tool_error" => Self::ToolError,
            "schema_mismatch" => Self::SchemaMismatch,
            "network" => Self::Network,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::ToolError => "tool_error",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Network => "network",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Terminal outcome of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Success,
    Failure(FailureCode),
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            Self::Success => None,
            Self::Failure(code) => Some(*code),
        }
    }
}

/// One completed agent task, immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: ExecutionId,
    pub agent_id: AgentId,
    pub task_type: TaskType,
    pub execution_path: ExecutionPath,
    pub outcome: ExecOutcome,
    /// Cost of the execution in USD.
    pub cost_usd: f64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    pub recorded_at: DateTime<Utc>,
    /// Behavioral cluster assignment; `None` until clustering has run.
    pub cluster_id: Option<ClusterId>,
}

impl PipelineExecution {
    /// Whether this record structurally implies multi-step execution,
    /// either through its routing path or its task type.
    pub fn is_multi_step(&self) -> bool {
        !matches!(self.execution_path, ExecutionPath::Single)
            || self.task_type.structurally_multi_step()
    }
}

/// Aggregated statistics for one behavioral cluster.
///
/// Counts and means are owned by the cluster statistics engine and always
/// replaced wholesale; the suspicious flag and risk score are owned by the
/// integrity detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStats {
    pub cluster_id: ClusterId,
    /// Number of executions currently assigned to the cluster.
    pub sample_count: u64,
    /// Fraction of successful executions, in [0, 1].
    pub success_rate: f64,
    pub mean_cost_usd: f64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Per-task-type sample counts, for audit and plausibility checks.
    pub task_type_counts: BTreeMap<TaskType, u64>,
    /// Fraction of samples that structurally imply multi-step execution.
    pub multi_step_share: f64,
    /// Set by the integrity detector; derived, auto-clearing.
    pub suspicious: bool,
    /// Risk score in [0, 1], set by the integrity detector.
    pub risk_score: f64,
    pub recomputed_at: DateTime<Utc>,
}

impl ClusterStats {
    /// Whether the engine-computed portion of two rows is identical.
    ///
    /// Ignores the detector-owned fields and the recomputation timestamp,
    /// so an unchanged recomputation can keep the prior row byte-identical.
    pub fn stats_eq(&self, other: &ClusterStats) -> bool {
        self.cluster_id == other.cluster_id
            && self.sample_count == other.sample_count
            && self.success_rate == other.success_rate
            && self.mean_cost_usd == other.mean_cost_usd
            && self.mean_latency_ms == other.mean_latency_ms
            && self.p95_latency_ms == other.p95_latency_ms
            && self.task_type_counts == other.task_type_counts
            && self.multi_step_share == other.multi_step_share
    }
}

/// Read-time signal bundle produced for one decision request.
///
/// Derived deterministically from the committed cluster snapshot and
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpgSignals {
    /// Cluster the signals are attributed to; `None` when the request
    /// could not be attributed (itself a meaningful signal).
    pub cluster_id: Option<ClusterId>,
    pub p_success: f64,
    pub risk: f64,
    pub expected_cost_usd: f64,
    pub expected_latency_ms: f64,
    /// Composite quality score in [0, 1].
    pub gpg_score: f64,
}

/// Per-agent reliability metrics over the rolling evaluation window.
///
/// Rows are replaced wholesale on each recomputation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityMetric {
    pub agent_id: AgentId,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Count of failed executions per failure code.
    pub failure_counts: BTreeMap<FailureCode, u64>,
    /// Scalar reliability score in [0, 1].
    pub reliability_score: f64,
    pub computed_at: DateTime<Utc>,
}

/// Summary returned by a cluster statistics recomputation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRecomputeSummary {
    pub clusters_updated: u64,
    pub executions_processed: u64,
    /// False when the pass checkpointed before covering every cluster.
    pub completed: bool,
}

/// Summary returned by an integrity detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegritySummary {
    pub clusters_flagged: u64,
    pub clusters_cleared: u64,
}

/// Summary returned by a reliability metrics recomputation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilitySummary {
    pub agents_processed: u64,
    /// False when the pass checkpointed before covering every agent.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parse_known_values() {
        assert_eq!(TaskType::parse("coding"), TaskType::Coding);
        assert_eq!(TaskType::parse("Orchestration"), TaskType::Orchestration);
        assert_eq!(TaskType::parse("  research "), TaskType::Research);
    }

    #[test]
    fn test_task_type_parse_unknown_defaults_to_general() {
        assert_eq!(TaskType::parse("quantum-juggling"), TaskType::General);
        assert_eq!(TaskType::parse(""), TaskType::General);
    }

    #[test]
    fn test_failure_code_parse_unknown_maps_to_unknown_variant() {
        assert_eq!(FailureCode::parse("tool_error"), FailureCode::ToolError);
        assert_eq!(FailureCode::parse("cosmic_rays"), FailureCode::Unknown);
    }

    #[test]
    fn test_execution_path_parse() {
        assert_eq!(ExecutionPath::parse("delegated"), ExecutionPath::Delegated);
        assert_eq!(ExecutionPath::parse("bundled"), ExecutionPath::Bundled);
        assert_eq!(ExecutionPath::parse("anything"), ExecutionPath::Single);
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(ExecOutcome::Success.is_success());
        assert_eq!(ExecOutcome::Success.failure_code(), None);
        let failed = ExecOutcome::Failure(FailureCode::Timeout);
        assert!(!failed.is_success());
        assert_eq!(failed.failure_code(), Some(FailureCode::Timeout));
    }

    #[test]
    fn test_multi_step_detection() {
        let mut exec = PipelineExecution {
            id: ExecutionId::generate(),
            agent_id: AgentId::new("a1"),
            task_type: TaskType::Support,
            execution_path: ExecutionPath::Single,
            outcome: ExecOutcome::Success,
            cost_usd: 0.1,
            latency_ms: 500.0,
            recorded_at: Utc::now(),
            cluster_id: None,
        };
        assert!(!exec.is_multi_step());

        exec.execution_path = ExecutionPath::Delegated;
        assert!(exec.is_multi_step());

        exec.execution_path = ExecutionPath::Single;
        exec.task_type = TaskType::Orchestration;
        assert!(exec.is_multi_step());
    }

    #[test]
    fn test_stats_eq_ignores_detector_fields_and_timestamp() {
        let base = ClusterStats {
            cluster_id: ClusterId::new("c1"),
            sample_count: 4,
            success_rate: 0.75,
            mean_cost_usd: 0.2,
            mean_latency_ms: 900.0,
            p95_latency_ms: 1500.0,
            task_type_counts: BTreeMap::from([(TaskType::Coding, 4)]),
            multi_step_share: 1.0,
            suspicious: false,
            risk_score: 0.1,
            recomputed_at: Utc::now(),
        };
        let mut other = base.clone();
        other.suspicious = true;
        other.risk_score = 0.9;
        other.recomputed_at = Utc::now();
        assert!(base.stats_eq(&other));

        other.sample_count = 5;
        assert!(!base.stats_eq(&other));
    }

    #[test]
    fn test_enum_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&FailureCode::SchemaMismatch).unwrap(),
            "\"schema_mismatch\""
        );
        assert_eq!(
            serde_json::to_string(&TaskType::Orchestration).unwrap(),
            "\"orchestration\""
        );
        let outcome: ExecOutcome = serde_json::from_str("{\"failure\":\"rate_limit\"}").unwrap();
        assert_eq!(outcome, ExecOutcome::Failure(FailureCode::RateLimit));
    }
}
