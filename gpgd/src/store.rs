//! Execution record store and committed cluster snapshot.
//!
//! `ExecutionStore` is the append-only record of pipeline executions;
//! the ingestion boundary appends, the engines read. `ClusterDirectory`
//! holds the last fully-committed per-cluster statistics as an `Arc`
//! snapshot: writers build a replacement map and swap it in, so readers
//! always see a complete pass and never a half-written one.

#![allow(dead_code)] // Some read helpers are only exercised by tests.

use gpg_common::{AgentId, ClusterId, ClusterStats, PipelineExecution, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Append-only in-memory store of pipeline executions.
pub struct ExecutionStore {
    records: RwLock<Vec<PipelineExecution>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Vec<PipelineExecution>>, StoreError> {
        self.records.read().map_err(|_| StoreError::Unavailable {
            reason: "record store lock poisoned".to_string(),
        })
    }

    /// Append one immutable execution record.
    pub fn append(&self, execution: PipelineExecution) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Unavailable {
            reason: "record store lock poisoned".to_string(),
        })?;
        records.push(execution);
        Ok(())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read_guard()?.len())
    }

    /// Distinct cluster identifiers with at least one assigned execution,
    /// sorted for deterministic chunking.
    pub fn cluster_ids(&self) -> Result<Vec<ClusterId>, StoreError> {
        let records = self.read_guard()?;
        let ids: BTreeSet<ClusterId> = records
            .iter()
            .filter_map(|r| r.cluster_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// All executions assigned to the given clusters, grouped by cluster,
    /// in a single scan.
    pub fn executions_for_clusters(
        &self,
        cluster_ids: &[ClusterId],
    ) -> Result<HashMap<ClusterId, Vec<PipelineExecution>>, StoreError> {
        let wanted: BTreeSet<&ClusterId> = cluster_ids.iter().collect();
        let records = self.read_guard()?;
        let mut grouped: HashMap<ClusterId, Vec<PipelineExecution>> = HashMap::new();
        for record in records.iter() {
            if let Some(ref cluster_id) = record.cluster_id
                && wanted.contains(cluster_id)
            {
                grouped
                    .entry(cluster_id.clone())
                    .or_default()
                    .push(record.clone());
            }
        }
        Ok(grouped)
    }

    /// Distinct agents with at least one execution at or after `since`.
    pub fn agent_ids_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeSet<AgentId>, StoreError> {
        let records = self.read_guard()?;
        Ok(records
            .iter()
            .filter(|r| r.recorded_at >= since)
            .map(|r| r.agent_id.clone())
            .collect())
    }

    /// Executions for one agent at or after `since`.
    pub fn executions_for_agent_since(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PipelineExecution>, StoreError> {
        let records = self.read_guard()?;
        Ok(records
            .iter()
            .filter(|r| &r.agent_id == agent_id && r.recorded_at >= since)
            .cloned()
            .collect())
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Committed per-cluster statistics, snapshot-replaced on writes.
///
/// Also carries the stats engine's resume checkpoint: the last cluster id
/// a budget-exhausted pass committed, so the next invocation continues
/// instead of restarting.
pub struct ClusterDirectory {
    snapshot: RwLock<Arc<HashMap<ClusterId, ClusterStats>>>,
    checkpoint: RwLock<Option<ClusterId>>,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            checkpoint: RwLock::new(None),
        }
    }

    /// The current committed snapshot. Readers hold the lock only long
    /// enough to clone the `Arc`; a recomputation in progress is invisible
    /// until its commit swaps the map.
    pub fn snapshot(&self) -> Arc<HashMap<ClusterId, ClusterStats>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, cluster_id: &ClusterId) -> Option<ClusterStats> {
        self.snapshot().get(cluster_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn swap<F>(&self, rebuild: F)
    where
        F: FnOnce(&mut HashMap<ClusterId, ClusterStats>),
    {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next: HashMap<ClusterId, ClusterStats> = guard.as_ref().clone();
        rebuild(&mut next);
        *guard = Arc::new(next);
    }

    /// Replace whole rows in one swap. Rows not mentioned are untouched.
    pub fn commit_rows(&self, rows: Vec<ClusterStats>) {
        if rows.is_empty() {
            return;
        }
        self.swap(|next| {
            for row in rows {
                next.insert(row.cluster_id.clone(), row);
            }
        });
    }

    /// Drop clusters outside the active set. Used after a completed pass
    /// to delete zero-sample clusters.
    pub fn retain_only(&self, active: &BTreeSet<ClusterId>) {
        self.swap(|next| {
            next.retain(|id, _| active.contains(id));
        });
    }

    /// Apply integrity verdicts in one swap, touching only the suspicious
    /// flag and the risk score. Unknown cluster ids are ignored.
    pub fn apply_verdicts(&self, verdicts: &[(ClusterId, bool, f64)]) {
        if verdicts.is_empty() {
            return;
        }
        self.swap(|next| {
            for (cluster_id, suspicious, risk_score) in verdicts {
                if let Some(row) = next.get_mut(cluster_id) {
                    row.suspicious = *suspicious;
                    row.risk_score = *risk_score;
                }
            }
        });
    }

    pub fn checkpoint(&self) -> Option<ClusterId> {
        self.checkpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_checkpoint(&self, checkpoint: Option<ClusterId>) {
        *self
            .checkpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = checkpoint;
    }
}

impl Default for ClusterDirectory {
    fn default() -> Self {
        Self::new()
    }
}
