//! Workflow instance state.
//!
//! [`WorkflowState`] is the single shared mutable record of a running
//! workflow. It is only changed through state store primitives; everything
//! here is read-side helpers plus the constructor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{Decision, EdgeId, StageId, StageResult, WorkflowId, WorkflowStatus};

/// Snapshot of a workflow instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Workflow identifier (also the session id)
    pub workflow_id: WorkflowId,
    /// Name of the definition being executed
    #[serde(default)]
    pub definition: String,
    /// Current status
    pub status: WorkflowStatus,
    /// Frontier currently being dispatched (empty once terminal)
    pub current_frontier: Vec<StageId>,
    /// Every attempt per stage, in attempt order
    pub stage_results: BTreeMap<StageId, Vec<StageResult>>,
    /// Traversal count per loop-back edge
    pub loop_counters: BTreeMap<EdgeId, u32>,
    /// Highest attempt number handed out per stage, recorded or still running
    #[serde(default)]
    pub reserved_attempts: BTreeMap<StageId, u32>,
    /// Final decision, set on success
    pub decision: Option<Decision>,
    /// Reason for a Failed or Cancelled status
    pub failure: Option<String>,
    /// Optimistic concurrency version, bumped by every mutation
    pub version: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Creates a Running state positioned at `frontier`.
    pub fn new(workflow_id: WorkflowId, definition: impl Into<String>, frontier: Vec<StageId>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            definition: definition.into(),
            status: WorkflowStatus::Running,
            current_frontier: frontier,
            stage_results: BTreeMap::new(),
            loop_counters: BTreeMap::new(),
            reserved_attempts: BTreeMap::new(),
            decision: None,
            failure: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once the workflow reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// All recorded attempts of a stage.
    pub fn results_for(&self, stage: &StageId) -> &[StageResult] {
        self.stage_results
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Most recent attempt of a stage.
    pub fn latest_result(&self, stage: &StageId) -> Option<&StageResult> {
        self.results_for(stage).last()
    }

    /// Most recent successful attempt of a stage.
    pub fn latest_success(&self, stage: &StageId) -> Option<&StageResult> {
        self.results_for(stage).iter().rev().find(|r| r.is_success())
    }

    /// Number of attempts recorded for a stage.
    pub fn attempt_count(&self, stage: &StageId) -> u32 {
        self.results_for(stage).len() as u32
    }

    /// Attempt number the next invocation of `stage` must use.
    ///
    /// Accounts for attempts that were reserved but have not recorded a
    /// result yet.
    pub fn next_attempt(&self, stage: &StageId) -> u32 {
        let recorded = self
            .results_for(stage)
            .iter()
            .map(|r| r.attempt)
            .max()
            .unwrap_or(0);
        let reserved = self.reserved_attempts.get(stage).copied().unwrap_or(0);
        recorded.max(reserved) + 1
    }

    /// Returns true if `(stage, attempt)` has already been recorded.
    pub fn has_attempt(&self, stage: &StageId, attempt: u32) -> bool {
        self.results_for(stage).iter().any(|r| r.attempt == attempt)
    }

    /// Current traversal count of a loop-back edge.
    pub fn loop_count(&self, edge: &EdgeId) -> u32 {
        self.loop_counters.get(edge).copied().unwrap_or(0)
    }

    /// Latest successful payload of every stage that has one.
    pub fn upstream_payloads(&self) -> BTreeMap<StageId, Value> {
        self.stage_results
            .keys()
            .filter_map(|id| self.latest_success(id).map(|r| (id.clone(), r.payload.clone())))
            .collect()
    }

    /// Total attempts across all stages.
    pub fn total_attempts(&self) -> usize {
        self.stage_results.values().map(Vec::len).sum()
    }
}
