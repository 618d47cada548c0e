//! Versioned workflow state storage.
//!
//! Every mutation of a [`WorkflowState`] goes through a [`StateStore`]
//! primitive. Result appends are guarded by optimistic concurrency: the
//! caller passes the version it last observed and receives
//! [`StoreError::Conflict`] if another writer got there first. The caller is
//! expected to re-read the snapshot and retry; results are never dropped.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use riskgate_core::{
    Decision, EdgeId, StageId, StageResult, WorkflowId, WorkflowState, WorkflowStatus,
};

/// Errors returned by state store operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No workflow with this id.
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    /// A workflow with this id already exists.
    #[error("Workflow already exists: {0}")]
    AlreadyExists(WorkflowId),

    /// Optimistic concurrency check failed.
    #[error("Version conflict on workflow {workflow_id}: expected {expected}, found {actual}")]
    Conflict {
        /// Workflow being written
        workflow_id: WorkflowId,
        /// Version the writer observed
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Status change not allowed from the current status.
    #[error("Invalid status transition on workflow {workflow_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Workflow being written
        workflow_id: WorkflowId,
        /// Stored status
        from: WorkflowStatus,
        /// Requested status
        to: WorkflowStatus,
    },

    /// Loop counter already at its bound.
    #[error("Loop edge {edge} on workflow {workflow_id} reached its bound of {bound}")]
    LoopBound {
        /// Workflow being written
        workflow_id: WorkflowId,
        /// Loop-back edge
        edge: EdgeId,
        /// Declared bound
        bound: u32,
    },
}

/// Type alias for state store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Atomic storage for workflow instance state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores a new workflow instance.
    async fn create(&self, state: WorkflowState) -> StoreResult<()>;

    /// Returns a snapshot of a workflow instance.
    async fn get(&self, id: WorkflowId) -> StoreResult<WorkflowState>;

    /// Returns snapshots of every stored instance, oldest first.
    async fn list(&self) -> StoreResult<Vec<WorkflowState>>;

    /// Hands out the next attempt number of `stage`.
    ///
    /// Numbers are unique per stage even when several invocations of the
    /// same stage are in flight.
    async fn reserve_attempt(&self, id: WorkflowId, stage: &StageId) -> StoreResult<u32>;

    /// Appends a stage result if `expected_version` is current.
    ///
    /// Results are kept in attempt order. Re-appending an existing `(stage, attempt)` is a no-op that returns
    /// the current version. Returns the new version otherwise.
    async fn append_result(
        &self,
        id: WorkflowId,
        expected_version: u64,
        result: StageResult,
    ) -> StoreResult<u64>;

    /// Moves the workflow from `expected` to `new`.
    async fn compare_and_set_status(
        &self,
        id: WorkflowId,
        expected: WorkflowStatus,
        new: WorkflowStatus,
    ) -> StoreResult<u64>;

    /// Records the frontier being dispatched.
    async fn set_frontier(&self, id: WorkflowId, frontier: Vec<StageId>) -> StoreResult<u64>;

    /// Increments a loop-back edge counter, refusing to exceed `bound`.
    ///
    /// Returns the new count.
    async fn increment_loop_counter(
        &self,
        id: WorkflowId,
        edge: &EdgeId,
        bound: u32,
    ) -> StoreResult<u32>;

    /// Moves a Running workflow to a terminal status and returns the final snapshot.
    async fn finalize(
        &self,
        id: WorkflowId,
        status: WorkflowStatus,
        decision: Option<Decision>,
        failure: Option<String>,
    ) -> StoreResult<WorkflowState>;
}

/// In-process state store.
///
/// Thread-safe through an `Arc<RwLock<..>>`; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStateStore {
    states: Arc<RwLock<HashMap<WorkflowId, WorkflowState>>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

fn touch(state: &mut WorkflowState) -> u64 {
    state.version += 1;
    state.updated_at = Utc::now();
    state.version
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create(&self, state: WorkflowState) -> StoreResult<()> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.workflow_id) {
            return Err(StoreError::AlreadyExists(state.workflow_id));
        }
        states.insert(state.workflow_id, state);
        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> StoreResult<WorkflowState> {
        self.states
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Vec<WorkflowState>> {
        let mut all: Vec<WorkflowState> = self.states.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn reserve_attempt(&self, id: WorkflowId, stage: &StageId) -> StoreResult<u32> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let attempt = state.next_attempt(stage);
        state.reserved_attempts.insert(stage.clone(), attempt);
        touch(state);
        Ok(attempt)
    }

    async fn append_result(
        &self,
        id: WorkflowId,
        expected_version: u64,
        result: StageResult,
    ) -> StoreResult<u64> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if state.has_attempt(&result.stage_id, result.attempt) {
            debug!(
                workflow_id = %id,
                stage = %result.stage_id,
                attempt = result.attempt,
                "Result already recorded"
            );
            return Ok(state.version);
        }

        if state.version != expected_version {
            return Err(StoreError::Conflict {
                workflow_id: id,
                expected: expected_version,
                actual: state.version,
            });
        }

        let results = state.stage_results.entry(result.stage_id.clone()).or_default();
        let position = results.partition_point(|r| r.attempt < result.attempt);
        results.insert(position, result);
        Ok(touch(state))
    }

    async fn compare_and_set_status(
        &self,
        id: WorkflowId,
        expected: WorkflowStatus,
        new: WorkflowStatus,
    ) -> StoreResult<u64> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if state.status != expected || !state.status.can_transition_to(new) {
            return Err(StoreError::InvalidTransition {
                workflow_id: id,
                from: state.status,
                to: new,
            });
        }

        state.status = new;
        Ok(touch(state))
    }

    async fn set_frontier(&self, id: WorkflowId, frontier: Vec<StageId>) -> StoreResult<u64> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if state.is_terminal() {
            return Err(StoreError::InvalidTransition {
                workflow_id: id,
                from: state.status,
                to: WorkflowStatus::Running,
            });
        }

        state.current_frontier = frontier;
        Ok(touch(state))
    }

    async fn increment_loop_counter(
        &self,
        id: WorkflowId,
        edge: &EdgeId,
        bound: u32,
    ) -> StoreResult<u32> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let count = state.loop_count(edge);
        if count >= bound {
            return Err(StoreError::LoopBound {
                workflow_id: id,
                edge: edge.clone(),
                bound,
            });
        }

        state.loop_counters.insert(edge.clone(), count + 1);
        touch(state);
        Ok(count + 1)
    }

    async fn finalize(
        &self,
        id: WorkflowId,
        status: WorkflowStatus,
        decision: Option<Decision>,
        failure: Option<String>,
    ) -> StoreResult<WorkflowState> {
        let mut states = self.states.write().await;
        let state = states.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if state.is_terminal() || !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                workflow_id: id,
                from: state.status,
                to: status,
            });
        }

        state.status = status;
        state.decision = decision;
        state.failure = failure;
        state.current_frontier.clear();
        touch(state);
        Ok(state.clone())
    }
}
