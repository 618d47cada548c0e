//! Workflow engine: the submit / status / cancel / wait surface.
//!
//! Each submitted workflow runs on its own tokio task; stage work from every
//! workflow shares the coordinator's worker pool.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

use riskgate_core::{CancellationTokenSource, StageRegistry, WorkflowId, WorkflowState};
use riskgate_runtime::{EngineMetrics, InMemoryStateStore, StateStore, StoreError};

use crate::audit::AuditLog;
use crate::config::EngineConfig;
use crate::workflow::coordinator::ExecutionCoordinator;
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::graph::WorkflowGraph;
use crate::{EngineError, Result};

/// Handle to a workflow started by this engine.
struct RunHandle {
    cancel: CancellationTokenSource,
    /// Flips to true once the run has finalized
    done: watch::Receiver<bool>,
}

/// Runs workflow definitions against a stage registry.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(registry, &EngineConfig::default());
/// let id = engine.submit(&definition, json!({"release": "1.4.0"})).await?;
/// let state = engine.wait(id).await?;
/// println!("{:?}", state.decision);
/// ```
pub struct Engine {
    coordinator: ExecutionCoordinator,
    runs: Arc<Mutex<HashMap<WorkflowId, RunHandle>>>,
}

impl Engine {
    /// Creates an engine backed by an in-memory state store.
    pub fn new(registry: StageRegistry, config: &EngineConfig) -> Self {
        Self::with_store(registry, Arc::new(InMemoryStateStore::new()), config)
    }

    /// Creates an engine backed by `store`.
    pub fn with_store(registry: StageRegistry, store: Arc<dyn StateStore>, config: &EngineConfig) -> Self {
        Self {
            coordinator: ExecutionCoordinator::from_config(Arc::new(registry), store, config),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validates `definition`, creates an instance and starts it.
    ///
    /// Invalid definitions are rejected before any instance exists.
    pub async fn submit(&self, definition: &WorkflowDefinition, input: Value) -> Result<WorkflowId> {
        let graph = Arc::new(WorkflowGraph::load(definition, self.coordinator.registry())?);
        let id = self.coordinator.create_instance(&graph).await?;

        let cancel = CancellationTokenSource::new();
        let token = cancel.token();
        let (done_tx, done_rx) = watch::channel(false);

        // Registered before the task starts so cancel() can never miss it
        self.runs.lock().await.insert(
            id,
            RunHandle {
                cancel,
                done: done_rx,
            },
        );

        let coordinator = self.coordinator.clone();
        let runs = self.runs.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.run(id, graph, Arc::new(input), token).await {
                error!(workflow_id = %id, error = %e, "Workflow run ended with an engine error");
            }
            // Finished runs are served from the store
            runs.lock().await.remove(&id);
            let _ = done_tx.send(true);
        });

        info!(workflow_id = %id, workflow = %definition.name, "Workflow submitted");
        Ok(id)
    }

    /// Returns a snapshot of a workflow instance.
    pub async fn get_status(&self, id: WorkflowId) -> Result<WorkflowState> {
        self.coordinator.store().get(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => other.into(),
        })
    }

    /// Requests cancellation of a running workflow.
    ///
    /// In-flight stages are dropped and recorded as cancelled; no further
    /// frontier is dispatched. Cancelling a finished workflow is a no-op.
    pub async fn cancel(&self, id: WorkflowId) -> Result<()> {
        if let Some(run) = self.runs.lock().await.get(&id) {
            info!(workflow_id = %id, "Cancellation requested");
            run.cancel.cancel();
            return Ok(());
        }
        // Not started here; only known instances are accepted
        self.get_status(id).await.map(|_| ())
    }

    /// Waits for a workflow to reach a terminal status and returns its final state.
    pub async fn wait(&self, id: WorkflowId) -> Result<WorkflowState> {
        let done = self.runs.lock().await.get(&id).map(|run| run.done.clone());

        if let Some(mut done) = done {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() && !*done.borrow() {
                    return Err(EngineError::Join(format!(
                        "run task for workflow {} ended abnormally",
                        id
                    )));
                }
            }
        }
        self.get_status(id).await
    }

    /// Snapshots of every instance in the store.
    pub async fn list(&self) -> Result<Vec<WorkflowState>> {
        Ok(self.coordinator.store().list().await?)
    }

    pub fn audit_log(&self) -> &AuditLog {
        self.coordinator.audit_log()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.coordinator.metrics()
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }
}
