//! Stage abstraction and execution contract.
//!
//! Defines the interface every analysis stage implements, along with the
//! immutable context a stage receives and the output it returns. The
//! coordinator stamps stage id, attempt, status and timestamps into the
//! recorded [`StageResult`](crate::types::StageResult); stages only decide
//! the outcome label and payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::error::StageError;
use crate::types::{StageId, WorkflowId};

/// Output returned by a successful stage invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Label used to route to the next frontier
    pub outcome_label: String,
    /// Opaque payload recorded in the stage result
    pub payload: Value,
}

impl StageOutput {
    /// Creates a new output.
    pub fn new(outcome_label: impl Into<String>, payload: Value) -> Self {
        Self {
            outcome_label: outcome_label.into(),
            payload,
        }
    }
}

/// Immutable execution context provided to a stage.
///
/// The initial workflow input and the latest successful upstream payloads
/// are shared through `Arc`, so building a context per attempt is cheap.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// Workflow instance this invocation belongs to
    pub workflow_id: WorkflowId,
    /// Stage being invoked
    pub stage_id: StageId,
    /// 1-based attempt number
    pub attempt: u32,
    input: Arc<Value>,
    upstream: Arc<BTreeMap<StageId, Value>>,
    cancellation: CancellationToken,
}

impl StageContext {
    /// Creates a context with an empty input and no upstream payloads.
    pub fn new(workflow_id: WorkflowId, stage_id: StageId) -> Self {
        Self {
            workflow_id,
            stage_id,
            attempt: 1,
            input: Arc::new(Value::Null),
            upstream: Arc::new(BTreeMap::new()),
            cancellation: CancellationToken::never(),
        }
    }

    /// Sets the attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the workflow input.
    pub fn with_input(mut self, input: Arc<Value>) -> Self {
        self.input = input;
        self
    }

    /// Sets the upstream payload map.
    pub fn with_upstream(mut self, upstream: Arc<BTreeMap<StageId, Value>>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Sets the workflow cancellation token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Initial input submitted with the workflow.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Latest successful payload of an upstream stage, if any.
    pub fn upstream(&self, stage: &StageId) -> Option<&Value> {
        self.upstream.get(stage)
    }

    /// All upstream payloads, keyed by stage id.
    pub fn upstream_payloads(&self) -> &BTreeMap<StageId, Value> {
        &self.upstream
    }

    /// Cancellation token of the owning workflow.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the owning workflow was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Trait implemented by every analysis stage.
///
/// # Example
///
/// ```ignore
/// use riskgate_core::{Stage, StageContext, StageError, StageOutput};
/// use async_trait::async_trait;
///
/// struct Ingest;
///
/// #[async_trait]
/// impl Stage for Ingest {
///     async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
///         let diff = ctx.input()["diff"].clone();
///         Ok(StageOutput::new("ok", diff))
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    /// Executes one attempt of the stage.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}
