//! Core types for the release-risk pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default per-stage timeout when a spec does not declare one.
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 30_000;

/// Outcome label the engine routes with when a non-fatal stage exhausts its retries.
pub const DEGRADED_LABEL: &str = "degraded";

/// Unique identifier for a stage within a workflow definition.
///
/// StageId wraps a string identifier and is used as a map key, a graph
/// node identifier and the default registry binding name.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Creates a new StageId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a workflow instance.
///
/// Also serves as the session id for state snapshots and audit records.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    /// Creates a fresh random workflow id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WorkflowId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifier of a routing edge, used as the loop counter key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Builds the canonical id of the edge leaving `from` on `label`.
    pub fn new(from: &StageId, label: &str) -> Self {
        Self(format!("{}:{}", from, label))
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling mode of a stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Stage always runs in a frontier of its own
    #[default]
    Sequential,
    /// Stage may share a frontier with other ready parallel stages
    #[serde(alias = "parallel-eligible")]
    Parallel,
}

/// Declarative description of a stage.
///
/// Specs are immutable once loaded into a graph. The `binding` names the
/// registered implementation and defaults to the stage id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique stage identifier
    pub id: StageId,
    /// Scheduling mode
    #[serde(default)]
    pub mode: StageMode,
    /// Stages that must have run in an earlier frontier
    #[serde(default)]
    pub dependencies: Vec<StageId>,
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries allowed after the first attempt
    #[serde(default)]
    pub max_retries: u32,
    /// Whether an unrecoverable failure aborts the workflow
    #[serde(default)]
    pub fatal: bool,
    /// Fire-and-forget stage, dispatched but never awaited
    #[serde(default)]
    pub non_blocking: bool,
    /// Free-form capability tags
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Registry binding name (defaults to the stage id)
    #[serde(default)]
    pub binding: Option<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STAGE_TIMEOUT_MS
}

impl StageSpec {
    /// Creates a sequential, non-fatal spec with the default timeout and no retries.
    pub fn new(id: impl Into<StageId>) -> Self {
        Self {
            id: id.into(),
            mode: StageMode::Sequential,
            dependencies: Vec::new(),
            timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            max_retries: 0,
            fatal: false,
            non_blocking: false,
            capabilities: Vec::new(),
            binding: None,
        }
    }

    /// Marks the stage parallel-eligible.
    pub fn parallel(mut self) -> Self {
        self.mode = StageMode::Parallel;
        self
    }

    /// Adds a dependency on another stage.
    pub fn depends_on(mut self, dep: impl Into<StageId>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Marks the stage fatal.
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Marks the stage non-blocking.
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    /// Adds a capability tag.
    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    /// Binds the stage to a registered implementation name.
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    /// Returns the per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the registry binding name.
    pub fn binding(&self) -> &str {
        self.binding.as_deref().unwrap_or(self.id.as_str())
    }

    /// Total attempts allowed per visit (first attempt plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Status of a single stage attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    /// Attempt returned an output
    Succeeded,
    /// Attempt returned an error or violated the stage contract
    Failed,
    /// Attempt exceeded the stage timeout
    TimedOut,
    /// Attempt was interrupted by workflow cancellation
    Cancelled,
}

/// Classification of an attempt failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable failure
    Transient,
    /// Failure that aborts the workflow immediately
    Fatal,
    /// Stage timeout expired
    Timeout,
    /// Workflow cancelled while the attempt was in flight
    Cancelled,
    /// Stage returned an outcome label its edge table does not declare
    Contract,
}

impl FailureKind {
    /// Whether another attempt may change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Timeout)
    }
}

/// Error detail attached to an unsuccessful attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

impl StageFailure {
    /// Creates a new failure detail.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Immutable record of one stage attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage that produced the result
    pub stage_id: StageId,
    /// 1-based attempt number, monotonic across retries and loop-backs
    pub attempt: u32,
    /// Attempt status
    pub status: StageStatus,
    /// Label used for routing
    pub outcome_label: String,
    /// Stage payload, opaque to the engine
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Failure detail for unsuccessful attempts
    #[serde(default)]
    pub error: Option<StageFailure>,
    /// Attempt start
    pub started_at: DateTime<Utc>,
    /// Attempt end
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    /// Returns true if the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// Wall-clock duration of the attempt in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Status of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Workflow is executing frontiers
    Running,
    /// Workflow reached a terminal frontier
    Succeeded,
    /// Workflow aborted on a fatal failure or loop exhaustion
    Failed,
    /// Workflow was cancelled
    Cancelled,
}

impl WorkflowStatus {
    /// Returns true for Succeeded, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }

    /// Status transitions are monotonic: Running may move anywhere, terminal states never move.
    pub fn can_transition_to(&self, _next: WorkflowStatus) -> bool {
        !self.is_terminal()
    }
}

/// Final label of a release-risk decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLabel {
    /// Change may ship
    Approve,
    /// Change needs a human reviewer
    RequiresReview,
    /// Change must not ship
    Reject,
}

impl DecisionLabel {
    fn severity(&self) -> u8 {
        match self {
            DecisionLabel::Approve => 0,
            DecisionLabel::RequiresReview => 1,
            DecisionLabel::Reject => 2,
        }
    }

    /// Returns the less favourable of `self` and `limit`.
    pub fn capped_at(self, limit: DecisionLabel) -> DecisionLabel {
        if limit.severity() > self.severity() {
            limit
        } else {
            self
        }
    }
}

/// One weighted component of a decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Component name (e.g. `policy_compliance`)
    pub component: String,
    /// Stage the score was read from
    pub stage_id: StageId,
    /// Final outcome label of that stage, if it ran
    pub outcome_label: Option<String>,
    /// Normalised score in [0, 1]
    pub score: f64,
    /// Component weight
    pub weight: f64,
    /// True when the configured default score was used
    pub defaulted: bool,
}

/// Release-risk decision produced by aggregation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Final label
    pub label: DecisionLabel,
    /// Weighted score in [0, 1]
    pub score: f64,
    /// Contributing stage outcomes in configuration order
    pub rationale: Vec<Contribution>,
    /// True if any contributing stage never succeeded
    pub degraded: bool,
}
