//! Error types for riskgate.

use crate::types::StageId;

/// Errors raised while loading a workflow definition into a graph.
///
/// Validation errors are fatal at load time and never retried. No workflow
/// instance is created for a definition that fails validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Definition declares no stages.
    #[error("Workflow '{0}' declares no stages")]
    EmptyWorkflow(String),

    /// Two stages share an id.
    #[error("Duplicate stage id: {0}")]
    DuplicateStage(StageId),

    /// Stage timeout is zero.
    #[error("Stage {0} has a zero timeout")]
    InvalidTimeout(StageId),

    /// Stage binding has no registered implementation.
    #[error("Stage {stage} is bound to unregistered implementation '{binding}'")]
    UnregisteredStage {
        /// Stage declaring the binding
        stage: StageId,
        /// Binding name
        binding: String,
    },

    /// Dependency references a stage that does not exist.
    #[error("Stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency {
        /// Stage declaring the dependency
        stage: StageId,
        /// Missing dependency
        dependency: StageId,
    },

    /// Edge, quality gate or aggregation component references an unknown stage.
    #[error("{context} references unknown stage {stage}")]
    UnknownStage {
        /// Where the reference was found
        context: String,
        /// Missing stage
        stage: StageId,
    },

    /// Same (stage, label) pair routed twice.
    #[error("Edge from {from} on '{label}' is declared more than once")]
    DuplicateEdge {
        /// Source stage
        from: StageId,
        /// Outcome label
        label: String,
    },

    /// Dependencies plus forward edges form a cycle.
    #[error("Cycle detected among stages: {0:?}")]
    CycleDetected(Vec<StageId>),

    /// Loop-back edge has no usable bound.
    #[error("Loop-back edge from {from} on '{label}' has no iteration bound")]
    UnboundedLoop {
        /// Source stage
        from: StageId,
        /// Outcome label
        label: String,
    },

    /// Loop-back edge targets a stage that does not run before its source.
    #[error("Loop-back edge from {from} targets {target}, which does not precede it")]
    ForwardLoopBack {
        /// Source stage
        from: StageId,
        /// Offending target
        target: StageId,
    },

    /// Loop fallback forces a label that routes into another loop.
    #[error("Fallback of loop edge from {from} forces '{label}', which loops again")]
    InvalidFallback {
        /// Source stage
        from: StageId,
        /// Forced label
        label: String,
    },
}

/// Errors a stage implementation may return.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    /// Retryable failure.
    #[error("Transient stage failure: {0}")]
    Transient(String),

    /// Unrecoverable failure; aborts the workflow without retries.
    #[error("Fatal stage failure: {0}")]
    Fatal(String),

    /// Any other implementation error, treated as transient.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Returns true for [`StageError::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }
}

/// Type alias for definition validation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
