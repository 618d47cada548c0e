//! Stage-graph workflows for release-risk pipelines.
//!
//! A workflow is declared as a [`WorkflowDefinition`] (YAML or
//! [`DefinitionBuilder`]), validated into a [`WorkflowGraph`], and driven
//! frontier by frontier by the [`ExecutionCoordinator`].
//!
//! # Execution Model
//!
//! 1. Validate the definition against the stage registry
//! 2. Dispatch the first frontier; parallel-eligible members run concurrently
//! 3. Wait for every blocking member of the frontier (barrier)
//! 4. Route each outcome label through the declared edges, traversing
//!    bounded loop-back edges when a quality gate asks for rework
//! 5. Aggregate a release decision once the terminal frontier completes
//!
//! Every attempt is appended to the state store and the audit log.

pub mod aggregate;
pub mod builder;
pub mod coordinator;
pub mod definition;
pub mod graph;
pub mod policy;

pub use aggregate::{aggregate, final_outcome_label, AggregationConfig, ScoreComponent};
pub use builder::DefinitionBuilder;
pub use coordinator::ExecutionCoordinator;
pub use definition::{
    load_definition_from_file, load_definition_from_str, DefinitionError, EdgeSpec, EdgeTarget,
    LoopBackSpec, LoopFallback, WorkflowDefinition, TERMINAL_TARGET, WILDCARD_LABEL,
};
pub use graph::{NextFrontier, WorkflowGraph};
pub use policy::{
    AttemptOutcome, LoopBound, QualityGate, RetryPolicy, Route, StagePolicy, Verdict,
    DEFAULT_LOOP_BOUND,
};

use serde_json::Value;

/// Reads a numeric field from a stage payload.
///
/// `field` may be a dotted path into nested objects (`"metrics.coverage"`).
pub(crate) fn read_number(payload: &Value, field: &str) -> Option<f64> {
    field
        .split('.')
        .try_fold(payload, |value, key| value.get(key))
        .and_then(Value::as_f64)
}
