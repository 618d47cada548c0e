//! Riskgate engine - release-risk workflow orchestration.
//!
//! This crate turns declarative stage graphs into running workflows:
//!
//! - Definition: YAML or builder-declared stages, edges and quality gates
//! - Validation: registry bindings, dependencies, cycles and loop bounds
//! - Execution: frontier dispatch on a bounded worker pool with retries,
//!   timeouts, cancellation and bounded loop-back edges
//! - Aggregation: weighted scoring into an approve / review / reject decision
//! - Audit: one record per stage attempt, optionally mirrored to JSON lines
//!
//! # Example
//!
//! ```ignore
//! use riskgate_engine::{Engine, EngineConfig, load_definition_from_file};
//!
//! let definition = load_definition_from_file(Path::new("release-risk.yaml")).await?;
//! let engine = Engine::new(registry, &EngineConfig::default());
//! let id = engine.submit(&definition, input).await?;
//! let state = engine.wait(id).await?;
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod workflow;

use riskgate_core::{ValidationError, WorkflowId};
use riskgate_runtime::StoreError;

/// Error types for engine operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Definition failed validation; no instance was created
    #[error("Invalid workflow definition: {0}")]
    Validation(#[from] ValidationError),

    /// State store rejected an operation
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Definition could not be read or parsed
    #[error("Definition error: {0}")]
    Definition(#[from] workflow::definition::DefinitionError),

    /// No workflow with this id
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    /// A workflow task ended without finalizing
    #[error("Workflow task failed: {0}")]
    Join(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker pool was closed
    #[error("Engine is shutting down")]
    Shutdown,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

pub use audit::{AuditError, AuditLog, AuditRecord};
pub use config::EngineConfig;
pub use engine::Engine;
pub use workflow::{
    aggregate, load_definition_from_file, load_definition_from_str, AggregationConfig,
    DefinitionBuilder, ExecutionCoordinator, LoopBackSpec, LoopFallback, QualityGate, RetryPolicy,
    ScoreComponent, WorkflowDefinition, WorkflowGraph,
};
