//! riskgate core - data model and stage contract for release-risk pipelines
//!
//! This crate holds everything the runtime and engine crates share:
//!
//! - [`types`]: stage specs, stage results, workflow status and decisions
//! - [`state`]: the versioned workflow instance snapshot
//! - [`error`]: validation and stage error taxonomy
//! - [`stage`]: the [`Stage`] trait and its [`StageContext`]
//! - [`registry`]: explicit registry of stage implementations
//! - [`cancellation`]: cooperative cancellation tokens
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use riskgate_core::{Stage, StageContext, StageError, StageOutput, StageRegistry};
//!
//! struct Ingest;
//!
//! #[async_trait]
//! impl Stage for Ingest {
//!     async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
//!         Ok(StageOutput::new("ok", ctx.input().clone()))
//!     }
//! }
//!
//! let registry = StageRegistry::new().register("ingest", Arc::new(Ingest));
//! assert!(registry.contains("ingest"));
//! ```

pub mod cancellation;
pub mod error;
pub mod registry;
pub mod stage;
pub mod state;
pub mod types;

pub use cancellation::{CancellationToken, CancellationTokenSource};
pub use error::{StageError, ValidationError, ValidationResult};
pub use registry::StageRegistry;
pub use stage::{Stage, StageContext, StageOutput};
pub use state::WorkflowState;
pub use types::{
    Contribution, Decision, DecisionLabel, EdgeId, FailureKind, StageFailure, StageId, StageMode,
    StageResult, StageSpec, StageStatus, WorkflowId, WorkflowStatus, DEFAULT_STAGE_TIMEOUT_MS,
    DEGRADED_LABEL,
};
