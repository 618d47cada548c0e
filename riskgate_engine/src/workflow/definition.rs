//! Declarative workflow definitions and YAML/JSON loading.
//!
//! A [`WorkflowDefinition`] is plain data: stage specs in declaration order,
//! the conditional edge table, quality gates and the aggregation
//! configuration. It is validated and indexed by
//! [`WorkflowGraph::load`](crate::workflow::graph::WorkflowGraph::load).
//!
//! # Example
//!
//! ```yaml
//! name: release-risk
//! stages:
//!   - id: ingest
//!   - id: analyze
//!     dependencies: [ingest]
//!     max_retries: 2
//!   - id: gate
//!     dependencies: [analyze]
//! edges:
//!   - from: gate
//!     on: needs-review
//!     to: [analyze]
//!     loop_back:
//!       max_iterations: 3
//!       fallback:
//!         force_outcome: accept-degraded
//!   - from: gate
//!     on: accept-degraded
//!     to: terminal
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use riskgate_core::{StageId, StageSpec};

use crate::workflow::aggregate::AggregationConfig;
use crate::workflow::policy::QualityGate;

/// Edge label matching any outcome of its source stage.
pub const WILDCARD_LABEL: &str = "*";

/// Reserved edge target ending the workflow.
pub const TERMINAL_TARGET: &str = "terminal";

/// Declarative workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Stage specs in declaration order
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    /// Conditional routing edges
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Quality gates deriving outcome labels from payloads
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
    /// Decision aggregation settings
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

impl WorkflowDefinition {
    /// Creates an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            stages: Vec::new(),
            edges: Vec::new(),
            quality_gates: Vec::new(),
            aggregation: AggregationConfig::default(),
        }
    }
}

/// One entry of the edge table: `(from, on) -> to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Source stage
    pub from: StageId,
    /// Outcome label, or `*` for any label
    pub on: String,
    /// Next stages or `terminal`
    pub to: EdgeTarget,
    /// Present on bounded loop-back edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_back: Option<LoopBackSpec>,
}

impl EdgeSpec {
    /// Returns true for loop-back edges.
    pub fn is_loop_back(&self) -> bool {
        self.loop_back.is_some()
    }
}

/// Target of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTarget", into = "RawTarget")]
pub enum EdgeTarget {
    /// Continue with these stages
    Stages(Vec<StageId>),
    /// End the workflow
    Terminal,
}

impl EdgeTarget {
    /// Target stages, empty for `Terminal`.
    pub fn stages(&self) -> &[StageId] {
        match self {
            EdgeTarget::Stages(ids) => ids,
            EdgeTarget::Terminal => &[],
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTarget {
    One(String),
    Many(Vec<StageId>),
}

impl From<RawTarget> for EdgeTarget {
    fn from(raw: RawTarget) -> Self {
        match raw {
            RawTarget::One(s) if s == TERMINAL_TARGET => EdgeTarget::Terminal,
            RawTarget::One(s) => EdgeTarget::Stages(vec![StageId::from(s)]),
            RawTarget::Many(ids) => EdgeTarget::Stages(ids),
        }
    }
}

impl From<EdgeTarget> for RawTarget {
    fn from(target: EdgeTarget) -> Self {
        match target {
            EdgeTarget::Terminal => RawTarget::One(TERMINAL_TARGET.to_string()),
            EdgeTarget::Stages(ids) => RawTarget::Many(ids),
        }
    }
}

/// Bound and fallback of a loop-back edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBackSpec {
    /// Maximum traversals; missing or zero is rejected at load time
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// What to do once the bound is reached
    #[serde(default)]
    pub fallback: LoopFallback,
}

impl LoopBackSpec {
    /// Creates a loop-back spec.
    pub fn new(max_iterations: u32, fallback: LoopFallback) -> Self {
        Self {
            max_iterations: Some(max_iterations),
            fallback,
        }
    }

    /// Usable bound, if one was declared.
    pub fn bound(&self) -> Option<u32> {
        self.max_iterations.filter(|n| *n > 0)
    }
}

/// Action taken when a loop-back edge reaches its bound.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawFallback", into = "RawFallback")]
pub enum LoopFallback {
    /// Route as if the source stage had produced this label
    ForceOutcome(String),
    /// Fail the workflow
    #[default]
    Fail,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawFallback {
    Keyword(String),
    Force { force_outcome: String },
}

impl TryFrom<RawFallback> for LoopFallback {
    type Error = String;

    fn try_from(raw: RawFallback) -> Result<Self, Self::Error> {
        match raw {
            RawFallback::Keyword(k) if k == "fail" => Ok(LoopFallback::Fail),
            RawFallback::Keyword(k) => Err(format!("unknown loop fallback '{}'", k)),
            RawFallback::Force { force_outcome } => Ok(LoopFallback::ForceOutcome(force_outcome)),
        }
    }
}

impl From<LoopFallback> for RawFallback {
    fn from(fallback: LoopFallback) -> Self {
        match fallback {
            LoopFallback::Fail => RawFallback::Keyword("fail".to_string()),
            LoopFallback::ForceOutcome(label) => RawFallback::Force {
                force_outcome: label,
            },
        }
    }
}

/// Errors that can occur while reading a definition.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (or JSON) parsing error
    #[error("Definition parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Loads a workflow definition from a YAML or JSON file.
///
/// # Example
///
/// ```ignore
/// let definition = load_definition_from_file(Path::new("release-risk.yaml")).await?;
/// ```
pub async fn load_definition_from_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    load_definition_from_str(&content)
}

/// Loads a workflow definition from a YAML or JSON string.
pub fn load_definition_from_str(source: &str) -> Result<WorkflowDefinition, DefinitionError> {
    Ok(serde_yaml::from_str(source)?)
}
