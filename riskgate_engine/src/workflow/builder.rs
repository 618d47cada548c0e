//! Fluent builder API for workflow definitions.
//!
//! Produces the same [`WorkflowDefinition`] a YAML file would. Nothing is
//! validated here; validation happens in
//! [`WorkflowGraph::load`](crate::workflow::graph::WorkflowGraph::load).

use riskgate_core::{StageId, StageSpec};

use crate::workflow::aggregate::AggregationConfig;
use crate::workflow::definition::{EdgeSpec, EdgeTarget, LoopBackSpec, LoopFallback, WorkflowDefinition};
use crate::workflow::policy::{LoopBound, QualityGate};

/// Fluent builder for workflow definitions.
///
/// # Example
///
/// ```ignore
/// use riskgate_engine::workflow::DefinitionBuilder;
/// use riskgate_core::StageSpec;
///
/// let definition = DefinitionBuilder::new("release-risk")
///     .stage(StageSpec::new("ingest").fatal())
///     .stage(StageSpec::new("analyze").depends_on("ingest"))
///     .stage(StageSpec::new("gate").depends_on("analyze"))
///     .quality_gate(QualityGate::new("gate", 0.7))
///     .loop_back("gate", "needs-review", ["analyze"])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    definition: WorkflowDefinition,
}

impl DefinitionBuilder {
    /// Creates a builder for an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: WorkflowDefinition::new(name),
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    /// Appends a stage; declaration order is preserved.
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.definition.stages.push(spec);
        self
    }

    /// Routes `(from, on)` to `targets`.
    pub fn edge<I, S>(self, from: impl Into<StageId>, on: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        let to = EdgeTarget::Stages(targets.into_iter().map(Into::into).collect());
        self.push_edge(from.into(), on.into(), to, None)
    }

    /// Routes `(from, on)` to the end of the workflow.
    pub fn terminal_edge(self, from: impl Into<StageId>, on: impl Into<String>) -> Self {
        self.push_edge(from.into(), on.into(), EdgeTarget::Terminal, None)
    }

    /// Adds a loop-back edge with the default bound that fails the workflow when exhausted.
    pub fn loop_back<I, S>(self, from: impl Into<StageId>, on: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        let spec = LoopBackSpec::new(LoopBound::default().get(), LoopFallback::Fail);
        self.loop_back_with(from, on, targets, spec)
    }

    /// Adds a loop-back edge with an explicit bound and fallback.
    pub fn loop_back_with<I, S>(
        self,
        from: impl Into<StageId>,
        on: impl Into<String>,
        targets: I,
        spec: LoopBackSpec,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        let to = EdgeTarget::Stages(targets.into_iter().map(Into::into).collect());
        self.push_edge(from.into(), on.into(), to, Some(spec))
    }

    /// Attaches a quality gate.
    pub fn quality_gate(mut self, gate: QualityGate) -> Self {
        self.definition.quality_gates.push(gate);
        self
    }

    /// Sets the aggregation settings.
    pub fn aggregation(mut self, config: AggregationConfig) -> Self {
        self.definition.aggregation = config;
        self
    }

    /// Returns the definition.
    pub fn build(self) -> WorkflowDefinition {
        self.definition
    }

    fn push_edge(mut self, from: StageId, on: String, to: EdgeTarget, loop_back: Option<LoopBackSpec>) -> Self {
        self.definition.edges.push(EdgeSpec {
            from,
            on,
            to,
            loop_back,
        });
        self
    }
}
