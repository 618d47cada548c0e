//! Validated, indexed stage graph.
//!
//! [`WorkflowGraph::load`] validates a [`WorkflowDefinition`] against the
//! stage registry and precomputes the static frontiers. Cycle detection uses
//! petgraph over dependency edges plus forward routing edges; loop-back
//! edges are excluded because their termination is guaranteed by bounds.

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};

use riskgate_core::{
    EdgeId, StageId, StageMode, StageRegistry, StageSpec, ValidationError, ValidationResult,
    DEGRADED_LABEL,
};

use crate::workflow::aggregate::AggregationConfig;
use crate::workflow::definition::{EdgeSpec, EdgeTarget, LoopFallback, WorkflowDefinition, WILDCARD_LABEL};
use crate::workflow::policy::QualityGate;

/// Routing result for a stage outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextFrontier {
    /// Continue with these stages
    Stages(Vec<StageId>),
    /// Workflow is complete
    Terminal,
    /// Traverse a loop-back edge
    LoopBack {
        /// Edge being traversed
        edge: EdgeId,
        /// Stages to re-run
        targets: Vec<StageId>,
        /// 1-based traversal number this routing would make
        iteration: u32,
        /// Declared bound of the edge
        bound: u32,
    },
    /// Loop-back edge has reached its bound
    LoopExceeded {
        /// Exhausted edge
        edge: EdgeId,
        /// Declared fallback
        fallback: LoopFallback,
        /// Declared bound of the edge
        bound: u32,
    },
}

/// Validated workflow graph.
///
/// Immutable after load; shared by `Arc` between the coordinator and the
/// tasks it spawns.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    stages: IndexMap<StageId, StageSpec>,
    edges: HashMap<StageId, Vec<EdgeSpec>>,
    gates: HashMap<StageId, QualityGate>,
    frontiers: Vec<Vec<StageId>>,
    frontier_index: HashMap<StageId, usize>,
    aggregation: AggregationConfig,
}

impl WorkflowGraph {
    /// Validates `definition` and builds the graph.
    ///
    /// # Returns
    ///
    /// - `Ok(WorkflowGraph)` - If the definition is well-formed
    /// - `Err(ValidationError)` - The first problem found
    pub fn load(definition: &WorkflowDefinition, registry: &StageRegistry) -> ValidationResult<Self> {
        if definition.stages.is_empty() {
            return Err(ValidationError::EmptyWorkflow(definition.name.clone()));
        }

        let mut stages: IndexMap<StageId, StageSpec> = IndexMap::new();
        for spec in &definition.stages {
            if stages.contains_key(&spec.id) {
                return Err(ValidationError::DuplicateStage(spec.id.clone()));
            }
            if spec.timeout_ms == 0 {
                return Err(ValidationError::InvalidTimeout(spec.id.clone()));
            }
            if !registry.contains(spec.binding()) {
                return Err(ValidationError::UnregisteredStage {
                    stage: spec.id.clone(),
                    binding: spec.binding().to_string(),
                });
            }
            stages.insert(spec.id.clone(), spec.clone());
        }

        for spec in stages.values() {
            for dep in &spec.dependencies {
                if !stages.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        stage: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut edges: HashMap<StageId, Vec<EdgeSpec>> = HashMap::new();
        let mut seen: HashSet<(StageId, String)> = HashSet::new();
        for edge in &definition.edges {
            require_stage(&stages, &edge.from, "Edge source")?;
            for target in edge.to.stages() {
                require_stage(&stages, target, &format!("Edge from {} on '{}'", edge.from, edge.on))?;
            }
            if !seen.insert((edge.from.clone(), edge.on.clone())) {
                return Err(ValidationError::DuplicateEdge {
                    from: edge.from.clone(),
                    label: edge.on.clone(),
                });
            }
            if let Some(spec) = &edge.loop_back {
                if spec.bound().is_none() {
                    return Err(ValidationError::UnboundedLoop {
                        from: edge.from.clone(),
                        label: edge.on.clone(),
                    });
                }
            }
            edges.entry(edge.from.clone()).or_default().push(edge.clone());
        }

        let mut gates = HashMap::new();
        for gate in &definition.quality_gates {
            require_stage(&stages, &gate.stage, "Quality gate")?;
            gates.insert(gate.stage.clone(), gate.clone());
        }

        for component in &definition.aggregation.components {
            require_stage(
                &stages,
                &component.stage,
                &format!("Aggregation component '{}'", component.name),
            )?;
        }

        check_cycles(&stages, &definition.edges)?;

        let frontiers = compute_frontiers(&stages);
        let frontier_index = frontiers
            .iter()
            .enumerate()
            .flat_map(|(i, frontier)| frontier.iter().map(move |id| (id.clone(), i)))
            .collect();

        let graph = Self {
            name: definition.name.clone(),
            stages,
            edges,
            gates,
            frontiers,
            frontier_index,
            aggregation: definition.aggregation.clone(),
        };

        graph.check_loop_backs()?;

        Ok(graph)
    }

    /// Loop-back targets must not run after their source, and a forced
    /// fallback label must not lead into another loop.
    fn check_loop_backs(&self) -> ValidationResult<()> {
        for edge in self.edges.values().flatten() {
            let Some(spec) = &edge.loop_back else {
                continue;
            };

            let source = self.frontier_index[&edge.from];
            for target in edge.to.stages() {
                if self.frontier_index[target] > source {
                    return Err(ValidationError::ForwardLoopBack {
                        from: edge.from.clone(),
                        target: target.clone(),
                    });
                }
            }

            if let LoopFallback::ForceOutcome(label) = &spec.fallback {
                let loops_again = self
                    .edge_for(&edge.from, label)
                    .map(EdgeSpec::is_loop_back)
                    .unwrap_or(false);
                if loops_again {
                    return Err(ValidationError::InvalidFallback {
                        from: edge.from.clone(),
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a stage spec.
    pub fn stage(&self, id: &StageId) -> Option<&StageSpec> {
        self.stages.get(id)
    }

    /// Stage specs in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.values()
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Position of a stage in declaration order.
    pub fn declaration_index(&self, id: &StageId) -> Option<usize> {
        self.stages.get_index_of(id)
    }

    /// Static frontiers in execution order.
    pub fn frontiers(&self) -> &[Vec<StageId>] {
        &self.frontiers
    }

    /// Index of the static frontier containing `id`.
    pub fn frontier_of(&self, id: &StageId) -> Option<usize> {
        self.frontier_index.get(id).copied()
    }

    /// Quality gate attached to a stage, if any.
    pub fn quality_gate(&self, id: &StageId) -> Option<&QualityGate> {
        self.gates.get(id)
    }

    /// Aggregation settings.
    pub fn aggregation(&self) -> &AggregationConfig {
        &self.aggregation
    }

    /// Edges leaving a stage.
    pub fn edges_from(&self, id: &StageId) -> &[EdgeSpec] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edge matching `(stage, label)`, falling back to `(stage, "*")`.
    fn edge_for(&self, stage: &StageId, label: &str) -> Option<&EdgeSpec> {
        let edges = self.edges_from(stage);
        edges
            .iter()
            .find(|e| e.on == label)
            .or_else(|| edges.iter().find(|e| e.on == WILDCARD_LABEL))
    }

    /// Returns true if `label` is a valid outcome for `stage`.
    ///
    /// Stages without explicit edges accept any label; the degraded label and
    /// the labels of the stage's own quality gate are always accepted.
    pub fn accepts_label(&self, stage: &StageId, label: &str) -> bool {
        let edges = self.edges_from(stage);
        let gate_label = self
            .quality_gate(stage)
            .is_some_and(|g| g.pass_label == label || g.fail_label == label);
        label == DEGRADED_LABEL
            || gate_label
            || edges.is_empty()
            || edges.iter().any(|e| e.on == label || e.on == WILDCARD_LABEL)
    }

    /// Resolves where the workflow goes after `stage` produced `label`.
    ///
    /// Lookup order is the exact edge, then the wildcard edge, then the
    /// next static frontier (or `Terminal` after the last one).
    pub fn next_frontier(
        &self,
        stage: &StageId,
        label: &str,
        loop_counters: &BTreeMap<EdgeId, u32>,
    ) -> NextFrontier {
        let Some(edge) = self.edge_for(stage, label) else {
            return self.static_successor(stage);
        };

        match (&edge.to, &edge.loop_back) {
            (EdgeTarget::Terminal, _) => NextFrontier::Terminal,
            (EdgeTarget::Stages(targets), None) => NextFrontier::Stages(targets.clone()),
            (EdgeTarget::Stages(targets), Some(spec)) => {
                let edge_id = EdgeId::new(stage, &edge.on);
                let bound = spec.bound().unwrap_or(0);
                let count = loop_counters.get(&edge_id).copied().unwrap_or(0);
                if count >= bound {
                    NextFrontier::LoopExceeded {
                        edge: edge_id,
                        fallback: spec.fallback.clone(),
                        bound,
                    }
                } else {
                    NextFrontier::LoopBack {
                        edge: edge_id,
                        targets: targets.clone(),
                        iteration: count + 1,
                        bound,
                    }
                }
            }
        }
    }

    /// Route a stage takes when none of its edges match.
    pub fn static_successor(&self, stage: &StageId) -> NextFrontier {
        self.frontier_of(stage)
            .and_then(|i| self.frontiers.get(i + 1))
            .map(|next| NextFrontier::Stages(next.clone()))
            .unwrap_or(NextFrontier::Terminal)
    }

    /// Deduplicates `ids` and orders them by declaration.
    pub fn ordered(&self, ids: impl IntoIterator<Item = StageId>) -> Vec<StageId> {
        let mut unique: Vec<StageId> = ids
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        unique.sort_by_key(|id| self.declaration_index(id).unwrap_or(usize::MAX));
        unique
    }
}

fn require_stage(
    stages: &IndexMap<StageId, StageSpec>,
    id: &StageId,
    context: &str,
) -> ValidationResult<()> {
    if stages.contains_key(id) {
        Ok(())
    } else {
        Err(ValidationError::UnknownStage {
            context: context.to_string(),
            stage: id.clone(),
        })
    }
}

fn check_cycles(stages: &IndexMap<StageId, StageSpec>, edges: &[EdgeSpec]) -> ValidationResult<()> {
    let mut graph: DiGraph<StageId, ()> = DiGraph::new();
    let nodes: HashMap<&StageId, NodeIndex> = stages
        .keys()
        .map(|id| (id, graph.add_node(id.clone())))
        .collect();

    for spec in stages.values() {
        for dep in &spec.dependencies {
            graph.add_edge(nodes[dep], nodes[&spec.id], ());
        }
    }
    for edge in edges.iter().filter(|e| !e.is_loop_back()) {
        for target in edge.to.stages() {
            graph.add_edge(nodes[&edge.from], nodes[target], ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    // Report the first strongly connected component that is an actual cycle
    let cycle = tarjan_scc(&graph)
        .into_iter()
        .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .unwrap_or_default();
    let mut ids: Vec<StageId> = cycle.into_iter().map(|idx| graph[idx].clone()).collect();
    ids.sort_by_key(|id| stages.get_index_of(id));
    Err(ValidationError::CycleDetected(ids))
}

/// Level-based frontiers over the dependency relation.
///
/// All parallel-eligible ready stages form one frontier; every sequential
/// ready stage gets a frontier of its own. Frontiers of one level are
/// ordered by the declaration index of their first member.
fn compute_frontiers(stages: &IndexMap<StageId, StageSpec>) -> Vec<Vec<StageId>> {
    let mut frontiers = Vec::new();
    let mut done: HashSet<&StageId> = HashSet::new();

    while done.len() < stages.len() {
        let ready: Vec<&StageSpec> = stages
            .values()
            .filter(|s| !done.contains(&s.id))
            .filter(|s| s.dependencies.iter().all(|d| done.contains(d)))
            .collect();
        if ready.is_empty() {
            // Unreachable after check_cycles
            break;
        }

        let parallel: Vec<StageId> = ready
            .iter()
            .filter(|s| s.mode == StageMode::Parallel)
            .map(|s| s.id.clone())
            .collect();
        let mut parallel_emitted = false;
        for spec in &ready {
            match spec.mode {
                StageMode::Sequential => frontiers.push(vec![spec.id.clone()]),
                StageMode::Parallel if !parallel_emitted => {
                    frontiers.push(parallel.clone());
                    parallel_emitted = true;
                }
                StageMode::Parallel => {}
            }
        }

        done.extend(ready.iter().map(|s| &s.id));
    }

    frontiers
}
