//! Frontier-by-frontier workflow execution.
//!
//! The coordinator dispatches each frontier onto the worker pool, waits for
//! its blocking members, persists every attempt, and routes outcome labels
//! to the next frontier. Stage failures are recorded as results and never
//! unwind the coordinator; only state store errors abort a run.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use riskgate_core::{
    CancellationToken, CancellationTokenSource, FailureKind, StageContext, StageError, StageFailure,
    StageId, StageOutput, StageRegistry, StageResult, StageSpec, StageStatus, ValidationError,
    WorkflowId, WorkflowState, WorkflowStatus,
};
use riskgate_runtime::{EngineMetrics, MetricKind, StateStore, StoreError, WorkerPool};

use crate::audit::{AuditLog, AuditRecord};
use crate::config::EngineConfig;
use crate::workflow::aggregate::aggregate;
use crate::workflow::graph::{NextFrontier, WorkflowGraph};
use crate::workflow::policy::{AttemptOutcome, Route, StagePolicy, Verdict};
use crate::{EngineError, Result};

/// How a run ended, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// What a stage invocation produced.
enum Invocation {
    Output(StageOutput),
    Error(StageError),
    TimedOut,
    Cancelled,
}

/// Final verdict of one stage visit.
#[derive(Debug)]
struct StageRun {
    stage_id: StageId,
    verdict: Verdict,
    /// Visit ended because the workflow or its frontier was cancelled
    cancelled: bool,
}

impl StageRun {
    fn cancelled(stage_id: StageId) -> Self {
        let reason = format!("stage {} was cancelled", stage_id);
        Self {
            stage_id,
            verdict: Verdict::Fail { reason },
            cancelled: true,
        }
    }
}

/// Everything a stage visit needs, owned so it can move into a task.
struct StageDispatch {
    workflow_id: WorkflowId,
    graph: Arc<WorkflowGraph>,
    stage_id: StageId,
    input: Arc<Value>,
    upstream: Arc<BTreeMap<StageId, Value>>,
    /// Child of the workflow token, also cancelled when a sibling in the
    /// same frontier fails the workflow
    abort: CancellationTokenSource,
}

/// Drives workflow instances through their stage graphs.
///
/// Cloning a coordinator shares its store, pool, audit log and metrics.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    registry: Arc<StageRegistry>,
    store: Arc<dyn StateStore>,
    audit: AuditLog,
    metrics: EngineMetrics,
    policy: StagePolicy,
    pool: WorkerPool,
}

impl ExecutionCoordinator {
    /// Creates a coordinator with default pool, policy and in-memory audit log.
    pub fn new(registry: Arc<StageRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            audit: AuditLog::new(),
            metrics: EngineMetrics::new(),
            policy: StagePolicy::default(),
            pool: WorkerPool::default(),
        }
    }

    /// Creates a coordinator from engine settings.
    pub fn from_config(registry: Arc<StageRegistry>, store: Arc<dyn StateStore>, config: &EngineConfig) -> Self {
        let audit = match &config.audit_dir {
            Some(dir) => AuditLog::with_dir(dir),
            None => AuditLog::new(),
        };
        Self::new(registry, store)
            .with_audit_log(audit)
            .with_policy(StagePolicy::new(config.retry.clone()))
            .with_pool(WorkerPool::new(config.max_concurrency))
    }

    /// Replaces the audit log.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the metrics collector.
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the stage policy.
    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the worker pool.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Runs a validated graph to completion and returns the final state.
    pub async fn execute(&self, graph: Arc<WorkflowGraph>, input: Value) -> Result<WorkflowState> {
        let id = self.create_instance(&graph).await?;
        self.run(id, graph, Arc::new(input), CancellationToken::never())
            .await
    }

    /// Stores a new Running instance positioned at the first frontier.
    pub async fn create_instance(&self, graph: &WorkflowGraph) -> Result<WorkflowId> {
        let id = WorkflowId::new();
        let first = graph.frontiers().first().cloned().unwrap_or_default();
        self.store
            .create(WorkflowState::new(id, graph.name(), first))
            .await?;
        Ok(id)
    }

    /// Drives a stored instance until it reaches a terminal status.
    ///
    /// Store failures finalize the instance as Failed before being returned.
    pub async fn run(
        &self,
        id: WorkflowId,
        graph: Arc<WorkflowGraph>,
        input: Arc<Value>,
        token: CancellationToken,
    ) -> Result<WorkflowState> {
        info!(
            workflow_id = %id,
            workflow = graph.name(),
            stages = graph.stage_count(),
            "Workflow started"
        );

        match self.drive(id, &graph, &input, &token).await {
            Ok(outcome) => self.finish(id, &graph, outcome).await,
            Err(e) => {
                error!(workflow_id = %id, error = %e, "Workflow aborted by engine error");
                if let Err(finalize_error) = self
                    .store
                    .finalize(id, WorkflowStatus::Failed, None, Some(e.to_string()))
                    .await
                {
                    warn!(workflow_id = %id, error = %finalize_error, "Could not finalize aborted workflow");
                }
                self.metrics.record(MetricKind::WorkflowFailed);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        id: WorkflowId,
        graph: &Arc<WorkflowGraph>,
        input: &Arc<Value>,
        token: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut frontier = self.store.get(id).await?.current_frontier;

        loop {
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if frontier.is_empty() {
                return Ok(RunOutcome::Succeeded);
            }

            self.store.set_frontier(id, frontier.clone()).await?;
            let upstream = Arc::new(self.store.get(id).await?.upstream_payloads());
            info!(workflow_id = %id, frontier = ?frontier, "Dispatching frontier");

            let abort = token.child_source();
            let mut tasks = JoinSet::new();
            let mut next: Vec<StageId> = Vec::new();

            for stage_id in &frontier {
                let non_blocking = graph.stage(stage_id).map(|s| s.non_blocking).unwrap_or(false);
                let dispatch = StageDispatch {
                    workflow_id: id,
                    graph: graph.clone(),
                    stage_id: stage_id.clone(),
                    input: input.clone(),
                    upstream: upstream.clone(),
                    abort: if non_blocking {
                        token.child_source()
                    } else {
                        abort.clone()
                    },
                };
                let coordinator = self.clone();

                if non_blocking {
                    // Detached: results are recorded but never awaited or routed
                    tokio::spawn(async move {
                        let stage_id = dispatch.stage_id.clone();
                        if let Err(e) = coordinator.visit(dispatch).await {
                            warn!(workflow_id = %id, stage = %stage_id, error = %e, "Non-blocking stage failed");
                        }
                    });
                    if let NextFrontier::Stages(ids) = graph.static_successor(stage_id) {
                        next.extend(ids);
                    }
                    continue;
                }

                tasks.spawn(async move { coordinator.visit(dispatch).await });
            }

            // Barrier: every blocking member finishes before routing
            let mut runs = Vec::new();
            let mut engine_error = None;
            let mut panicked = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(run)) => runs.push(run),
                    Ok(Err(e)) => {
                        abort.cancel();
                        engine_error.get_or_insert(e);
                    }
                    Err(e) => {
                        abort.cancel();
                        panicked.get_or_insert(format!("stage task ended abnormally: {}", e));
                    }
                }
            }

            if let Some(e) = engine_error {
                return Err(e);
            }
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(reason) = panicked {
                return Ok(RunOutcome::Failed(reason));
            }

            runs.sort_by_key(|run| frontier.iter().position(|s| *s == run.stage_id));
            if let Some(reason) = runs.iter().find_map(|run| match &run.verdict {
                Verdict::Fail { reason } if !run.cancelled => Some(reason.clone()),
                _ => None,
            }) {
                return Ok(RunOutcome::Failed(reason));
            }

            for run in runs {
                match run.verdict {
                    Verdict::Proceed {
                        next: Route::Stages(ids),
                        ..
                    } => next.extend(ids),
                    Verdict::Proceed {
                        next: Route::Terminal,
                        ..
                    } => {}
                    Verdict::LoopBack {
                        edge,
                        targets,
                        bound,
                        ..
                    } => match self.store.increment_loop_counter(id, &edge, bound).await {
                        Ok(count) => {
                            self.metrics.record(MetricKind::LoopTraversal);
                            info!(
                                workflow_id = %id,
                                edge = %edge,
                                iteration = count,
                                bound,
                                targets = ?targets,
                                "Loop-back edge traversed"
                            );
                            next.extend(targets);
                        }
                        Err(StoreError::LoopBound { .. }) => {
                            self.metrics.record(MetricKind::LoopExceeded);
                            return Ok(RunOutcome::Failed(format!(
                                "loop edge {} reached its bound of {}",
                                edge, bound
                            )));
                        }
                        Err(e) => return Err(e.into()),
                    },
                    // Retries are resolved inside the visit; failures were handled above
                    Verdict::Retry { .. } | Verdict::Fail { .. } => {}
                }
            }

            frontier = graph.ordered(next);
        }
    }

    async fn finish(&self, id: WorkflowId, graph: &WorkflowGraph, outcome: RunOutcome) -> Result<WorkflowState> {
        let state = match outcome {
            RunOutcome::Succeeded => {
                let snapshot = self.store.get(id).await?;
                let decision = aggregate(&snapshot.stage_results, graph.aggregation());
                info!(
                    workflow_id = %id,
                    decision = ?decision.label,
                    score = decision.score,
                    degraded = decision.degraded,
                    "Workflow succeeded"
                );
                self.metrics.record(MetricKind::WorkflowSucceeded);
                self.store
                    .finalize(id, WorkflowStatus::Succeeded, Some(decision), None)
                    .await?
            }
            RunOutcome::Failed(reason) => {
                warn!(workflow_id = %id, reason = %reason, "Workflow failed");
                self.metrics.record(MetricKind::WorkflowFailed);
                self.store
                    .finalize(id, WorkflowStatus::Failed, None, Some(reason))
                    .await?
            }
            RunOutcome::Cancelled => {
                info!(workflow_id = %id, "Workflow cancelled");
                self.metrics.record(MetricKind::WorkflowCancelled);
                self.store
                    .finalize(id, WorkflowStatus::Cancelled, None, Some("workflow cancelled".to_string()))
                    .await?
            }
        };
        Ok(state)
    }

    /// Runs one visit of a stage: attempts until a non-retry verdict.
    async fn visit(&self, dispatch: StageDispatch) -> Result<StageRun> {
        let StageDispatch {
            workflow_id: id,
            graph,
            stage_id,
            input,
            upstream,
            abort,
        } = dispatch;

        let spec = graph
            .stage(&stage_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStage {
                context: "frontier".to_string(),
                stage: stage_id.clone(),
            })?;
        let stage = self
            .registry
            .resolve(spec.binding())
            .ok_or_else(|| ValidationError::UnregisteredStage {
                stage: stage_id.clone(),
                binding: spec.binding().to_string(),
            })?;
        let abort_token = abort.token();

        let mut visit_attempt = 0;
        loop {
            visit_attempt += 1;

            let permit = tokio::select! {
                biased;
                _ = abort_token.cancelled() => return Ok(StageRun::cancelled(stage_id)),
                permit = self.pool.acquire(stage_id.as_str()) => {
                    permit.map_err(|_| EngineError::Shutdown)?
                }
            };

            let attempt = self.store.reserve_attempt(id, &stage_id).await?;
            let ctx = StageContext::new(id, stage_id.clone())
                .with_attempt(attempt)
                .with_input(input.clone())
                .with_upstream(upstream.clone())
                .with_cancellation_token(abort_token.clone());

            debug!(workflow_id = %id, stage = %stage_id, attempt, "Stage attempt started");
            let started_at = Utc::now();
            let clock = Instant::now();

            let invocation = tokio::select! {
                biased;
                _ = abort_token.cancelled() => Invocation::Cancelled,
                outcome = tokio::time::timeout(spec.timeout(), stage.execute(&ctx)) => match outcome {
                    Ok(Ok(output)) => Invocation::Output(output),
                    Ok(Err(e)) => Invocation::Error(e),
                    Err(_) => Invocation::TimedOut,
                },
            };
            drop(permit);

            self.metrics.record_attempt(clock.elapsed());
            if matches!(invocation, Invocation::TimedOut) {
                self.metrics.record(MetricKind::StageTimeout);
            }

            let result = build_result(&graph, &spec, attempt, invocation, started_at, Utc::now());
            debug!(
                workflow_id = %id,
                stage = %stage_id,
                attempt,
                status = ?result.status,
                label = %result.outcome_label,
                "Stage attempt finished"
            );
            let snapshot = self.persist(id, &result).await?;

            if result.status == StageStatus::Cancelled {
                return Ok(StageRun::cancelled(stage_id));
            }

            let verdict = self.policy.evaluate(
                &graph,
                AttemptOutcome {
                    spec: &spec,
                    result: &result,
                    visit_attempt,
                    loop_counters: &snapshot.loop_counters,
                },
            );

            match verdict {
                Verdict::Retry { delay } => {
                    self.metrics.record(MetricKind::StageRetry);
                    info!(
                        workflow_id = %id,
                        stage = %stage_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying stage"
                    );
                    tokio::select! {
                        biased;
                        _ = abort_token.cancelled() => return Ok(StageRun::cancelled(stage_id)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Verdict::Fail { ref reason } => {
                    warn!(workflow_id = %id, stage = %stage_id, reason = %reason, "Stage failed the workflow");
                    abort.cancel();
                    return Ok(StageRun {
                        stage_id,
                        verdict,
                        cancelled: false,
                    });
                }
                Verdict::Proceed { forced: true, ref label, .. } => {
                    self.metrics.record(MetricKind::LoopExceeded);
                    warn!(
                        workflow_id = %id,
                        stage = %stage_id,
                        label = %label,
                        "Loop bound reached, proceeding with fallback label"
                    );
                    return Ok(StageRun {
                        stage_id,
                        verdict,
                        cancelled: false,
                    });
                }
                verdict => {
                    return Ok(StageRun {
                        stage_id,
                        verdict,
                        cancelled: false,
                    })
                }
            }
        }
    }

    /// Appends a result, re-reading on version conflicts, then audits it.
    async fn persist(&self, id: WorkflowId, result: &StageResult) -> Result<WorkflowState> {
        loop {
            let snapshot = self.store.get(id).await?;
            match self.store.append_result(id, snapshot.version, result.clone()).await {
                Ok(_) => break,
                Err(StoreError::Conflict { expected, actual, .. }) => {
                    self.metrics.record(MetricKind::StoreConflict);
                    debug!(workflow_id = %id, expected, actual, "Version conflict, retrying append");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.audit.record(AuditRecord::from_result(id, result)).await {
            warn!(workflow_id = %id, stage = %result.stage_id, error = %e, "Audit write failed");
        }

        Ok(self.store.get(id).await?)
    }
}

fn build_result(
    graph: &WorkflowGraph,
    spec: &StageSpec,
    attempt: u32,
    invocation: Invocation,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) -> StageResult {
    let (status, outcome_label, payload, error) = match invocation {
        Invocation::Output(output) => {
            let label = match graph.quality_gate(&spec.id) {
                Some(gate) => gate.label_for(&output.payload).to_string(),
                None => output.outcome_label,
            };
            if graph.accepts_label(&spec.id, &label) {
                (StageStatus::Succeeded, label, output.payload, None)
            } else {
                let message = format!("outcome label '{}' is not declared for stage {}", label, spec.id);
                (
                    StageStatus::Failed,
                    label,
                    output.payload,
                    Some(StageFailure::new(FailureKind::Contract, message)),
                )
            }
        }
        Invocation::Error(e) => {
            let kind = if e.is_fatal() {
                FailureKind::Fatal
            } else {
                FailureKind::Transient
            };
            (
                StageStatus::Failed,
                "failed".to_string(),
                Value::Null,
                Some(StageFailure::new(kind, e.to_string())),
            )
        }
        Invocation::TimedOut => (
            StageStatus::TimedOut,
            "timed_out".to_string(),
            Value::Null,
            Some(StageFailure::new(
                FailureKind::Timeout,
                format!("exceeded timeout of {} ms", spec.timeout().as_millis()),
            )),
        ),
        Invocation::Cancelled => (
            StageStatus::Cancelled,
            "cancelled".to_string(),
            Value::Null,
            Some(StageFailure::new(FailureKind::Cancelled, "workflow cancelled")),
        ),
    };

    StageResult {
        stage_id: spec.id.clone(),
        attempt,
        status,
        outcome_label,
        payload,
        error,
        started_at,
        finished_at,
    }
}
