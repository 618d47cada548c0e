//! Retry, quality-gate and loop-back decisions.
//!
//! [`StagePolicy::evaluate`] turns one recorded attempt into a [`Verdict`]:
//! retry the stage, traverse a loop-back edge, proceed to the next frontier,
//! or fail the workflow. It is a pure function of the attempt, the stage
//! spec, the edge table and the current loop counters.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use riskgate_core::{
    EdgeId, FailureKind, StageId, StageResult, StageSpec, StageStatus, DEGRADED_LABEL,
};

use crate::workflow::definition::LoopFallback;
use crate::workflow::graph::{NextFrontier, WorkflowGraph};
use crate::workflow::read_number;

/// Bound applied by builders that do not state one.
pub const DEFAULT_LOOP_BOUND: u32 = 3;

/// Maximum traversals of a loop-back edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBound(u32);

impl LoopBound {
    /// Creates a bound (at least one traversal).
    pub fn new(max_iterations: u32) -> Self {
        Self(max_iterations.max(1))
    }

    /// Returns the bound.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for LoopBound {
    fn default() -> Self {
        Self(DEFAULT_LOOP_BOUND)
    }
}

/// Exponential backoff between attempts of one stage visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay
    pub max_backoff_ms: u64,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Randomise each delay within [delay / 2, delay]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic delays.
    pub fn fixed(initial_backoff_ms: u64, max_backoff_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_backoff_ms,
            max_backoff_ms,
            multiplier,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0) as u64;

        if self.jitter && capped > 1 {
            let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
            Duration::from_millis(jittered)
        } else {
            Duration::from_millis(capped)
        }
    }
}

fn default_field() -> String {
    "score".to_string()
}

fn default_pass_label() -> String {
    "pass".to_string()
}

fn default_fail_label() -> String {
    "needs-review".to_string()
}

/// Derives a stage's outcome label from a numeric payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Gated stage
    pub stage: StageId,
    /// Payload field (dotted path) holding the score
    #[serde(default = "default_field")]
    pub field: String,
    /// Minimum passing score
    pub threshold: f64,
    /// Label when the score meets the threshold
    #[serde(default = "default_pass_label")]
    pub pass_label: String,
    /// Label when the score is below the threshold or missing
    #[serde(default = "default_fail_label")]
    pub fail_label: String,
}

impl QualityGate {
    /// Creates a gate on `stage.score` with default labels.
    pub fn new(stage: impl Into<StageId>, threshold: f64) -> Self {
        Self {
            stage: stage.into(),
            field: default_field(),
            threshold,
            pass_label: default_pass_label(),
            fail_label: default_fail_label(),
        }
    }

    /// Reads the score from another payload field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Overrides both labels.
    pub fn with_labels(mut self, pass: impl Into<String>, fail: impl Into<String>) -> Self {
        self.pass_label = pass.into();
        self.fail_label = fail.into();
        self
    }

    /// Label for a payload.
    pub fn label_for(&self, payload: &Value) -> &str {
        match read_number(payload, &self.field) {
            Some(score) if score >= self.threshold => &self.pass_label,
            _ => &self.fail_label,
        }
    }
}

/// Where a proceeding stage sends the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Continue with these stages
    Stages(Vec<StageId>),
    /// Workflow is complete
    Terminal,
}

/// Decision for one recorded attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Re-invoke the stage after `delay`
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Traverse a bounded loop-back edge
    LoopBack {
        /// Edge being traversed
        edge: EdgeId,
        /// Stages to re-run
        targets: Vec<StageId>,
        /// 1-based traversal number
        iteration: u32,
        /// Declared bound of the edge
        bound: u32,
    },
    /// Continue routing
    Proceed {
        /// Next stages or terminal
        next: Route,
        /// Label routing was resolved with
        label: String,
        /// True when the label came from a loop fallback
        forced: bool,
    },
    /// Fail the workflow
    Fail {
        /// Human-readable reason
        reason: String,
    },
}

/// Facts about one attempt needed to decide what happens next.
#[derive(Debug, Clone, Copy)]
pub struct AttemptOutcome<'a> {
    /// Spec of the stage that ran
    pub spec: &'a StageSpec,
    /// Recorded attempt
    pub result: &'a StageResult,
    /// 1-based attempt number within the current visit
    pub visit_attempt: u32,
    /// Loop counters at the time of routing
    pub loop_counters: &'a BTreeMap<EdgeId, u32>,
}

/// Applies retry, loop-back and fallback rules.
#[derive(Debug, Clone, Default)]
pub struct StagePolicy {
    retry: RetryPolicy,
}

impl StagePolicy {
    /// Creates a policy with the given retry settings.
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Retry settings.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Decides what follows an attempt.
    pub fn evaluate(&self, graph: &WorkflowGraph, outcome: AttemptOutcome<'_>) -> Verdict {
        let AttemptOutcome {
            spec,
            result,
            visit_attempt,
            loop_counters,
        } = outcome;

        match result.status {
            StageStatus::Succeeded => self.route(graph, &spec.id, &result.outcome_label, loop_counters),
            StageStatus::Cancelled => Verdict::Fail {
                reason: format!("stage {} was cancelled", spec.id),
            },
            StageStatus::Failed | StageStatus::TimedOut => {
                let (kind, message) = result
                    .error
                    .as_ref()
                    .map(|e| (e.kind, e.message.as_str()))
                    .unwrap_or((FailureKind::Transient, "unknown failure"));

                if kind == FailureKind::Fatal {
                    return Verdict::Fail {
                        reason: format!("stage {} failed fatally: {}", spec.id, message),
                    };
                }
                if kind.is_retryable() && visit_attempt < spec.max_attempts() {
                    return Verdict::Retry {
                        delay: self.retry.backoff(visit_attempt),
                    };
                }
                if spec.fatal {
                    return Verdict::Fail {
                        reason: format!(
                            "fatal stage {} failed after {} attempt(s): {}",
                            spec.id, visit_attempt, message
                        ),
                    };
                }
                self.route(graph, &spec.id, DEGRADED_LABEL, loop_counters)
            }
        }
    }

    fn route(
        &self,
        graph: &WorkflowGraph,
        stage: &StageId,
        label: &str,
        loop_counters: &BTreeMap<EdgeId, u32>,
    ) -> Verdict {
        match graph.next_frontier(stage, label, loop_counters) {
            NextFrontier::Stages(ids) => proceed(Route::Stages(ids), label, false),
            NextFrontier::Terminal => proceed(Route::Terminal, label, false),
            NextFrontier::LoopBack {
                edge,
                targets,
                iteration,
                bound,
            } => Verdict::LoopBack {
                edge,
                targets,
                iteration,
                bound,
            },
            NextFrontier::LoopExceeded {
                edge,
                fallback,
                bound,
            } => self.fallback(graph, stage, &edge, fallback, bound, loop_counters),
        }
    }

    /// Resolves a loop edge that reached its bound.
    pub fn fallback(
        &self,
        graph: &WorkflowGraph,
        stage: &StageId,
        edge: &EdgeId,
        fallback: LoopFallback,
        bound: u32,
        loop_counters: &BTreeMap<EdgeId, u32>,
    ) -> Verdict {
        match fallback {
            LoopFallback::Fail => Verdict::Fail {
                reason: format!("loop edge {} exhausted after {} iteration(s)", edge, bound),
            },
            LoopFallback::ForceOutcome(label) => {
                match graph.next_frontier(stage, &label, loop_counters) {
                    NextFrontier::Stages(ids) => proceed(Route::Stages(ids), &label, true),
                    NextFrontier::Terminal => proceed(Route::Terminal, &label, true),
                    NextFrontier::LoopBack { .. } | NextFrontier::LoopExceeded { .. } => Verdict::Fail {
                        reason: format!(
                            "fallback label '{}' of loop edge {} routes into another loop",
                            label, edge
                        ),
                    },
                }
            }
        }
    }
}

fn proceed(next: Route, label: &str, forced: bool) -> Verdict {
    Verdict::Proceed {
        next,
        label: label.to_string(),
        forced,
    }
}
