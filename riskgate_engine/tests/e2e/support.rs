//! Shared fixtures: scripted stages and the release-risk pipeline.

use async_trait::async_trait;
use riskgate_core::{Stage, StageContext, StageError, StageOutput, StageRegistry};
use riskgate_engine::{EngineConfig, RetryPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type StageReturn = Result<StageOutput, StageError>;

type Script = dyn Fn(u32, &StageContext) -> StageReturn + Send + Sync;
type Delay = dyn Fn(u32) -> Duration + Send + Sync;

/// Stage driven by a closure over its 1-based call number.
pub struct ScriptedStage {
    calls: AtomicU32,
    script: Box<Script>,
    delay: Box<Delay>,
}

impl ScriptedStage {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(u32, &StageContext) -> StageReturn + Send + Sync + 'static,
    {
        Self {
            calls: AtomicU32::new(0),
            script: Box::new(script),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    /// Stage that always returns `label` with `payload`.
    pub fn constant(label: &'static str, payload: Value) -> Self {
        Self::new(move |_, _| Ok(StageOutput::new(label, payload.clone())))
    }

    /// Sleeps `delay` before every call.
    pub fn delayed(self, delay: Duration) -> Self {
        self.delayed_when(move |_| delay)
    }

    /// Sleeps a per-call delay before running the script.
    pub fn delayed_when<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn execute(&self, ctx: &StageContext) -> StageReturn {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = (self.delay)(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.script)(call, ctx)
    }
}

/// Engine settings with near-zero, deterministic backoff.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default().with_retry(RetryPolicy::fixed(1, 1, 1.0))
}

/// Six-stage release-risk pipeline with a bounded gate loop-back.
pub const RELEASE_RISK_YAML: &str = r#"
name: release-risk
description: Scores a code change before release
stages:
  - id: ingest
    fatal: true
  - id: analyze
    dependencies: [ingest]
  - id: policy
    mode: parallel
    dependencies: [analyze]
  - id: risk
    mode: parallel
    dependencies: [analyze]
  - id: gate
    dependencies: [policy, risk]
  - id: report
    dependencies: [gate]
edges:
  - from: gate
    on: needs-review
    to: [analyze]
    loop_back:
      max_iterations: 3
      fallback:
        force_outcome: accept-degraded
  - from: gate
    on: accept-degraded
    to: report
  - from: report
    on: "*"
    to: terminal
quality_gates:
  - stage: gate
    threshold: 0.7
aggregation:
  components:
    - name: policy
      stage: policy
    - name: risk
      stage: risk
      field: risk
      invert: true
  approve_threshold: 0.7
  reject_threshold: 0.4
  outcome_caps:
    needs-review: requires_review
"#;

/// Stages of the release-risk pipeline, kept for call-count assertions.
pub struct ReleaseRiskStages {
    pub ingest: Arc<ScriptedStage>,
    pub analyze: Arc<ScriptedStage>,
    pub policy: Arc<ScriptedStage>,
    pub risk: Arc<ScriptedStage>,
    pub gate: Arc<ScriptedStage>,
    pub report: Arc<ScriptedStage>,
}

impl ReleaseRiskStages {
    /// Healthy analysis stages around the given gate.
    pub fn with_gate(gate: ScriptedStage) -> Self {
        Self {
            ingest: ScriptedStage::constant("ok", json!({"files": 12})).shared(),
            analyze: ScriptedStage::new(|call, _| Ok(StageOutput::new("ok", json!({"pass": call})))).shared(),
            policy: ScriptedStage::constant("ok", json!({"score": 0.9})).shared(),
            risk: ScriptedStage::constant("ok", json!({"risk": 0.1})).shared(),
            gate: gate.shared(),
            report: ScriptedStage::constant("published", json!({"report": "ok"})).shared(),
        }
    }

    pub fn registry(&self) -> StageRegistry {
        StageRegistry::new()
            .register("ingest", self.ingest.clone())
            .register("analyze", self.analyze.clone())
            .register("policy", self.policy.clone())
            .register("risk", self.risk.clone())
            .register("gate", self.gate.clone())
            .register("report", self.report.clone())
    }
}

/// Gate whose score is below threshold for the first `failures` calls.
pub fn gate_failing(failures: u32) -> ScriptedStage {
    ScriptedStage::new(move |call, _| {
        let score = if call <= failures { 0.5 } else { 0.9 };
        Ok(StageOutput::new("scored", json!({"score": score})))
    })
}
