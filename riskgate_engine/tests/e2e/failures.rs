//! Retries, timeouts, fatal stages, degraded routing and validation errors.

use riskgate_core::{
    FailureKind, StageError, StageId, StageOutput, StageRegistry, StageSpec, StageStatus,
    ValidationError, WorkflowState, WorkflowStatus,
};
use riskgate_engine::{AggregationConfig, DefinitionBuilder, Engine, EngineError, ScoreComponent};
use riskgate_runtime::MetricKind;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

use super::support::{fast_config, ScriptedStage};

fn statuses(state: &WorkflowState, stage: &str) -> Vec<StageStatus> {
    state
        .results_for(&StageId::new(stage))
        .iter()
        .map(|r| r.status)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_retry_succeeds() {
    let analyze = ScriptedStage::constant("ok", json!({"score": 0.8}))
        .delayed_when(|call| if call == 1 { Duration::from_secs(10) } else { Duration::ZERO })
        .shared();
    let registry = StageRegistry::new().register("analyze", analyze.clone());
    let definition = DefinitionBuilder::new("wf")
        .stage(
            StageSpec::new("analyze")
                .with_timeout(Duration::from_secs(1))
                .with_max_retries(1),
        )
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(statuses(&state, "analyze"), vec![StageStatus::TimedOut, StageStatus::Succeeded]);
    assert_eq!(analyze.calls(), 2);
    assert_eq!(engine.metrics().count(MetricKind::StageTimeout), 1);
    assert_eq!(engine.metrics().count(MetricKind::StageRetry), 1);
}

#[tokio::test]
async fn test_exhausted_non_fatal_stage_degrades_decision() {
    let risk = ScriptedStage::new(|_, _| Err(StageError::Transient("model unavailable".into()))).shared();
    let policy = ScriptedStage::constant("ok", json!({"score": 1.0})).shared();
    let report = ScriptedStage::constant("ok", json!({})).shared();
    let registry = StageRegistry::new()
        .register("risk", risk.clone())
        .register("policy", policy)
        .register("report", report.clone());

    let definition = DefinitionBuilder::new("wf")
        .stage(StageSpec::new("policy").parallel())
        .stage(StageSpec::new("risk").parallel().with_max_retries(2))
        .stage(StageSpec::new("report").depends_on("policy").depends_on("risk"))
        .aggregation(
            AggregationConfig::default()
                .with_component(ScoreComponent::new("policy", "policy"))
                .with_component(ScoreComponent::new("risk", "risk").with_default_score(0.5)),
        )
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(risk.calls(), 3);
    assert_eq!(report.calls(), 1);
    assert_eq!(statuses(&state, "risk"), vec![StageStatus::Failed; 3]);

    let decision = state.decision.unwrap();
    assert!(decision.degraded);
    assert!((decision.score - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_exhausted_fatal_stage_fails_workflow() {
    let ingest = ScriptedStage::new(|_, _| Err(StageError::Transient("clone failed".into()))).shared();
    let analyze = ScriptedStage::constant("ok", json!({})).shared();
    let registry = StageRegistry::new()
        .register("ingest", ingest.clone())
        .register("analyze", analyze.clone());
    let definition = DefinitionBuilder::new("wf")
        .stage(StageSpec::new("ingest").fatal().with_max_retries(2))
        .stage(StageSpec::new("analyze").depends_on("ingest"))
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(ingest.calls(), 3);
    assert_eq!(analyze.calls(), 0);
    assert!(state.failure.unwrap().contains("clone failed"));
    assert_eq!(engine.metrics().count(MetricKind::WorkflowFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_aborts_parallel_siblings() {
    let broken = ScriptedStage::new(|_, _| Err(StageError::Fatal("corrupt diff".into()))).shared();
    let slow = ScriptedStage::constant("ok", json!({}))
        .delayed(Duration::from_secs(60))
        .shared();
    let registry = StageRegistry::new()
        .register("broken", broken.clone())
        .register("slow", slow.clone());
    let definition = DefinitionBuilder::new("wf")
        .stage(StageSpec::new("broken").parallel().with_max_retries(3))
        .stage(
            StageSpec::new("slow")
                .parallel()
                .with_timeout(Duration::from_secs(120)),
        )
        .build();
    let engine = Engine::new(registry, &fast_config());

    let started = Instant::now();
    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(broken.calls(), 1);
    let failure = state.latest_result(&StageId::new("broken")).unwrap().error.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Fatal);
    assert_eq!(statuses(&state, "slow"), vec![StageStatus::Cancelled]);
    assert!(state.failure.unwrap().contains("corrupt diff"));
}

#[tokio::test]
async fn test_undeclared_label_routes_degraded() {
    let gate = ScriptedStage::new(|_, _| Ok(StageOutput::new("perhaps", json!({})))).shared();
    let report = ScriptedStage::constant("ok", json!({})).shared();
    let registry = StageRegistry::new()
        .register("gate", gate.clone())
        .register("report", report.clone());
    let definition = DefinitionBuilder::new("wf")
        .stage(StageSpec::new("gate").with_max_retries(2))
        .stage(StageSpec::new("report").depends_on("gate"))
        .edge("gate", "ship", ["report"])
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    // Contract violations are not retried
    assert_eq!(gate.calls(), 1);
    let result = state.latest_result(&StageId::new("gate")).unwrap();
    assert_eq!(result.status, StageStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, FailureKind::Contract);
    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(report.calls(), 1);
}

#[tokio::test]
async fn test_invalid_definitions_rejected_at_submit() {
    let registry = StageRegistry::new()
        .register("a", ScriptedStage::constant("ok", json!({})).shared())
        .register("b", ScriptedStage::constant("ok", json!({})).shared());
    let engine = Engine::new(registry, &fast_config());

    let cyclic = DefinitionBuilder::new("cyclic")
        .stage(StageSpec::new("a").depends_on("b"))
        .stage(StageSpec::new("b").depends_on("a"))
        .build();
    assert!(matches!(
        engine.submit(&cyclic, json!({})).await,
        Err(EngineError::Validation(ValidationError::CycleDetected(_)))
    ));

    let unbound = DefinitionBuilder::new("unbound")
        .stage(StageSpec::new("c"))
        .build();
    assert!(matches!(
        engine.submit(&unbound, json!({})).await,
        Err(EngineError::Validation(ValidationError::UnregisteredStage { .. }))
    ));

    let empty = DefinitionBuilder::new("empty").build();
    assert!(matches!(
        engine.submit(&empty, json!({})).await,
        Err(EngineError::Validation(ValidationError::EmptyWorkflow(_)))
    ));

    assert!(engine.list().await.unwrap().is_empty());
}
