//! Cancellation of running workflows.

use riskgate_core::{
    FailureKind, StageError, StageId, StageRegistry, StageSpec, StageStatus, WorkflowStatus,
};
use riskgate_engine::{DefinitionBuilder, Engine, RetryPolicy};
use riskgate_runtime::MetricKind;
use serde_json::json;
use std::time::Duration;

use super::support::{fast_config, ScriptedStage};

const LONG: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_frontier_stops_later_frontiers() {
    let ingest = ScriptedStage::constant("ok", json!({})).shared();
    let policy = ScriptedStage::constant("ok", json!({})).delayed(LONG).shared();
    let risk = ScriptedStage::constant("ok", json!({})).delayed(LONG).shared();
    let report = ScriptedStage::constant("ok", json!({})).shared();
    let registry = StageRegistry::new()
        .register("ingest", ingest.clone())
        .register("policy", policy.clone())
        .register("risk", risk.clone())
        .register("report", report.clone());

    let definition = DefinitionBuilder::new("release-risk")
        .stage(StageSpec::new("ingest"))
        .stage(StageSpec::new("policy").parallel().depends_on("ingest").with_timeout(LONG * 2))
        .stage(StageSpec::new("risk").parallel().depends_on("ingest").with_timeout(LONG * 2))
        .stage(StageSpec::new("report").depends_on("policy").depends_on("risk"))
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.get_status(id).await.unwrap().status, WorkflowStatus::Running);

    engine.cancel(id).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(state.decision.is_none());
    assert_eq!(report.calls(), 0);
    assert!(state.results_for(&StageId::new("report")).is_empty());

    for stage in ["policy", "risk"] {
        let result = state.latest_result(&StageId::new(stage)).unwrap();
        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    }
    assert_eq!(
        state.latest_result(&StageId::new("ingest")).unwrap().status,
        StageStatus::Succeeded
    );
    assert_eq!(engine.metrics().count(MetricKind::WorkflowCancelled), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_retry_backoff() {
    let flaky = ScriptedStage::new(|_, _| Err(StageError::Transient("unavailable".into()))).shared();
    let registry = StageRegistry::new().register("flaky", flaky.clone());
    let definition = DefinitionBuilder::new("wf")
        .stage(StageSpec::new("flaky").with_max_retries(5))
        .build();
    let config = fast_config().with_retry(RetryPolicy::fixed(30_000, 30_000, 1.0));
    let engine = Engine::new(registry, &config);

    let id = engine.submit(&definition, json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.cancel(id).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert_eq!(flaky.calls(), 1);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let registry = StageRegistry::new().register("only", ScriptedStage::constant("ok", json!({})).shared());
    let definition = DefinitionBuilder::new("wf").stage(StageSpec::new("only")).build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Succeeded);

    engine.cancel(id).await.unwrap();
    assert_eq!(engine.get_status(id).await.unwrap().status, WorkflowStatus::Succeeded);
}
