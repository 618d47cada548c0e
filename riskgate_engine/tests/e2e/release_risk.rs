//! Release-risk pipeline: gate loop-backs, fallbacks and the final decision.

use riskgate_core::{
    DecisionLabel, EdgeId, StageError, StageId, StageOutput, StageSpec, StageStatus, WorkflowState, WorkflowStatus,
};
use riskgate_engine::workflow::{LoopBackSpec, LoopFallback};
use riskgate_engine::{
    load_definition_from_file, load_definition_from_str, DefinitionBuilder, Engine, QualityGate,
};
use riskgate_runtime::MetricKind;
use serde_json::json;

use super::support::{fast_config, gate_failing, ReleaseRiskStages, ScriptedStage, RELEASE_RISK_YAML};

fn labels(state: &WorkflowState, stage: &str) -> Vec<String> {
    state
        .results_for(&StageId::new(stage))
        .iter()
        .map(|r| r.outcome_label.clone())
        .collect()
}

#[tokio::test]
async fn test_gate_passes_after_two_loop_backs() {
    let stages = ReleaseRiskStages::with_gate(gate_failing(2));
    let engine = Engine::new(stages.registry(), &fast_config());
    let definition = load_definition_from_str(RELEASE_RISK_YAML).unwrap();

    let id = engine
        .submit(&definition, json!({"change": "PR-481"}))
        .await
        .unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(stages.ingest.calls(), 1);
    assert_eq!(stages.analyze.calls(), 3);
    assert_eq!(stages.policy.calls(), 3);
    assert_eq!(stages.risk.calls(), 3);
    assert_eq!(stages.report.calls(), 1);

    let gate = StageId::new("gate");
    assert_eq!(labels(&state, "gate"), vec!["needs-review", "needs-review", "pass"]);
    assert_eq!(state.loop_count(&EdgeId::new(&gate, "needs-review")), 2);

    // Attempt numbers keep climbing across loop-backs
    let attempts: Vec<u32> = state
        .results_for(&StageId::new("analyze"))
        .iter()
        .map(|r| r.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let decision = state.decision.unwrap();
    assert_eq!(decision.label, DecisionLabel::Approve);
    assert!((decision.score - 0.9).abs() < 1e-9);
    assert!(!decision.degraded);
    assert_eq!(decision.rationale.len(), 2);
    assert_eq!(engine.metrics().count(MetricKind::LoopTraversal), 2);
}

#[tokio::test]
async fn test_gate_always_failing_falls_back_after_bound() {
    let stages = ReleaseRiskStages::with_gate(gate_failing(u32::MAX));
    let engine = Engine::new(stages.registry(), &fast_config());
    let definition = load_definition_from_str(RELEASE_RISK_YAML).unwrap();

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    // Three traversals, then the fourth gate verdict hits the bound
    let gate = StageId::new("gate");
    assert_eq!(state.loop_count(&EdgeId::new(&gate, "needs-review")), 3);
    assert_eq!(stages.analyze.calls(), 4);
    assert_eq!(stages.gate.calls(), 4);
    assert_eq!(stages.report.calls(), 1);
    assert!(labels(&state, "gate").iter().all(|l| l == "needs-review"));

    let decision = state.decision.unwrap();
    assert_eq!(decision.label, DecisionLabel::RequiresReview);
    assert_eq!(engine.metrics().count(MetricKind::LoopTraversal), 3);
    assert_eq!(engine.metrics().count(MetricKind::LoopExceeded), 1);
}

#[tokio::test]
async fn test_exhausted_loop_without_fallback_fails() {
    let stages = ReleaseRiskStages::with_gate(gate_failing(u32::MAX));
    let definition = DefinitionBuilder::new("strict-release")
        .stage(StageSpec::new("ingest"))
        .stage(StageSpec::new("analyze").depends_on("ingest"))
        .stage(StageSpec::new("gate").depends_on("analyze"))
        .stage(StageSpec::new("report").depends_on("gate"))
        .quality_gate(QualityGate::new("gate", 0.7))
        .loop_back_with("gate", "needs-review", ["analyze"], LoopBackSpec::new(2, LoopFallback::Fail))
        .build();
    let engine = Engine::new(stages.registry(), &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(state.failure.as_deref().unwrap().contains("exhausted"));
    assert!(state.decision.is_none());
    assert_eq!(stages.gate.calls(), 3);
    assert_eq!(stages.report.calls(), 0);
}

#[tokio::test]
async fn test_definition_loaded_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release-risk.yaml");
    tokio::fs::write(&path, RELEASE_RISK_YAML).await.unwrap();

    let definition = load_definition_from_file(&path).await.unwrap();
    let stages = ReleaseRiskStages::with_gate(gate_failing(0));
    let engine = Engine::new(stages.registry(), &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(state.definition, "release-risk");
    assert_eq!(stages.analyze.calls(), 1);
    let report = state.latest_result(&StageId::new("report")).unwrap();
    assert_eq!(report.status, StageStatus::Succeeded);
    assert_eq!(report.outcome_label, "published");
}

#[tokio::test]
async fn test_upstream_payloads_reach_later_stages() {
    let stages = ReleaseRiskStages::with_gate(gate_reading_policy());
    let engine = Engine::new(stages.registry(), &fast_config());
    let definition = load_definition_from_str(RELEASE_RISK_YAML).unwrap();

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    // Gate reads the policy stage's score, which passes
    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(labels(&state, "gate"), vec!["pass"]);
}

fn gate_reading_policy() -> ScriptedStage {
    ScriptedStage::new(|_, ctx| {
        let score = ctx
            .upstream(&StageId::new("policy"))
            .and_then(|p| p["score"].as_f64())
            .unwrap_or(0.0);
        Ok(StageOutput::new("scored", json!({"score": score})))
    })
}

#[tokio::test]
async fn test_failed_final_pass_degrades_decision() {
    let mut stages = ReleaseRiskStages::with_gate(gate_failing(1));
    stages.risk = ScriptedStage::new(|call, _| {
        if call == 1 {
            Ok(StageOutput::new("ok", json!({"risk": 0.05})))
        } else {
            Err(StageError::Transient("model unavailable".into()))
        }
    })
    .shared();
    let engine = Engine::new(stages.registry(), &fast_config());
    let definition = load_definition_from_str(RELEASE_RISK_YAML).unwrap();

    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert_eq!(stages.risk.calls(), 2);
    assert_eq!(
        state.latest_result(&StageId::new("risk")).unwrap().status,
        StageStatus::Failed
    );

    // The first pass scored 0.95 but the final pass produced nothing
    let decision = state.decision.unwrap();
    assert!(decision.degraded);
    let risk = decision.rationale.iter().find(|c| c.component == "risk").unwrap();
    assert!(risk.defaulted);
    assert_eq!(risk.score, 0.5);
    assert!((decision.score - 0.7).abs() < 1e-9);
}
