//! Frontier parallelism and the shared worker pool.

use riskgate_core::{StageId, StageRegistry, StageSpec, WorkflowStatus};
use riskgate_engine::{DefinitionBuilder, Engine, QualityGate, WorkflowDefinition};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::support::{fast_config, gate_failing, ScriptedStage};

const DELAY: Duration = Duration::from_secs(1);

/// `count` independent parallel stages after a fast `start` stage.
fn fan_out(count: usize) -> (WorkflowDefinition, StageRegistry, Vec<Arc<ScriptedStage>>) {
    let mut builder = DefinitionBuilder::new("fan-out").stage(StageSpec::new("start"));
    let mut registry = StageRegistry::new().register(
        "start",
        ScriptedStage::constant("ok", json!({})).shared(),
    );
    let mut workers = Vec::new();

    for i in 0..count {
        let id = format!("worker-{}", i);
        let stage = ScriptedStage::constant("ok", json!({"worker": i}))
            .delayed(DELAY)
            .shared();
        builder = builder.stage(StageSpec::new(id.as_str()).parallel().depends_on("start"));
        registry = registry.register(id, stage.clone());
        workers.push(stage);
    }

    (builder.build(), registry, workers)
}

#[tokio::test(start_paused = true)]
async fn test_parallel_frontier_takes_one_delay() {
    let (definition, registry, workers) = fan_out(4);
    let engine = Engine::new(registry, &fast_config());

    let started = Instant::now();
    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert!(workers.iter().all(|w| w.calls() == 1));
    assert!(elapsed >= DELAY, "elapsed {:?}", elapsed);
    assert!(elapsed < DELAY * 2, "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_pool_capacity_bounds_parallelism() {
    let (definition, registry, _) = fan_out(4);
    let engine = Engine::new(registry, &fast_config().with_max_concurrency(2));

    let started = Instant::now();
    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();
    let elapsed = started.elapsed();

    // Four one-second stages through two permits
    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert!(elapsed >= DELAY * 2, "elapsed {:?}", elapsed);
    assert!(elapsed < DELAY * 3, "elapsed {:?}", elapsed);
    assert_eq!(engine.coordinator().pool().available(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_stages_do_not_overlap() {
    let definition = DefinitionBuilder::new("chain")
        .stage(StageSpec::new("a"))
        .stage(StageSpec::new("b"))
        .stage(StageSpec::new("c"))
        .build();
    let registry = ["a", "b", "c"].into_iter().fold(StageRegistry::new(), |r, name| {
        r.register(name, ScriptedStage::constant("ok", json!({})).delayed(DELAY).shared())
    });
    let engine = Engine::new(registry, &fast_config());

    let started = Instant::now();
    let id = engine.submit(&definition, json!({})).await.unwrap();
    let state = engine.wait(id).await.unwrap();

    // Sequential stages without dependencies still get one frontier each
    assert_eq!(state.status, WorkflowStatus::Succeeded);
    assert!(started.elapsed() >= DELAY * 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_workflows_share_the_pool() {
    let (definition, registry, workers) = fan_out(2);
    let engine = Engine::new(registry, &fast_config());

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(engine.submit(&definition, json!({})).await.unwrap());
    }
    for id in &ids {
        assert_eq!(engine.wait(*id).await.unwrap().status, WorkflowStatus::Succeeded);
    }

    assert_eq!(engine.list().await.unwrap().len(), 3);
    assert!(workers.iter().all(|w| w.calls() == 3));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_non_blocking_runs_keep_every_result() {
    let notify = ScriptedStage::constant("sent", json!({}))
        .delayed(Duration::from_secs(10))
        .shared();
    let registry = StageRegistry::new()
        .register("analyze", ScriptedStage::constant("ok", json!({})).shared())
        .register("notify", notify.clone())
        .register("gate", gate_failing(1).shared());
    let definition = DefinitionBuilder::new("loop-with-notify")
        .stage(StageSpec::new("analyze"))
        .stage(StageSpec::new("notify").depends_on("analyze").non_blocking())
        .stage(StageSpec::new("gate").depends_on("notify"))
        .quality_gate(QualityGate::new("gate", 0.7))
        .loop_back("gate", "needs-review", ["analyze"])
        .build();
    let engine = Engine::new(registry, &fast_config());

    let id = engine.submit(&definition, json!({})).await.unwrap();
    assert_eq!(engine.wait(id).await.unwrap().status, WorkflowStatus::Succeeded);

    // Both detached notify runs are still sleeping when the workflow ends
    tokio::time::sleep(Duration::from_secs(30)).await;

    let notify_id = StageId::new("notify");
    let state = engine.get_status(id).await.unwrap();
    let attempts: Vec<u32> = state.results_for(&notify_id).iter().map(|r| r.attempt).collect();
    assert_eq!(notify.calls(), 2);
    assert_eq!(attempts, vec![1, 2]);

    let audited = engine
        .audit_log()
        .records_for(id)
        .await
        .into_iter()
        .filter(|r| r.stage_id == notify_id)
        .count();
    assert_eq!(audited, 2);
}
