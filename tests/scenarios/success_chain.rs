//! Test: Success Chain - linear pipelines and parameter wiring

use crate::helpers::*;
use serde_json::{json, Map};
use std::sync::Arc;
use tool_pipeline::core::{PipelineBuilder, PipelineDefinition, StepBuilder, END_STEP};
use tool_pipeline::{Pipeline, PipelineExecutor};

/// Single step that always succeeds
#[tokio::test]
async fn test_single_step_completes() {
    init_tracing();

    let pipeline = PipelineBuilder::new("Test: Single Step")
        .with_step(StepBuilder::new("step1", "work").next(END_STEP).build())
        .with_start_step("step1")
        .build()
        .unwrap();

    let tools = Arc::new(MockTools::new().always("work", Reply::Ok(json!({"result": "success"}))));
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    assert!(state.results["step1"].success);
    assert_eq!(state.results["step1"].data, Some(json!({"result": "success"})));
    assert_path(&state, &["step1"]);
    assert_eq!(tools.calls_to("work"), 1);
}

/// Every step of a branch-free chain runs exactly once, in order
#[tokio::test]
async fn test_chain_visits_each_step_once() {
    let pipeline = PipelineBuilder::new("Test: Chain")
        .with_step(StepBuilder::new("plan", "plan").next("implement").build())
        .with_step(StepBuilder::new("implement", "implement").next("review").build())
        .with_step(StepBuilder::new("review", "review").build())
        .with_start_step("plan")
        .build()
        .unwrap();

    let tools = Arc::new(
        MockTools::new()
            .always("plan", Reply::Ok(json!({"tasks": 3})))
            .always("implement", Reply::Ok(json!({"done": 3})))
            .always("review", Reply::Ok(json!({"approved": true}))),
    );
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    assert_path(&state, &["plan", "implement", "review"]);
    assert_eq!(tools.call_order(), vec!["plan", "implement", "review"]);
    assert_eq!(state.results.len(), 3);
    assert_eq!(state.current_step_id, "review");
}

/// A dynamic binding reads the named field from an earlier step's data
#[tokio::test]
async fn test_dynamic_parameter_wiring() {
    let pipeline = PipelineBuilder::new("Test: Wiring")
        .with_step(StepBuilder::new("a", "produce").next("b").build())
        .with_step(
            StepBuilder::new("b", "consume")
                .dynamic_param("inputValue", "a", "outputValue")
                .dynamic_param("owner", "a", "meta.owners.0")
                .dynamic_param("absent", "a", "meta.missing.field")
                .static_param("mode", json!("strict"))
                .build(),
        )
        .with_start_step("a")
        .build()
        .unwrap();

    let tools = Arc::new(
        MockTools::new()
            .always(
                "produce",
                Reply::Ok(json!({"outputValue": 42, "meta": {"owners": ["ana", "bo"]}})),
            )
            .always("consume", Reply::Ok(json!(null))),
    );
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    let params = &tools.params_for("consume")[0];
    assert_eq!(params["inputValue"], json!(42));
    assert_eq!(params["owner"], json!("ana"));
    assert_eq!(params["mode"], json!("strict"));
    assert!(!params.contains_key("absent"));
}

/// Tools receive the shared state, which carries the previous step's data
#[tokio::test]
async fn test_global_state_reaches_tools() {
    let pipeline = PipelineBuilder::new("Test: Global State")
        .with_step(StepBuilder::new("fetch", "fetch").next("store").build())
        .with_step(StepBuilder::new("store", "store").build())
        .with_start_step("fetch")
        .with_global_state("bucket", json!("raw"))
        .with_global_state("region", json!("eu"))
        .build()
        .unwrap();

    let tools = Arc::new(
        MockTools::new()
            .always("fetch", Reply::Ok(json!({"rows": 10})))
            .always("store", Reply::Ok(json!({"stored": true}))),
    );

    let mut initial = Map::new();
    initial.insert("region".to_string(), json!("us"));
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, Some(initial))
        .await;

    assert_completed(&state);

    let fetch_state = &tools.params_for("fetch")[0]["globalState"];
    assert_eq!(fetch_state["bucket"], json!("raw"));
    assert_eq!(fetch_state["region"], json!("us"));
    assert!(fetch_state.get("lastResult").is_none());

    let store_state = &tools.params_for("store")[0]["globalState"];
    assert_eq!(store_state["lastResult"], json!({"rows": 10}));
    assert_eq!(state.global_state["lastResult"], json!({"stored": true}));

    // The stored pipeline is never mutated by a run
    assert_eq!(pipeline.global_state["region"], json!("eu"));
}

/// A definition loaded from YAML runs the same as a built one
#[tokio::test]
async fn test_yaml_definition_runs() {
    let yaml = r#"
name: "Test: YAML"
description: "Two steps wired together"
startStepId: extract
steps:
  extract:
    toolName: extract
    next:
      default: load
  load:
    toolName: load
    parameters:
      count:
        type: dynamic
        sourceStepId: extract
        outputPath: count
    next:
      default: end
"#;

    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    let pipeline = Pipeline::from_definition("yaml-pipeline", definition);

    let tools = Arc::new(
        MockTools::new()
            .always("extract", Reply::Ok(json!({"count": 7})))
            .always("load", Reply::Ok(json!({"loaded": 7}))),
    );
    let state = PipelineExecutor::new(tools.clone())
        .execute_pipeline(&pipeline, None)
        .await;

    assert_completed(&state);
    assert_eq!(state.pipeline_id, "yaml-pipeline");
    assert_eq!(tools.params_for("load")[0]["count"], json!(7));
}
