mod common;

use botcore::{LogTracer, NoopTracer, RuntimeContext, Workflow, CONTROL_OUTPUT};
use botruntime::{FlowRuntime, MemoryStore, RuntimeConfig};
use common::{node, runtime, workflow};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_control_bus_order_drives_execution() {
    let mut wf = workflow(
        "bus",
        vec![
            node("1", "append", json!({"value": "1"})),
            node("2", "append", json!({"value": "2"})),
            node("3", "append", json!({"value": "3"})),
        ],
    );
    wf.connect_control("3", CONTROL_OUTPUT, "1");
    wf.connect_control("1", CONTROL_OUTPUT, "2");

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("312"));
}

#[tokio::test]
async fn test_data_edges_carry_values() {
    let mut wf = workflow(
        "data",
        vec![
            node("echo", "append", json!({"value": "{{ prefix }}"})),
            node("source", "set_variable", json!({"variable_name": "greeting", "value": {"text": "hi"}})),
        ],
    );
    wf.connect("source", "greeting", "echo", "value").with_path("text");

    let ctx = RuntimeContext::new().with_variable("prefix", "unused");
    let result = runtime().execute_workflow(ctx, &wf, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("hi"));
}

#[tokio::test]
async fn test_edge_path_may_open_with_a_bracket() {
    for path in ["[1]", "$[1]", ".1"] {
        let mut wf = workflow(
            "indexed",
            vec![
                node("source", "set_variable", json!({"variable_name": "items", "value": ["x", "y"]})),
                node("echo", "append", json!({})),
            ],
        );
        wf.connect("source", "items", "echo", "value").with_path(path);

        let result = runtime()
            .execute_workflow(RuntimeContext::new(), &wf, None)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.variables["out"], json!("y"), "{path}");
    }
}

#[tokio::test]
async fn test_cycle_is_rejected_before_execution() {
    let mut wf = workflow(
        "cycle",
        vec![
            node("a", "append", json!({"value": "a"})),
            node("b", "append", json!({"value": "b"})),
        ],
    );
    wf.connect("a", "out", "b", "value");
    wf.connect("b", "out", "a", "value");

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("cycle"), "{error}");
    assert!(error.contains('a') && error.contains('b'), "{error}");
    assert!(result.variables.get("out").is_none());
}

#[tokio::test]
async fn test_ambiguous_branch_is_rejected() {
    let mut wf = workflow(
        "ambiguous",
        vec![
            node("if", "append", json!({})),
            node("left", "append", json!({})),
            node("right", "append", json!({})),
        ],
    );
    wf.connect_control("if", "true", "left");
    wf.connect_control("if", "true", "right");

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("ambiguous branch: node 'if' output 'true' routes to both 'left' and 'right'")
    );
}

#[tokio::test]
async fn test_step_limit_stops_the_run() {
    let mut wf = workflow(
        "long",
        vec![
            node("a", "append", json!({"value": "a"})),
            node("b", "append", json!({"value": "b"})),
        ],
    );
    wf.settings.max_steps = Some(1);

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("step limit of 1"));
}

// ============================================================================
// Try/catch and retries
// ============================================================================

fn try_catch_workflow(risky_action: &str, risky_config: serde_json::Value) -> Workflow {
    let mut wf = workflow(
        "guarded",
        vec![
            node("guard", "try_catch", json!({})),
            node("risky", risky_action, risky_config),
            node(
                "handler",
                "set_variable",
                json!({"variable_name": "handled", "value": "{{ error.message }}"}),
            ),
        ],
    );
    wf.connect_control("guard", "try", "risky");
    wf.connect_control("guard", "catch", "handler");
    wf
}

#[tokio::test]
async fn test_try_catch_reroutes_failure() {
    let wf = try_catch_workflow("fail", json!({"message": "boom"}));

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(result.success, "{:?}", result.error);
    let caught = result.engine.last_error.expect("catch handler should record the error");
    assert_eq!(caught.node_id, "risky");
    assert_eq!(caught.try_node_id, "guard");
    assert!(caught.message.contains("boom"));
    assert!(result.variables["handled"].as_str().unwrap().contains("boom"));
    assert!(result.engine.handler_stack.is_empty());
}

fn guarded_with_join(later_action: &str) -> Workflow {
    let mut wf = workflow(
        "guarded-join",
        vec![
            node("guard", "try_catch", json!({})),
            node("ok", "append", json!({"value": "ok"})),
            node("handler", "append", json!({"value": "H"})),
            node("later", later_action, json!({"value": "L", "message": "unrelated"})),
        ],
    );
    wf.connect_control("guard", "try", "ok");
    wf.connect_control("guard", "catch", "handler");
    wf.connect_control("ok", CONTROL_OUTPUT, "later");
    wf.connect_control("handler", CONTROL_OUTPUT, "later");
    wf
}

#[tokio::test]
async fn test_successful_try_region_skips_catch_handler() {
    let wf = guarded_with_join("append");

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("okL"));
    assert!(!result.node_outputs.contains_key("handler"));
    assert!(result.engine.handler_stack.is_empty());
    assert!(result.engine.last_error.is_none());
}

#[tokio::test]
async fn test_failure_after_try_region_is_not_caught() {
    let wf = guarded_with_join("fail");

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .starts_with("node 'later' failed: Execution failed: unrelated"));
}

#[tokio::test]
async fn test_uncaught_failure_fails_the_run() {
    let wf = workflow(
        "unguarded",
        vec![
            node("a", "append", json!({"value": "a"})),
            node("risky", "fail", json!({"message": "boom"})),
            node("b", "append", json!({"value": "b"})),
        ],
    );

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("node 'risky' failed"));
}

#[tokio::test]
async fn test_retry_recovers_after_two_failures() {
    let wf = workflow(
        "retry",
        vec![node(
            "flaky",
            "flaky",
            json!({"fail_times": 2, "__retry_count": 2, "__retry_delay_ms": 0}),
        )],
    );

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["calls"], json!(3));
}

#[tokio::test]
async fn test_retry_exhaustion_reports_attempts() {
    let wf = workflow(
        "exhausted",
        vec![node(
            "broken",
            "fail",
            json!({"__retry_count": 1, "__retry_delay_ms": 0}),
        )],
    );

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.ends_with("(after 2 attempts)"), "{error}");
}

// ============================================================================
// Condition gate
// ============================================================================

#[tokio::test]
async fn test_condition_gate_skips_nodes() {
    let wf = workflow(
        "gated",
        vec![
            node("a", "append", json!({"value": "a", "__condition": "never"})),
            node(
                "b",
                "append",
                json!({"value": "b", "__condition": {"mode": "expression", "expression": "vip == true"}}),
            ),
            node(
                "c",
                "append",
                json!({"value": "c", "__condition": {"mode": "linked", "input": "value"}}),
            ),
        ],
    );

    let ctx = RuntimeContext::new().with_variable("vip", true);
    let result = runtime().execute_workflow(ctx, &wf, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("bc"));
    assert!(result.node_outputs["a"].is_empty());
}

#[tokio::test]
async fn test_malformed_condition_is_not_catchable() {
    let mut wf = try_catch_workflow(
        "append",
        json!({"value": "x", "__condition": {"mode": "sometimes"}}),
    );
    wf.id = "bad-condition".into();

    let result = runtime()
        .execute_workflow(RuntimeContext::new(), &wf, None)
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("unknown condition mode"));
}

// ============================================================================
// Entry points and tracing
// ============================================================================

#[tokio::test]
async fn test_single_action_runs_ad_hoc() {
    let mut params = serde_json::Map::new();
    params.insert("variable_name".into(), json!("x"));
    params.insert("value".into(), json!("{{ seed }}"));

    let ctx = RuntimeContext::new().with_variable("seed", 7);
    let result = runtime()
        .execute_single_action_or_workflow(ctx, "set_variable", params)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.workflow_id, "adhoc:set_variable");
    assert_eq!(result.variables["x"], json!("7"));
}

#[tokio::test]
async fn test_single_unknown_action_fails() {
    let result = runtime()
        .execute_single_action_or_workflow(RuntimeContext::new(), "nope", serde_json::Map::new())
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Unknown action: nope"));
}

#[tokio::test]
async fn test_trace_records_are_broadcast() {
    let runtime = runtime();
    let mut traces = runtime.subscribe_traces().expect("default runtime has a trace bus");
    let wf = workflow(
        "traced",
        vec![
            node("a", "append", json!({"value": "a"})),
            node("skip", "append", json!({"__condition": "never"})),
        ],
    );

    let result = runtime.execute_workflow(RuntimeContext::new(), &wf, None).await;
    assert!(result.success);

    let first = traces.recv().await.unwrap();
    assert_eq!(first.node_id.as_deref(), Some("a"));
    assert_eq!(first.attempts, 1);
    assert!(first.allowed);
    let second = traces.recv().await.unwrap();
    assert_eq!(second.node_id.as_deref(), Some("skip"));
    assert!(!second.allowed);
}

#[tokio::test]
async fn test_legacy_engine_state_is_migrated() {
    let wf = workflow("legacy", vec![node("a", "append", json!({"value": "a"}))]);
    let ctx = RuntimeContext::new().with_variable(
        "__engine",
        json!({"handler_stack": [{"try_node": "t", "catch_node": "c"}]}),
    );

    let runtime = FlowRuntime::with_registry(Arc::new(common::registry(None)), RuntimeConfig::default());
    let result = runtime.execute_workflow(ctx, &wf, None).await;

    assert!(result.success);
    assert!(!result.variables.contains_key("__engine"));
    assert_eq!(result.engine.handler_stack.len(), 1);
}

#[tokio::test]
async fn test_custom_tracer_and_runtime_info() {
    common::init_tracing();
    let runtime = FlowRuntime::with_parts(
        Arc::new(common::registry(None)),
        Arc::new(MemoryStore::new()),
        Arc::new(LogTracer),
        RuntimeConfig::default(),
    );
    assert!(runtime.subscribe_traces().is_none());

    let wf = workflow(
        "chat",
        vec![node("who", "append", json!({"value": "{{ runtime.chat_id }}/{{ runtime.user_id }}"}))],
    );
    let ctx = RuntimeContext::new().with_chat("c42", "u7");
    let result = runtime.execute_workflow(ctx, &wf, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("c42/u7"));
}

#[tokio::test]
async fn test_preview_flag_reaches_handlers() {
    let runtime = FlowRuntime::with_parts(
        Arc::new(common::registry(None)),
        Arc::new(MemoryStore::new()),
        Arc::new(NoopTracer),
        RuntimeConfig::default(),
    );
    let wf = workflow("dry", vec![node("peek", "preview_echo", json!({}))]);
    let mut ctx = RuntimeContext::new();
    ctx.preview = true;

    let result = runtime.execute_workflow(ctx, &wf, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["preview"], json!(true));
}

#[tokio::test]
async fn test_failing_tracer_does_not_fail_the_run() {
    common::init_tracing();
    let runtime = FlowRuntime::with_parts(
        Arc::new(common::registry(None)),
        Arc::new(MemoryStore::new()),
        Arc::new(common::FailingTracer),
        RuntimeConfig::default(),
    );
    let wf = workflow(
        "traced",
        vec![
            node("a", "append", json!({"value": "a"})),
            node("b", "append", json!({"value": "b"})),
        ],
    );

    let result = runtime.execute_workflow(RuntimeContext::new(), &wf, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.variables["out"], json!("ab"));
    assert_eq!(result.node_outputs.len(), 2);
}
