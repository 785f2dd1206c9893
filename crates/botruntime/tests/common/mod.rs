// Test-local action handlers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use botcore::{
    to_text, ActionContext, ActionHandler, ActionOutcome, NodeError, NodeOutput, NodeSpec,
    SuspendSpec, TraceError, TraceRecord, Tracer, Value, Workflow,
};
use botruntime::{ActionRegistry, FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Appends `value` to the `out` variable.
pub struct Append;

#[async_trait]
impl ActionHandler for Append {
    fn action_id(&self) -> &str {
        "append"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let current = ctx.variables.get("out").map(to_text).unwrap_or_default();
        let value = ctx.params.get("value").map(to_text).unwrap_or_default();
        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("out", format!("{}{}", current, value)),
        ))
    }
}

/// Mirrors the standard `set_variable` action.
pub struct SetVariable;

#[async_trait]
impl ActionHandler for SetVariable {
    fn action_id(&self) -> &str {
        "set_variable"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let name = ctx.require_str("variable_name")?.to_string();
        let value = ctx.get_param_or("value", Value::Null);
        Ok(ActionOutcome::Continue(
            NodeOutput::new()
                .with_variable("variable_name", name.clone())
                .with_variable("value", value.clone())
                .with_variable(name, value),
        ))
    }
}

/// Suspends for input, or answers immediately when built with a reply.
pub struct Ask {
    pub reply: Option<Value>,
}

#[async_trait]
impl ActionHandler for Ask {
    fn action_id(&self) -> &str {
        "ask"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let variable = ctx.require_str("variable")?.to_string();
        match &self.reply {
            Some(reply) => Ok(ActionOutcome::Continue(
                NodeOutput::new().with_variable(variable, reply.clone()),
            )),
            None => {
                let mut spec = SuspendSpec::new("await_input");
                spec.variable = Some(variable);
                spec.prompt = ctx.params.get("prompt").map(to_text);
                Ok(ActionOutcome::Suspend(spec))
            }
        }
    }
}

/// Fails the first `fail_times` calls, then reports how often it ran.
pub struct Flaky {
    pub calls: AtomicU32,
}

#[async_trait]
impl ActionHandler for Flaky {
    fn action_id(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let fail_times = ctx.get_param_or("fail_times", json!(0)).as_u64().unwrap_or(0) as u32;
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= fail_times {
            return Err(NodeError::ExecutionFailed(format!("flaky call {}", call)));
        }
        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("calls", call),
        ))
    }
}

/// Always fails with `message`.
pub struct Fail;

#[async_trait]
impl ActionHandler for Fail {
    fn action_id(&self) -> &str {
        "fail"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let message = ctx.get_param_or("message", json!("down"));
        Err(NodeError::ExecutionFailed(to_text(&message)))
    }
}

/// Try marker that enters its `try` branch.
pub struct TryMarker;

#[async_trait]
impl ActionHandler for TryMarker {
    fn action_id(&self) -> &str {
        botruntime::TRY_CATCH_ACTION
    }

    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        Ok(ActionOutcome::branch(NodeOutput::new(), "try"))
    }
}

/// Reports the preview flag it was called with.
pub struct PreviewEcho;

#[async_trait]
impl ActionHandler for PreviewEcho {
    fn action_id(&self) -> &str {
        "preview_echo"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("preview", ctx.preview),
        ))
    }
}

/// Sleeps for `sleep_ms` before succeeding.
pub struct Slow;

#[async_trait]
impl ActionHandler for Slow {
    fn action_id(&self) -> &str {
        "slow"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let millis = ctx.get_param_or("sleep_ms", json!(0)).as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("slept", millis),
        ))
    }
}

/// Always fails, remembering when each attempt started.
#[derive(Default)]
pub struct Recorder {
    pub attempts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl ActionHandler for Recorder {
    fn action_id(&self) -> &str {
        "recorder"
    }

    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        self.attempts.lock().unwrap().push(Instant::now());
        Err(NodeError::ExecutionFailed("recorded".into()))
    }
}

/// Trace sink that rejects every record.
pub struct FailingTracer;

#[async_trait]
impl Tracer for FailingTracer {
    async fn record(&self, _record: TraceRecord) -> Result<(), TraceError> {
        Err(TraceError("sink down".into()))
    }
}

pub fn registry(ask_reply: Option<Value>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(Append));
    registry.register(Arc::new(SetVariable));
    registry.register(Arc::new(Ask { reply: ask_reply }));
    registry.register(Arc::new(Flaky {
        calls: AtomicU32::new(0),
    }));
    registry.register(Arc::new(Fail));
    registry.register(Arc::new(TryMarker));
    registry.register(Arc::new(PreviewEcho));
    registry.register(Arc::new(Slow));
    registry
}

/// Route engine logs to the test harness once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn runtime() -> FlowRuntime {
    init_tracing();
    FlowRuntime::with_registry(Arc::new(registry(None)), RuntimeConfig::default())
}

/// Runtime whose `ask` action answers with `reply` instead of suspending.
pub fn answering_runtime(reply: Value) -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(registry(Some(reply))), RuntimeConfig::default())
}

pub fn node(id: &str, action_id: &str, config: Value) -> NodeSpec {
    let mut node = NodeSpec::new(id, action_id);
    node.config = config.as_object().cloned().unwrap_or_default();
    node
}

pub fn workflow(id: &str, nodes: Vec<NodeSpec>) -> Workflow {
    let mut wf = Workflow::new(id, id);
    for node in nodes {
        wf.add_node(node);
    }
    wf
}
