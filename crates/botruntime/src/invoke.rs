//! Node invocation pipeline: parameter seeding, edge inputs, rendering,
//! condition gate, dispatch and tracing.

use crate::policy::{run_with_policy, ExecutionPolicy};
use crate::registry::{ActionRegistry, SUB_WORKFLOW_ACTION};
use botcore::template::{self, Path};
use botcore::{
    coerce_to_bool, ActionContext, ActionKind, ActionOutcome, EngineState, Map, NodeError, NodeId,
    NodeSpec, RuntimeInfo, TraceRecord, Tracer, Value, Workflow,
};
use std::collections::BTreeMap;

/// Config key holding a node's own id in editor exports.
pub const NODE_ID_KEY: &str = "__node_id";
/// Config key holding the condition gate.
pub const CONDITION_KEY: &str = "__condition";

/// Static config minus the reserved keys, with values arriving on incoming
/// data edges from nodes that already ran.
pub fn seed_params(workflow: &Workflow, node: &NodeSpec, node_outputs: &BTreeMap<NodeId, Map>) -> Map {
    let mut params: Map = node
        .config
        .iter()
        .filter(|(k, _)| k.as_str() != NODE_ID_KEY && k.as_str() != CONDITION_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for edge in workflow.incoming(&node.id).filter(|e| !e.is_control()) {
        let Some(value) = node_outputs
            .get(&edge.source)
            .and_then(|outputs| outputs.get(&edge.source_output))
        else {
            continue;
        };
        let value = match edge.path.as_deref().map(Path::parse) {
            None => Some(value.clone()),
            Some(Ok(path)) => path.lookup(value).cloned(),
            Some(Err(e)) => {
                tracing::warn!("edge {} has an invalid path: {}", edge.id, e);
                None
            }
        };
        if let Some(value) = value {
            params.insert(edge.target_input.clone(), value);
        }
    }

    params
}

/// The document templates are rendered against. Variables are also
/// reachable at the top level unless shadowed by a reserved name.
///
/// Reserved names (`config`, `button`, `menu`, `runtime`, `variables`,
/// `nodes`, `error`) always win. A user variable called `error` is still
/// readable as `variables.error`; the top-level `error` is the error last
/// caught by a try/catch handler, or null.
pub fn render_context(
    node: &NodeSpec,
    variables: &Map,
    engine: &EngineState,
    node_outputs: &BTreeMap<NodeId, Map>,
    runtime: &RuntimeInfo,
) -> Value {
    let mut ctx = variables.clone();
    ctx.insert("config".into(), Value::Object(node.config.clone()));
    ctx.insert("button".into(), runtime.button.clone().unwrap_or(Value::Null));
    ctx.insert("menu".into(), runtime.menu.clone().unwrap_or(Value::Null));
    ctx.insert(
        "runtime".into(),
        serde_json::to_value(runtime).unwrap_or(Value::Null),
    );
    ctx.insert("variables".into(), Value::Object(variables.clone()));
    ctx.insert(
        "nodes".into(),
        Value::Object(
            node_outputs
                .iter()
                .map(|(id, outputs)| (id.clone(), Value::Object(outputs.clone())))
                .collect(),
        ),
    );
    ctx.insert(
        "error".into(),
        engine
            .last_error
            .as_ref()
            .and_then(|e| serde_json::to_value(e).ok())
            .unwrap_or(Value::Null),
    );
    Value::Object(ctx)
}

pub fn render_params(params: Map, ctx: &Value) -> Map {
    match template::render_structure(&Value::Object(params), ctx) {
        Value::Object(rendered) => rendered,
        _ => Map::new(),
    }
}

/// Outcome of the condition gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Run,
    Skip,
}

fn expression_allows(expression: &str, ctx: &Value) -> Result<bool, String> {
    let template = if expression.contains("{{") {
        expression.to_string()
    } else {
        format!("{{{{ {} }}}}", expression)
    };
    template::validate(&template).map_err(|e| format!("invalid condition expression: {}", e))?;
    Ok(coerce_to_bool(&Value::String(template::render(&template, ctx))))
}

/// Evaluate the node's `__condition` spec. Either a bare mode string or an
/// object `{mode, expression?, input?}`.
pub fn evaluate_gate(node: &NodeSpec, ctx: &Value, params: &Map) -> Result<Gate, String> {
    let Some(spec) = node.config.get(CONDITION_KEY) else {
        return Ok(Gate::Run);
    };

    let (mode, expression, input) = match spec {
        Value::Null => return Ok(Gate::Run),
        Value::String(mode) => (mode.as_str(), None, None),
        Value::Object(obj) => (
            obj.get("mode").and_then(Value::as_str).unwrap_or("always"),
            obj.get("expression").and_then(Value::as_str),
            obj.get("input").and_then(Value::as_str),
        ),
        other => return Err(format!("unsupported condition spec: {}", other)),
    };

    let mut gate_ctx = ctx.clone();
    if let Value::Object(map) = &mut gate_ctx {
        map.insert("inputs".into(), Value::Object(params.clone()));
    }

    let allowed = match mode {
        "always" | "" => true,
        "never" => false,
        "expression" => {
            let expression = expression.ok_or("expression condition has no expression")?;
            expression_allows(expression, &gate_ctx)?
        }
        "linked" => match (expression, input) {
            (Some(expression), _) => expression_allows(expression, &gate_ctx)?,
            (None, Some(input)) => params.get(input).map(coerce_to_bool).unwrap_or(false),
            (None, None) => return Err("linked condition needs an expression or an input".into()),
        },
        other => return Err(format!("unknown condition mode '{}'", other)),
    };

    Ok(if allowed { Gate::Run } else { Gate::Skip })
}

/// Dispatch a single action by kind under `policy`. Returns the outcome and
/// the number of attempts made.
pub async fn dispatch(
    registry: &ActionRegistry,
    action_id: &str,
    policy: &ExecutionPolicy,
    ctx: ActionContext,
) -> (Result<ActionOutcome, NodeError>, u32) {
    let Some(handler) = registry.get(action_id).cloned() else {
        let err = if action_id == SUB_WORKFLOW_ACTION {
            NodeError::UnsupportedKind {
                action_id: action_id.to_string(),
                kind: ActionKind::Workflow.to_string(),
            }
        } else {
            NodeError::UnknownAction(action_id.to_string())
        };
        return (Err(err), 0);
    };

    let kind = handler.kind();
    match kind {
        ActionKind::Workflow => {
            return (
                Err(NodeError::UnsupportedKind {
                    action_id: action_id.to_string(),
                    kind: kind.to_string(),
                }),
                0,
            );
        }
        ActionKind::Modular | ActionKind::Http | ActionKind::Local => {}
    }

    run_with_policy(policy, action_id, |attempt| {
        let handler = handler.clone();
        let ctx = ctx.clone();
        async move {
            tracing::debug!(
                "Dispatching {} action {} (attempt {})",
                kind,
                handler.action_id(),
                attempt
            );
            handler.execute(ctx).await
        }
    })
    .await
}

/// Hand a record to the tracer; failures are logged and dropped.
pub async fn emit_trace(tracer: &dyn Tracer, record: TraceRecord) {
    let node = record.node_id.clone().unwrap_or_default();
    if let Err(e) = tracer.record(record).await {
        tracing::warn!("Failed to record trace for node {}: {}", node, e);
    }
}

/// JSON view of an outcome for trace records.
pub fn outcome_summary(outcome: &ActionOutcome) -> Value {
    match outcome {
        ActionOutcome::Continue(output) => serde_json::json!({ "output": output }),
        ActionOutcome::Branch {
            output,
            flow_output,
        } => serde_json::json!({ "output": output, "flow_output": flow_output }),
        ActionOutcome::Suspend(spec) => serde_json::json!({ "pending": spec }),
        ActionOutcome::NestedPending(nested) => serde_json::json!({
            "pending": nested.pending.suspend,
            "nested_workflow": nested.pending.workflow_id,
        }),
    }
}
