use crate::error::NodeError;
use crate::state::{PendingExecution, RuntimeInfo, SubWorkflowMeta};
use crate::trace::ExecutionId;
use crate::value::{Map, Value};
use crate::workflow::{NodeId, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dispatch family of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Modular,
    Http,
    Local,
    /// Runs another workflow; handled by the engine itself.
    Workflow,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Modular => "modular",
            ActionKind::Http => "http",
            ActionKind::Local => "local",
            ActionKind::Workflow => "workflow",
        };
        f.write_str(name)
    }
}

/// Capability the engine calls by action id.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Action identifier referenced by `NodeSpec::action_id`.
    fn action_id(&self) -> &str;

    fn kind(&self) -> ActionKind {
        ActionKind::Local
    }

    /// One-line description for listings.
    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError>;
}

/// Everything an action sees for one invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: ExecutionId,
    pub workflow_id: Option<WorkflowId>,
    pub node_id: Option<NodeId>,
    /// Rendered parameters with engine-reserved keys removed.
    pub params: Map,
    pub runtime: RuntimeInfo,
    pub env: Map,
    /// Snapshot of the shared variable bag.
    pub variables: Map,
    pub preview: bool,
}

impl ActionContext {
    pub fn new(execution_id: ExecutionId, params: Map) -> Self {
        Self {
            execution_id,
            workflow_id: None,
            node_id: None,
            params,
            runtime: RuntimeInfo::default(),
            env: Map::new(),
            variables: Map::new(),
            preview: false,
        }
    }

    /// Get required param or return error
    pub fn require_param(&self, name: &str) -> Result<&Value, NodeError> {
        self.params
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a required string param
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_param(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: value_type(value).to_string(),
        })
    }

    /// Get param with default
    pub fn get_param_or(&self, name: &str, default: Value) -> Value {
        self.params.get(name).cloned().unwrap_or(default)
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Output of a completed node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    /// Merged into the shared variable bag and snapshotted under the node id.
    #[serde(default)]
    pub variables: Map,
    /// Text fragment to send back to the chat.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub next_menu: Option<String>,
    /// Opaque items the transport should clean up once the run ends.
    #[serde(default)]
    pub cleanup: Vec<Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_next_menu(mut self, menu: impl Into<String>) -> Self {
        self.next_menu = Some(menu.into());
        self
    }

    pub fn with_cleanup(mut self, item: impl Into<Value>) -> Self {
        self.cleanup.push(item.into());
        self
    }
}

/// A node's request to halt the run until external input arrives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuspendSpec {
    pub reason: String,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Variable that receives the reply on resume.
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl SuspendSpec {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }
}

/// A nested workflow suspended while running on behalf of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedPending {
    pub pending: PendingExecution,
    pub meta: SubWorkflowMeta,
}

/// What a node asks the scheduler to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Merge outputs and advance.
    Continue(NodeOutput),
    /// Merge outputs and follow the control edge named `flow_output`.
    Branch {
        output: NodeOutput,
        flow_output: String,
    },
    /// Halt this workflow at the current node.
    Suspend(SuspendSpec),
    /// A child workflow halted; the scheduler adds a continuation frame.
    NestedPending(Box<NestedPending>),
}

impl ActionOutcome {
    pub fn done() -> Self {
        ActionOutcome::Continue(NodeOutput::new())
    }

    pub fn branch(output: NodeOutput, flow_output: impl Into<String>) -> Self {
        ActionOutcome::Branch {
            output,
            flow_output: flow_output.into(),
        }
    }

    pub fn flow_output(&self) -> Option<&str> {
        match self {
            ActionOutcome::Branch { flow_output, .. } => Some(flow_output),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&NodeOutput> {
        match self {
            ActionOutcome::Continue(output) | ActionOutcome::Branch { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Convert a handler result map using the reserved keys `success`,
    /// `error`, `flow_output`, `pending`, `data.variables`, `text`,
    /// `next_menu` and `cleanup`.
    pub fn from_result_map(mut map: Map) -> Result<Self, NodeError> {
        if map.get("success").and_then(Value::as_bool) == Some(false) {
            let message = map
                .get("error")
                .map(crate::value::to_text)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "action reported failure".to_string());
            return Err(NodeError::ExecutionFailed(message));
        }

        if let Some(pending) = map.remove("pending") {
            let spec = match pending {
                Value::Object(_) => serde_json::from_value::<SuspendSpec>(pending)
                    .map_err(|e| NodeError::ExecutionFailed(format!("invalid pending request: {}", e)))?,
                Value::Bool(false) | Value::Null => return Self::from_result_map(map),
                Value::String(reason) => SuspendSpec::new(reason),
                _ => SuspendSpec::new("pending"),
            };
            return Ok(ActionOutcome::Suspend(spec));
        }

        let variables = match map.remove("data") {
            Some(Value::Object(mut data)) => match data.remove("variables") {
                Some(Value::Object(vars)) => vars,
                _ => Map::new(),
            },
            _ => Map::new(),
        };

        let output = NodeOutput {
            variables,
            text: map.get("text").and_then(Value::as_str).map(str::to_string),
            next_menu: map.get("next_menu").and_then(Value::as_str).map(str::to_string),
            cleanup: match map.remove("cleanup") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
        };

        match map.get("flow_output").and_then(Value::as_str) {
            Some(flow) if !flow.is_empty() => Ok(ActionOutcome::branch(output, flow)),
            _ => Ok(ActionOutcome::Continue(output)),
        }
    }
}
