//! Run state that outlives a single invocation: engine bookkeeping, resume
//! snapshots and the continuation chain for nested sub-workflows.

use crate::action::SuspendSpec;
use crate::value::{Map, Value};
use crate::workflow::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under which older payloads embedded engine bookkeeping inside the
/// user variable bag.
pub const LEGACY_ENGINE_KEY: &str = "__engine";

/// Identifiers and UI context of the chat interaction that started a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeInfo {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub button: Option<Value>,
    #[serde(default)]
    pub menu: Option<Value>,
}

/// Caller-owned context of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeContext {
    #[serde(default)]
    pub runtime: RuntimeInfo,
    /// Environment exposed to action handlers.
    #[serde(default)]
    pub env: Map,
    /// Dry-run flag forwarded to handlers.
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub variables: Map,
    #[serde(default)]
    pub engine: EngineState,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.runtime.chat_id = Some(chat_id.into());
        self.runtime.user_id = Some(user_id.into());
        self
    }

    /// Move any legacy engine payload out of `variables` into `engine`.
    pub fn migrate_legacy_engine(&mut self) {
        self.engine.absorb_legacy(&mut self.variables);
    }
}

/// A pending try/catch registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerFrame {
    pub try_node: NodeId,
    pub catch_node: NodeId,
}

/// The failure a catch handler was entered with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaughtError {
    pub message: String,
    pub node_id: NodeId,
    pub try_node_id: NodeId,
}

/// Engine bookkeeping carried beside the user variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineState {
    #[serde(default)]
    pub handler_stack: Vec<HandlerFrame>,
    #[serde(default)]
    pub last_error: Option<CaughtError>,
    #[serde(default, alias = "node_outputs")]
    pub node_snapshots: BTreeMap<NodeId, Map>,
}

impl EngineState {
    pub fn push_handler(&mut self, try_node: impl Into<NodeId>, catch_node: impl Into<NodeId>) {
        self.handler_stack.push(HandlerFrame {
            try_node: try_node.into(),
            catch_node: catch_node.into(),
        });
    }

    pub fn pop_handler(&mut self) -> Option<HandlerFrame> {
        self.handler_stack.pop()
    }

    pub fn record_snapshot(&mut self, node_id: impl Into<NodeId>, outputs: Map) {
        self.node_snapshots.insert(node_id.into(), outputs);
    }

    /// Merge `other` into `self`. Handler frames from `other` go underneath
    /// ours, snapshots and the last error from `self` win.
    pub fn merge(&mut self, other: EngineState) {
        let mut stack = other.handler_stack;
        stack.append(&mut self.handler_stack);
        self.handler_stack = stack;
        if self.last_error.is_none() {
            self.last_error = other.last_error;
        }
        for (node, outputs) in other.node_snapshots {
            self.node_snapshots.entry(node).or_insert(outputs);
        }
    }

    /// Remove [`LEGACY_ENGINE_KEY`] from `variables` and merge its contents.
    /// Payloads that do not parse are dropped with a warning.
    pub fn absorb_legacy(&mut self, variables: &mut Map) {
        let Some(raw) = variables.remove(LEGACY_ENGINE_KEY) else {
            return;
        };
        match serde_json::from_value::<EngineState>(raw) {
            Ok(legacy) => self.merge(legacy),
            Err(e) => tracing::warn!("discarding unreadable legacy engine state: {}", e),
        }
    }
}

/// Everything needed to continue a suspended workflow at `next_index`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeState {
    pub workflow_id: WorkflowId,
    pub order: Vec<NodeId>,
    pub next_index: usize,
    #[serde(default)]
    pub node_outputs: BTreeMap<NodeId, Map>,
    #[serde(default)]
    pub variables: Map,
    #[serde(default)]
    pub engine: EngineState,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub cleanup: Vec<Value>,
    #[serde(default)]
    pub next_menu: Option<String>,
    /// Workflow ids of the callers, outermost first, including this workflow.
    #[serde(default)]
    pub call_stack: Vec<WorkflowId>,
}

/// How a sub-workflow node treats its child.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubWorkflowMeta {
    pub child_workflow_id: WorkflowId,
    /// Surface a failed child as a node error instead of the `error` branch.
    #[serde(default)]
    pub propagate_error: bool,
}

/// One ancestor waiting for a nested workflow to finish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Continuation {
    pub workflow_id: WorkflowId,
    /// The sub-workflow node in the ancestor that started the child.
    pub node_id: NodeId,
    pub resume: ResumeState,
    pub meta: SubWorkflowMeta,
}

/// Ancestors of a suspended workflow, nearest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ContinuationStack {
    frames: Vec<Continuation>,
}

impl ContinuationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next ancestor outward.
    pub fn push(&mut self, frame: Continuation) {
        self.frames.push(frame);
    }

    /// The ancestor to resume first.
    pub fn nearest(&self) -> Option<&Continuation> {
        self.frames.first()
    }

    pub fn frames(&self) -> &[Continuation] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append ancestors that sit further out than every frame already held.
    pub fn extend(&mut self, outer: impl IntoIterator<Item = Continuation>) {
        self.frames.extend(outer);
    }
}

impl IntoIterator for ContinuationStack {
    type Item = Continuation;
    type IntoIter = std::vec::IntoIter<Continuation>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// A suspended run as handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingExecution {
    /// The innermost suspended workflow.
    pub workflow_id: WorkflowId,
    /// The node that asked to suspend.
    pub node_id: NodeId,
    pub suspend: SuspendSpec,
    pub resume: ResumeState,
    #[serde(default)]
    pub continuations: ContinuationStack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absorbs_legacy_engine_payload() {
        let mut ctx = RuntimeContext::new().with_variable(
            LEGACY_ENGINE_KEY,
            json!({
                "handler_stack": [{"try_node": "t", "catch_node": "c"}],
                "node_outputs": {"a": {"x": 1}}
            }),
        );
        ctx.engine.push_handler("t2", "c2");
        ctx.migrate_legacy_engine();

        assert!(!ctx.variables.contains_key(LEGACY_ENGINE_KEY));
        assert_eq!(ctx.engine.handler_stack.len(), 2);
        assert_eq!(ctx.engine.pop_handler().unwrap().try_node, "t2");
        assert_eq!(ctx.engine.node_snapshots["a"]["x"], json!(1));
    }

    #[test]
    fn unreadable_legacy_payload_is_dropped() {
        let mut vars = Map::new();
        vars.insert(LEGACY_ENGINE_KEY.into(), json!("garbage"));
        let mut engine = EngineState::default();
        engine.absorb_legacy(&mut vars);
        assert!(vars.is_empty());
        assert_eq!(engine, EngineState::default());
    }

    #[test]
    fn continuation_stack_is_nearest_first() {
        let resume = ResumeState {
            workflow_id: "p".into(),
            order: vec![],
            next_index: 0,
            node_outputs: Default::default(),
            variables: Map::new(),
            engine: EngineState::default(),
            text: vec![],
            cleanup: vec![],
            next_menu: None,
            call_stack: vec![],
        };
        let mut stack = ContinuationStack::new();
        for id in ["parent", "grandparent"] {
            stack.push(Continuation {
                workflow_id: id.into(),
                node_id: "call".into(),
                resume: resume.clone(),
                meta: SubWorkflowMeta::default(),
            });
        }
        assert_eq!(stack.nearest().unwrap().workflow_id, "parent");
        let encoded = serde_json::to_value(&stack).unwrap();
        assert!(encoded.is_array());
        assert_eq!(encoded.as_array().unwrap().len(), 2);
    }
}
