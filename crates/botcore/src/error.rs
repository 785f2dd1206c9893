use crate::workflow::{NodeId, WorkflowId};
use thiserror::Error;

/// Top-level failure of a workflow run.
///
/// Only [`FlowError::Node`] can be intercepted by a try/catch handler; every
/// other variant aborts the run.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node '{node_id}' failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("recursive invocation of workflow '{workflow_id}' (call stack: {})", .call_stack.join(" -> "))]
    RecursiveInvocation {
        workflow_id: WorkflowId,
        call_stack: Vec<WorkflowId>,
    },

    #[error("maximum workflow nesting depth of {max_depth} exceeded while invoking '{workflow_id}'")]
    NestingTooDeep {
        workflow_id: WorkflowId,
        max_depth: usize,
    },

    #[error("workflow '{workflow_id}' exceeded the step limit of {max_steps}")]
    StepLimit {
        workflow_id: WorkflowId,
        max_steps: u64,
    },

    #[error("condition on node '{node_id}' failed: {message}")]
    Condition { node_id: NodeId, message: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("invalid resume state: {0}")]
    InvalidResume(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn node(node_id: impl Into<NodeId>, source: NodeError) -> Self {
        FlowError::Node {
            node_id: node_id.into(),
            source,
        }
    }

    /// Whether a try/catch handler may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, FlowError::Node { .. })
    }
}

/// Failure of a single action invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("action '{action_id}' timed out after {millis}ms")]
    Timeout { action_id: String, millis: u64 },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("action '{action_id}' of kind '{kind}' cannot be dispatched as a single node")]
    UnsupportedKind { action_id: String, kind: String },

    #[error("sub-workflow '{workflow_id}' failed: {message}")]
    ChildWorkflowFailed {
        workflow_id: WorkflowId,
        message: String,
    },

    #[error("{last} (after {attempts} {})", attempt_noun(.attempts))]
    Exhausted { attempts: u32, last: Box<NodeError> },
}

fn attempt_noun(attempts: &u32) -> &'static str {
    if *attempts == 1 {
        "attempt"
    } else {
        "attempts"
    }
}

/// Structural problems found before any node runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("cycle detected among nodes: {}", .nodes.join(", "))]
    Cycle { nodes: Vec<NodeId> },

    #[error("ambiguous branch: node '{node}' output '{output}' routes to both '{first}' and '{second}'")]
    AmbiguousBranch {
        node: NodeId,
        output: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("edge '{edge}' references unknown node '{node}'")]
    UnknownNode { edge: String, node: NodeId },
}

/// Raised by a [`Tracer`](crate::Tracer) sink. Never affects the run outcome.
#[derive(Error, Debug, Clone)]
#[error("tracer failure: {0}")]
pub struct TraceError(pub String);
