//! Core abstractions for the bot workflow engine
//!
//! This crate provides the data model, error taxonomy, template language and
//! the contracts (action handlers, tracers) that the runtime depends on. It
//! has no scheduling logic of its own.

mod action;
mod error;
mod state;
pub mod template;
mod trace;
mod value;
mod workflow;

pub use action::{
    ActionContext, ActionHandler, ActionKind, ActionOutcome, NestedPending, NodeOutput, SuspendSpec,
};
pub use error::{FlowError, GraphError, NodeError, TraceError};
pub use state::{
    CaughtError, Continuation, ContinuationStack, EngineState, HandlerFrame, PendingExecution,
    ResumeState, RuntimeContext, RuntimeInfo, SubWorkflowMeta, LEGACY_ENGINE_KEY,
};
pub use trace::{ExecutionId, LogTracer, NoopTracer, TraceBus, TraceRecord, TraceStatus, Tracer};
pub use value::{coerce_to_bool, loose_cmp, loose_eq, to_number, to_text, Map, Value};
pub use workflow::{
    is_branch_port, is_control_port, Edge, NodeId, NodeSpec, Workflow, WorkflowId,
    WorkflowSettings, CONTROL_INPUT, CONTROL_OUTPUT,
};
