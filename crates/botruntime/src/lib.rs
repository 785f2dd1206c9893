//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: ordering, the node
//! invocation pipeline, control-flow routing with try/catch, suspend/resume
//! across nested sub-workflows, and the action registry.

mod executor;
mod graph;
pub mod invoke;
pub mod policy;
mod registry;
mod router;
mod runtime;
mod store;
mod terminal;

pub use executor::{RunOptions, RunOutcome, RunSummary, WorkflowExecutor};
pub use graph::{execution_order, ExecutionPlan};
pub use policy::{Backoff, ExecutionPolicy};
pub use registry::{ActionMetadata, ActionRegistry, SUB_WORKFLOW_ACTION, TRY_CATCH_ACTION};
pub use router::ControlRouter;
pub use runtime::{ExecutionResult, FlowRuntime, RuntimeConfig};
pub use store::{MemoryStore, WorkflowStore};
pub use terminal::{collect_terminal_outputs, sanitize_key, terminal_key, TerminalOutputs};
