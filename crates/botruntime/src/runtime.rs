use crate::executor::{RunOptions, RunOutcome, WorkflowExecutor};
use crate::policy::ExecutionPolicy;
use crate::registry::{ActionRegistry, SUB_WORKFLOW_ACTION};
use crate::store::{MemoryStore, WorkflowStore};
use crate::terminal::TerminalOutputs;
use botcore::{
    EngineState, ExecutionId, FlowError, Map, NodeId, NodeSpec, PendingExecution, ResumeState,
    RuntimeContext, TraceBus, TraceRecord, Tracer, Value, Workflow, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_INPUT_VARIABLE: &str = "user_input";

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<ActionRegistry>,
    executor: Arc<WorkflowExecutor>,
    store: Arc<dyn WorkflowStore>,
    trace_bus: Option<Arc<TraceBus>>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(ActionRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry, an in-memory
    /// store and a broadcast trace bus.
    pub fn with_registry(registry: Arc<ActionRegistry>, config: RuntimeConfig) -> Self {
        let bus = Arc::new(TraceBus::new(config.trace_buffer_size.max(1)));
        let mut runtime = Self::with_parts(registry, Arc::new(MemoryStore::new()), bus.clone(), config);
        runtime.trace_bus = Some(bus);
        runtime
    }

    /// Assemble a runtime from explicit collaborators.
    pub fn with_parts(
        registry: Arc<ActionRegistry>,
        store: Arc<dyn WorkflowStore>,
        tracer: Arc<dyn Tracer>,
        config: RuntimeConfig,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(
            registry.clone(),
            store.clone(),
            tracer,
            config.clone(),
        ));
        Self {
            registry,
            executor,
            store,
            trace_bus: None,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Make a workflow available to sub-workflow nodes and by-id execution.
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), FlowError> {
        tracing::debug!("Registering workflow: {}", workflow.id);
        self.store.save_workflow(workflow).await
    }

    /// Subscribe to node trace records. `None` when the runtime was built
    /// with a custom tracer.
    pub fn subscribe_traces(&self) -> Option<tokio::sync::broadcast::Receiver<TraceRecord>> {
        self.trace_bus.as_ref().map(|bus| bus.subscribe())
    }

    /// Execute a workflow, or continue it from `resume` when given.
    pub async fn execute_workflow(
        &self,
        ctx: RuntimeContext,
        workflow: &Workflow,
        resume: Option<ResumeState>,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::new_v4();
        let options = RunOptions {
            execution_id: Some(execution_id),
            ..RunOptions::default()
        };
        let result = match resume {
            Some(state) => self.executor.resume(workflow, ctx, state, options).await,
            None => self.executor.execute(workflow, ctx, options).await,
        };
        ExecutionResult::from_run(execution_id, &workflow.id, result)
    }

    /// Execute a stored workflow by id
    pub async fn execute_workflow_by_id(&self, ctx: RuntimeContext, workflow_id: &str) -> ExecutionResult {
        match self.load_workflow(workflow_id).await {
            Ok(workflow) => self.execute_workflow(ctx, &workflow, None).await,
            Err(e) => ExecutionResult::failed(ExecutionId::new_v4(), workflow_id, &e),
        }
    }

    /// Run one action with `params` as its config. `sub_workflow` (or an id
    /// that only names a stored workflow) runs that workflow instead, with
    /// `inputs` overlaid on the caller variables.
    pub async fn execute_single_action_or_workflow(
        &self,
        mut ctx: RuntimeContext,
        action_id: &str,
        params: Map,
    ) -> ExecutionResult {
        let stored_id = if action_id == SUB_WORKFLOW_ACTION {
            params
                .get("workflow_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else if self.registry.get(action_id).is_none() {
            match self.store.workflow(action_id).await {
                Ok(Some(_)) => Some(action_id.to_string()),
                _ => None,
            }
        } else {
            None
        };

        if let Some(workflow_id) = stored_id {
            let inputs = if action_id == SUB_WORKFLOW_ACTION {
                match params.get("inputs") {
                    Some(Value::Object(inputs)) => inputs.clone(),
                    _ => Map::new(),
                }
            } else {
                params
            };
            ctx.variables.extend(inputs);
            return self.execute_workflow_by_id(ctx, &workflow_id).await;
        }

        let mut workflow = Workflow::new(format!("adhoc:{}", action_id), action_id);
        let mut node = NodeSpec::new(action_id, action_id);
        node.config = params;
        workflow.add_node(node);
        self.execute_workflow(ctx, &workflow, None).await
    }

    /// Continue a suspended chain. `input` lands in the variable the
    /// suspending node named (default `user_input`); the innermost workflow
    /// resumes first, then every waiting ancestor in turn.
    pub async fn resume(
        &self,
        pending: PendingExecution,
        input: Option<Value>,
        ctx: RuntimeContext,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::new_v4();
        let root_id = pending
            .continuations
            .frames()
            .last()
            .map(|frame| frame.workflow_id.clone())
            .unwrap_or_else(|| pending.workflow_id.clone());
        let result = self.drive_resume(execution_id, pending, input, ctx).await;
        ExecutionResult::from_run(execution_id, &root_id, result)
    }

    async fn drive_resume(
        &self,
        execution_id: ExecutionId,
        pending: PendingExecution,
        input: Option<Value>,
        mut ctx: RuntimeContext,
    ) -> Result<RunOutcome, FlowError> {
        let PendingExecution {
            workflow_id,
            suspend,
            resume,
            continuations,
            ..
        } = pending;

        if let Some(input) = input {
            let variable = suspend
                .variable
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_INPUT_VARIABLE.to_string());
            ctx.variables.insert(variable, input);
        }

        let options = RunOptions {
            execution_id: Some(execution_id),
            ..RunOptions::default()
        };
        let workflow = self.load_workflow(&workflow_id).await?;
        let mut outcome = self
            .executor
            .resume(&workflow, ctx.clone(), resume, options.clone())
            .await;

        let mut frames = continuations.into_iter();
        while let Some(frame) = frames.next() {
            if let Ok(RunOutcome::Suspended(mut pending)) = outcome {
                pending.continuations.push(frame);
                pending.continuations.extend(&mut frames);
                return Ok(RunOutcome::Suspended(pending));
            }
            let parent = self.load_workflow(&frame.workflow_id).await?;
            let parent_ctx = RuntimeContext {
                variables: Map::new(),
                engine: EngineState::default(),
                ..ctx.clone()
            };
            outcome = self
                .executor
                .resume_from_child(&parent, parent_ctx, frame, outcome, options.clone())
                .await;
        }

        outcome
    }

    /// Store a pending execution until input arrives.
    pub async fn park(&self, execution_id: ExecutionId, pending: PendingExecution) -> Result<(), FlowError> {
        self.store.save_pending(execution_id, pending).await
    }

    /// Resume a parked execution. Fails when nothing is parked under the id.
    pub async fn resume_parked(
        &self,
        execution_id: ExecutionId,
        input: Option<Value>,
        ctx: RuntimeContext,
    ) -> ExecutionResult {
        match self.store.take_pending(execution_id).await {
            Ok(Some(pending)) => self.resume(pending, input, ctx).await,
            Ok(None) => ExecutionResult::failed(
                execution_id,
                "",
                &FlowError::InvalidResume(format!("no execution parked under {}", execution_id)),
            ),
            Err(e) => ExecutionResult::failed(execution_id, "", &e),
        }
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow, FlowError> {
        self.store
            .workflow(workflow_id)
            .await?
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.to_string()))
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Node executions allowed per invocation.
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub trace_buffer_size: usize,
    pub default_policy: ExecutionPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_call_depth: 16,
            trace_buffer_size: 1000,
            default_policy: ExecutionPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Result of one entry-point call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    /// True for completed and suspended runs.
    pub success: bool,
    pub error: Option<String>,
    pub flow_output: Option<String>,
    /// Set when the run is waiting for input.
    pub pending: Option<PendingExecution>,
    pub variables: Map,
    pub node_outputs: BTreeMap<NodeId, Map>,
    pub text: Vec<String>,
    pub next_menu: Option<String>,
    pub cleanup: Vec<Value>,
    pub engine: EngineState,
    pub terminal: TerminalOutputs,
}

impl ExecutionResult {
    fn empty(execution_id: ExecutionId, workflow_id: &str) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.to_string(),
            success: true,
            error: None,
            flow_output: None,
            pending: None,
            variables: Map::new(),
            node_outputs: BTreeMap::new(),
            text: Vec::new(),
            next_menu: None,
            cleanup: Vec::new(),
            engine: EngineState::default(),
            terminal: TerminalOutputs::default(),
        }
    }

    pub fn failed(execution_id: ExecutionId, workflow_id: &str, error: &FlowError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::empty(execution_id, workflow_id)
        }
    }

    pub fn from_run(
        execution_id: ExecutionId,
        workflow_id: &str,
        result: Result<RunOutcome, FlowError>,
    ) -> Self {
        match result {
            Ok(RunOutcome::Completed(summary)) => Self {
                flow_output: summary.flow_output,
                variables: summary.variables,
                node_outputs: summary.node_outputs,
                text: summary.text,
                next_menu: summary.next_menu,
                cleanup: summary.cleanup,
                engine: summary.engine,
                terminal: summary.terminal,
                ..Self::empty(execution_id, workflow_id)
            },
            Ok(RunOutcome::Suspended(pending)) => Self {
                variables: pending.resume.variables.clone(),
                node_outputs: pending.resume.node_outputs.clone(),
                text: pending.resume.text.clone(),
                next_menu: pending.resume.next_menu.clone(),
                cleanup: pending.resume.cleanup.clone(),
                engine: pending.resume.engine.clone(),
                pending: Some(pending),
                ..Self::empty(execution_id, workflow_id)
            },
            Err(e) => Self::failed(execution_id, workflow_id, &e),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
