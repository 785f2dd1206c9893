use crate::graph::ExecutionPlan;
use crate::invoke::{self, Gate};
use crate::policy::ExecutionPolicy;
use crate::registry::{ActionRegistry, SUB_WORKFLOW_ACTION};
use crate::runtime::RuntimeConfig;
use crate::store::WorkflowStore;
use crate::terminal::{collect_terminal_outputs, TerminalOutputs};
use botcore::{
    coerce_to_bool, ActionContext, ActionOutcome, Continuation, ContinuationStack, EngineState,
    ExecutionId, FlowError, Map, NestedPending, NodeError, NodeId, NodeOutput, NodeSpec,
    PendingExecution, ResumeState, RuntimeContext, RuntimeInfo, SubWorkflowMeta, TraceRecord,
    TraceStatus, Tracer, Value, Workflow, WorkflowId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-invocation overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Takes precedence over the workflow setting and the runtime default.
    pub max_steps: Option<u64>,
    /// Workflow ids of the callers, outermost first.
    pub call_stack: Vec<WorkflowId>,
    pub execution_id: Option<ExecutionId>,
}

/// What a finished workflow leaves behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_id: WorkflowId,
    pub variables: Map,
    pub engine: EngineState,
    pub node_outputs: BTreeMap<NodeId, Map>,
    pub text: Vec<String>,
    pub next_menu: Option<String>,
    pub cleanup: Vec<Value>,
    /// Flow output of the last node that branched.
    pub flow_output: Option<String>,
    pub terminal: TerminalOutputs,
    pub steps: u64,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    Suspended(PendingExecution),
}

enum NodeRun {
    /// The condition gate declined the node.
    Skipped,
    Ran(Result<ActionOutcome, NodeError>),
}

struct RunState {
    execution_id: ExecutionId,
    runtime: RuntimeInfo,
    env: Map,
    preview: bool,
    plan: ExecutionPlan,
    cursor: usize,
    variables: Map,
    engine: EngineState,
    node_outputs: BTreeMap<NodeId, Map>,
    text: Vec<String>,
    cleanup: Vec<Value>,
    next_menu: Option<String>,
    flow_output: Option<String>,
    call_stack: Vec<WorkflowId>,
    steps: u64,
    max_steps: u64,
}

impl RunState {
    fn snapshot(&self, workflow_id: &str, next_index: usize) -> ResumeState {
        ResumeState {
            workflow_id: workflow_id.to_string(),
            order: self.plan.order.clone(),
            next_index,
            node_outputs: self.node_outputs.clone(),
            variables: self.variables.clone(),
            engine: self.engine.clone(),
            text: self.text.clone(),
            cleanup: self.cleanup.clone(),
            next_menu: self.next_menu.clone(),
            call_stack: self.call_stack.clone(),
        }
    }

    fn apply_output(&mut self, node_id: &str, output: NodeOutput) {
        for (key, value) in &output.variables {
            self.variables.insert(key.clone(), value.clone());
        }
        self.engine.record_snapshot(node_id, output.variables.clone());
        self.node_outputs.insert(node_id.to_string(), output.variables);
        if let Some(text) = output.text {
            self.text.push(text);
        }
        if output.next_menu.is_some() {
            self.next_menu = output.next_menu;
        }
        self.cleanup.extend(output.cleanup);
    }

    fn finish(self, workflow: &Workflow) -> RunSummary {
        let terminal = collect_terminal_outputs(workflow, &self.node_outputs);
        RunSummary {
            workflow_id: workflow.id.clone(),
            variables: self.variables,
            engine: self.engine,
            node_outputs: self.node_outputs,
            text: self.text,
            next_menu: self.next_menu,
            cleanup: self.cleanup,
            flow_output: self.flow_output,
            terminal,
            steps: self.steps,
        }
    }
}

/// Runs workflows node by node in a deterministic order
pub struct WorkflowExecutor {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn WorkflowStore>,
    tracer: Arc<dyn Tracer>,
    config: RuntimeConfig,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        store: Arc<dyn WorkflowStore>,
        tracer: Arc<dyn Tracer>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            store,
            tracer,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn step_limit(&self, workflow: &Workflow, options: &RunOptions) -> u64 {
        options
            .max_steps
            .or(workflow.settings.max_steps)
            .unwrap_or(self.config.max_steps)
    }

    /// Execute a workflow from its first node.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        mut ctx: RuntimeContext,
        options: RunOptions,
    ) -> Result<RunOutcome, FlowError> {
        ctx.migrate_legacy_engine();

        if options.call_stack.iter().any(|id| id == &workflow.id) {
            return Err(FlowError::RecursiveInvocation {
                workflow_id: workflow.id.clone(),
                call_stack: options.call_stack,
            });
        }
        if options.call_stack.len() >= self.config.max_call_depth {
            return Err(FlowError::NestingTooDeep {
                workflow_id: workflow.id.clone(),
                max_depth: self.config.max_call_depth,
            });
        }

        let plan = ExecutionPlan::build(workflow)?;
        tracing::info!(
            "Starting workflow {} ({} nodes, depth {})",
            workflow.id,
            plan.order.len(),
            options.call_stack.len()
        );

        let mut call_stack = options.call_stack.clone();
        call_stack.push(workflow.id.clone());

        let state = RunState {
            execution_id: options.execution_id.unwrap_or_else(ExecutionId::new_v4),
            runtime: ctx.runtime,
            env: ctx.env,
            preview: ctx.preview,
            plan,
            cursor: 0,
            variables: ctx.variables,
            engine: ctx.engine,
            node_outputs: BTreeMap::new(),
            text: Vec::new(),
            cleanup: Vec::new(),
            next_menu: None,
            flow_output: None,
            call_stack,
            steps: 0,
            max_steps: self.step_limit(workflow, &options),
        };

        self.run_loop(workflow, state).await
    }

    /// Continue a suspended workflow at `resume.next_index`. Caller
    /// variables are overlaid on the snapshot.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        ctx: RuntimeContext,
        resume: ResumeState,
        options: RunOptions,
    ) -> Result<RunOutcome, FlowError> {
        let state = self.resumed_state(workflow, ctx, resume, &options)?;
        tracing::info!(
            "Resuming workflow {} at position {}",
            workflow.id,
            state.cursor
        );
        self.run_loop(workflow, state).await
    }

    /// Apply the result of a nested workflow as the completion of the
    /// sub-workflow node recorded in `frame`, then continue the ancestor.
    pub async fn resume_from_child(
        &self,
        workflow: &Workflow,
        ctx: RuntimeContext,
        frame: Continuation,
        child: Result<RunOutcome, FlowError>,
        options: RunOptions,
    ) -> Result<RunOutcome, FlowError> {
        let Continuation {
            workflow_id,
            node_id,
            resume,
            meta,
        } = frame;
        if workflow_id != workflow.id {
            return Err(FlowError::InvalidResume(format!(
                "continuation belongs to workflow '{}', not '{}'",
                workflow_id, workflow.id
            )));
        }

        let mut state = self.resumed_state(workflow, ctx, resume, &options)?;
        state.cursor = state.plan.position_of(&node_id).ok_or_else(|| {
            FlowError::InvalidResume(format!("node '{}' is not scheduled in '{}'", node_id, workflow.id))
        })?;
        let node = workflow.find_node(&node_id).ok_or_else(|| {
            FlowError::InvalidResume(format!("node '{}' is not part of '{}'", node_id, workflow.id))
        })?;

        tracing::debug!(
            "Resuming workflow {} after child {} finished at node {}",
            workflow.id,
            meta.child_workflow_id,
            node_id
        );
        let run = NodeRun::Ran(settle_child(child, meta)?);
        if let Some(pending) = self.apply_result(workflow, node, &mut state, run)? {
            return Ok(RunOutcome::Suspended(pending));
        }
        self.run_loop(workflow, state).await
    }

    fn resumed_state(
        &self,
        workflow: &Workflow,
        mut ctx: RuntimeContext,
        resume: ResumeState,
        options: &RunOptions,
    ) -> Result<RunState, FlowError> {
        if resume.workflow_id != workflow.id {
            return Err(FlowError::InvalidResume(format!(
                "snapshot belongs to workflow '{}', not '{}'",
                resume.workflow_id, workflow.id
            )));
        }
        if resume.next_index > resume.order.len() {
            return Err(FlowError::InvalidResume(format!(
                "next index {} is past the end of a {}-node order",
                resume.next_index,
                resume.order.len()
            )));
        }

        ctx.migrate_legacy_engine();
        let mut variables = resume.variables;
        let mut engine = resume.engine;
        engine.absorb_legacy(&mut variables);
        for (key, value) in ctx.variables {
            variables.insert(key, value);
        }
        engine.merge(ctx.engine);

        let call_stack = if resume.call_stack.is_empty() {
            vec![workflow.id.clone()]
        } else {
            resume.call_stack
        };

        Ok(RunState {
            execution_id: options.execution_id.unwrap_or_else(ExecutionId::new_v4),
            runtime: ctx.runtime,
            env: ctx.env,
            preview: ctx.preview,
            plan: ExecutionPlan::resumed(workflow, resume.order),
            cursor: resume.next_index,
            variables,
            engine,
            node_outputs: resume.node_outputs,
            text: resume.text,
            cleanup: resume.cleanup,
            next_menu: resume.next_menu,
            flow_output: None,
            call_stack,
            steps: 0,
            max_steps: self.step_limit(workflow, options),
        })
    }

    async fn run_loop(&self, workflow: &Workflow, mut state: RunState) -> Result<RunOutcome, FlowError> {
        let start = Instant::now();

        while state.cursor < state.plan.order.len() {
            state.steps += 1;
            if state.steps > state.max_steps {
                tracing::error!("Workflow {} hit the step limit of {}", workflow.id, state.max_steps);
                return Err(FlowError::StepLimit {
                    workflow_id: workflow.id.clone(),
                    max_steps: state.max_steps,
                });
            }

            let node_id = state.plan.order[state.cursor].clone();
            let node = workflow.find_node(&node_id).ok_or_else(|| {
                FlowError::InvalidResume(format!("node '{}' is not part of '{}'", node_id, workflow.id))
            })?;

            let run = self.execute_node(workflow, node, &state).await?;
            if let Some(pending) = self.apply_result(workflow, node, &mut state, run)? {
                tracing::info!(
                    "Workflow {} suspended at node {} ({} ancestor(s) waiting)",
                    workflow.id,
                    node_id,
                    pending.continuations.len()
                );
                return Ok(RunOutcome::Suspended(pending));
            }
        }

        tracing::info!(
            "Workflow {} completed in {}ms ({} steps)",
            workflow.id,
            start.elapsed().as_millis(),
            state.steps
        );
        Ok(RunOutcome::Completed(state.finish(workflow)))
    }

    /// Run one node through the invocation pipeline and trace it.
    async fn execute_node(
        &self,
        workflow: &Workflow,
        node: &NodeSpec,
        state: &RunState,
    ) -> Result<NodeRun, FlowError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let seeded = invoke::seed_params(workflow, node, &state.node_outputs);
        let render_ctx = invoke::render_context(
            node,
            &state.variables,
            &state.engine,
            &state.node_outputs,
            &state.runtime,
        );
        let mut params = invoke::render_params(seeded, &render_ctx);
        let policy = ExecutionPolicy::resolve(&mut params, &self.config.default_policy);

        let gate = invoke::evaluate_gate(node, &render_ctx, &params).map_err(|message| {
            tracing::error!("Condition on node {} is invalid: {}", node.id, message);
            FlowError::Condition {
                node_id: node.id.clone(),
                message,
            }
        })?;

        let mut record = TraceRecord {
            execution_id: state.execution_id,
            workflow_id: Some(workflow.id.clone()),
            node_id: Some(node.id.clone()),
            action_id: node.action_id.clone(),
            allowed: gate == Gate::Run,
            status: TraceStatus::Skipped,
            attempts: 0,
            started_at,
            duration_ms: 0,
            params: Value::Object(params.clone()),
            result: None,
            error: None,
        };

        if gate == Gate::Skip {
            tracing::debug!("Skipping node {} ({})", node.id, node.action_id);
            invoke::emit_trace(self.tracer.as_ref(), record).await;
            return Ok(NodeRun::Skipped);
        }

        tracing::debug!("Executing node {} ({})", node.id, node.action_id);
        let (result, attempts) = if node.action_id == SUB_WORKFLOW_ACTION {
            (self.run_sub_workflow(&params, state).await?, 1)
        } else {
            let mut ctx = ActionContext::new(state.execution_id, params);
            ctx.workflow_id = Some(workflow.id.clone());
            ctx.node_id = Some(node.id.clone());
            ctx.runtime = state.runtime.clone();
            ctx.env = state.env.clone();
            ctx.variables = state.variables.clone();
            ctx.preview = state.preview;
            invoke::dispatch(&self.registry, &node.action_id, &policy, ctx).await
        };

        record.attempts = attempts;
        record.duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                record.status = match outcome {
                    ActionOutcome::Suspend(_) | ActionOutcome::NestedPending(_) => {
                        TraceStatus::Suspended
                    }
                    _ => TraceStatus::Success,
                };
                record.result = Some(invoke::outcome_summary(outcome));
            }
            Err(e) => {
                tracing::warn!("Node {} failed: {}", node.id, e);
                record.status = TraceStatus::Failed;
                record.error = Some(e.to_string());
            }
        }
        invoke::emit_trace(self.tracer.as_ref(), record).await;

        Ok(NodeRun::Ran(result))
    }

    /// Route the result of a node. Returns a pending execution when the run
    /// has to stop here.
    fn apply_result(
        &self,
        workflow: &Workflow,
        node: &NodeSpec,
        state: &mut RunState,
        run: NodeRun,
    ) -> Result<Option<PendingExecution>, FlowError> {
        let outcome = match run {
            NodeRun::Skipped => {
                state.apply_output(&node.id, NodeOutput::new());
                state.cursor = state.plan.router.leave_try(
                    &mut state.engine,
                    &node.id,
                    state.cursor + 1,
                    &state.plan.order,
                    state.plan.positions(),
                );
                return Ok(None);
            }
            NodeRun::Ran(Ok(outcome)) => outcome,
            NodeRun::Ran(Err(e)) => {
                let message = e.to_string();
                match state.plan.router.recover(
                    &mut state.engine,
                    &node.id,
                    &message,
                    state.plan.positions(),
                ) {
                    Some(position) => {
                        tracing::info!(
                            "Node {} failed, continuing at catch position {}",
                            node.id,
                            position
                        );
                        state.cursor = position;
                        return Ok(None);
                    }
                    None => {
                        tracing::error!("Workflow {} failed at node {}: {}", workflow.id, node.id, e);
                        return Err(FlowError::node(node.id.clone(), e));
                    }
                }
            }
        };

        match outcome {
            ActionOutcome::Continue(output) => {
                state.apply_output(&node.id, output);
                self.advance(node, state, None);
                Ok(None)
            }
            ActionOutcome::Branch {
                output,
                flow_output,
            } => {
                state.apply_output(&node.id, output);
                self.advance(node, state, Some(&flow_output));
                state.flow_output = Some(flow_output);
                Ok(None)
            }
            ActionOutcome::Suspend(suspend) => Ok(Some(PendingExecution {
                workflow_id: workflow.id.clone(),
                node_id: node.id.clone(),
                suspend,
                resume: state.snapshot(&workflow.id, state.cursor + 1),
                continuations: ContinuationStack::new(),
            })),
            ActionOutcome::NestedPending(nested) => {
                let NestedPending { mut pending, meta } = *nested;
                pending.continuations.push(Continuation {
                    workflow_id: workflow.id.clone(),
                    node_id: node.id.clone(),
                    resume: state.snapshot(&workflow.id, state.cursor + 1),
                    meta,
                });
                Ok(Some(pending))
            }
        }
    }

    fn advance(&self, node: &NodeSpec, state: &mut RunState, flow_output: Option<&str>) {
        state
            .plan
            .router
            .register_try(&mut state.engine, &node.id, &node.action_id);
        let next = state.plan.router.next_index(
            &node.id,
            flow_output,
            state.cursor,
            state.plan.positions(),
        );
        state.cursor = state.plan.router.leave_try(
            &mut state.engine,
            &node.id,
            next,
            &state.plan.order,
            state.plan.positions(),
        );
    }

    fn execute_boxed<'a>(
        &'a self,
        workflow: &'a Workflow,
        ctx: RuntimeContext,
        options: RunOptions,
    ) -> BoxFuture<'a, Result<RunOutcome, FlowError>> {
        Box::pin(self.execute(workflow, ctx, options))
    }

    /// Run the child named by `workflow_id` with the parent's variables
    /// overlaid by `inputs`.
    async fn run_sub_workflow(
        &self,
        params: &Map,
        state: &RunState,
    ) -> Result<Result<ActionOutcome, NodeError>, FlowError> {
        let child_id = match params.get("workflow_id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                return Ok(Err(NodeError::Configuration(
                    "sub_workflow requires a workflow_id".to_string(),
                )))
            }
        };
        let meta = SubWorkflowMeta {
            child_workflow_id: child_id.clone(),
            propagate_error: params
                .get("propagate_error")
                .map(coerce_to_bool)
                .unwrap_or(false),
        };

        let Some(child) = self.store.workflow(&child_id).await? else {
            return Ok(Err(NodeError::Configuration(format!(
                "workflow '{}' not found",
                child_id
            ))));
        };

        let mut variables = state.variables.clone();
        if let Some(Value::Object(inputs)) = params.get("inputs") {
            for (key, value) in inputs {
                variables.insert(key.clone(), value.clone());
            }
        }
        let ctx = RuntimeContext {
            runtime: state.runtime.clone(),
            env: state.env.clone(),
            preview: state.preview,
            variables,
            engine: EngineState::default(),
        };
        let options = RunOptions {
            max_steps: None,
            call_stack: state.call_stack.clone(),
            execution_id: Some(state.execution_id),
        };

        let result = self.execute_boxed(&child, ctx, options).await;
        settle_child(result, meta)
    }
}

/// Translate a child run into the outcome of the sub-workflow node.
/// Only node failures stay inside the parent; every other error aborts it.
fn settle_child(
    result: Result<RunOutcome, FlowError>,
    meta: SubWorkflowMeta,
) -> Result<Result<ActionOutcome, NodeError>, FlowError> {
    match result {
        Ok(RunOutcome::Completed(summary)) => {
            let mut variables = summary.variables;
            variables.extend(summary.terminal.flattened);
            variables.insert("success".into(), Value::Bool(true));
            let output = NodeOutput {
                variables,
                text: (!summary.text.is_empty()).then(|| summary.text.join("\n")),
                next_menu: summary.next_menu,
                cleanup: summary.cleanup,
            };
            Ok(Ok(ActionOutcome::branch(output, "success")))
        }
        Ok(RunOutcome::Suspended(pending)) => Ok(Ok(ActionOutcome::NestedPending(Box::new(
            NestedPending { pending, meta },
        )))),
        Err(e @ FlowError::Node { .. }) => {
            let message = e.to_string();
            if meta.propagate_error {
                Ok(Err(NodeError::ChildWorkflowFailed {
                    workflow_id: meta.child_workflow_id,
                    message,
                }))
            } else {
                let output = NodeOutput::new()
                    .with_variable("success", false)
                    .with_variable("error", message);
                Ok(Ok(ActionOutcome::branch(output, "error")))
            }
        }
        Err(e) => Err(e),
    }
}
