use async_trait::async_trait;
use botcore::{ExecutionId, FlowError, PendingExecution, Workflow, WorkflowId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence collaborator for workflow definitions and suspended runs.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn workflow(&self, id: &str) -> Result<Option<Workflow>, FlowError>;

    async fn save_workflow(&self, workflow: Workflow) -> Result<(), FlowError>;

    async fn save_pending(
        &self,
        execution_id: ExecutionId,
        pending: PendingExecution,
    ) -> Result<(), FlowError>;

    /// Remove and return a parked execution.
    async fn take_pending(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<PendingExecution>, FlowError>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    pending: RwLock<HashMap<ExecutionId, PendingExecution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn workflow(&self, id: &str) -> Result<Option<Workflow>, FlowError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: Workflow) -> Result<(), FlowError> {
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn save_pending(
        &self,
        execution_id: ExecutionId,
        pending: PendingExecution,
    ) -> Result<(), FlowError> {
        self.pending.write().await.insert(execution_id, pending);
        Ok(())
    }

    async fn take_pending(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<PendingExecution>, FlowError> {
        Ok(self.pending.write().await.remove(&execution_id))
    }
}
