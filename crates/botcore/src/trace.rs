use crate::error::TraceError;
use crate::value::Value;
use crate::workflow::{NodeId, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// How a node invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Skipped,
    Failed,
    Suspended,
}

/// One structured record per node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub execution_id: ExecutionId,
    pub workflow_id: Option<WorkflowId>,
    pub node_id: Option<NodeId>,
    pub action_id: String,
    /// False when the condition gate skipped the node.
    pub allowed: bool,
    pub status: TraceStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Best-effort sink for trace records.
#[async_trait]
pub trait Tracer: Send + Sync {
    async fn record(&self, record: TraceRecord) -> Result<(), TraceError>;
}

/// Discards every record.
pub struct NoopTracer;

#[async_trait]
impl Tracer for NoopTracer {
    async fn record(&self, _record: TraceRecord) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Writes records to the `tracing` subscriber at debug level.
pub struct LogTracer;

#[async_trait]
impl Tracer for LogTracer {
    async fn record(&self, record: TraceRecord) -> Result<(), TraceError> {
        tracing::debug!(
            execution_id = %record.execution_id,
            node_id = ?record.node_id,
            action_id = %record.action_id,
            status = ?record.status,
            attempts = record.attempts,
            duration_ms = record.duration_ms,
            error = ?record.error,
            "node trace"
        );
        Ok(())
    }
}

/// Broadcasts trace records to any number of subscribers
pub struct TraceBus {
    sender: broadcast::Sender<TraceRecord>,
}

impl TraceBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceRecord> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Tracer for TraceBus {
    async fn record(&self, record: TraceRecord) -> Result<(), TraceError> {
        // No subscribers is not an error.
        let _ = self.sender.send(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TraceRecord {
        TraceRecord {
            execution_id: Uuid::new_v4(),
            workflow_id: Some("wf".into()),
            node_id: Some("a".into()),
            action_id: "set_variable".into(),
            allowed: true,
            status: TraceStatus::Success,
            attempts: 1,
            started_at: Utc::now(),
            duration_ms: 0,
            params: Value::Null,
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = TraceBus::new(8);
        let mut rx = bus.subscribe();
        bus.record(record()).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.node_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn bus_without_subscribers_is_fine() {
        let bus = TraceBus::new(8);
        assert!(bus.record(record()).await.is_ok());
    }
}
