use async_trait::async_trait;
use botcore::{to_text, ActionContext, ActionHandler, ActionOutcome, NodeError, NodeOutput};

/// Simple debug action that logs its params
pub struct DebugLogAction;

#[async_trait]
impl ActionHandler for DebugLogAction {
    fn action_id(&self) -> &str {
        "debug.log"
    }

    fn description(&self) -> &str {
        "Logs params for debugging"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let message = ctx
            .params
            .get("message")
            .map(to_text)
            .unwrap_or_else(|| "(no message)".to_string());

        tracing::info!(node = ?ctx.node_id, "DEBUG: {}", message);

        // Also log all params for visibility
        for (key, value) in &ctx.params {
            tracing::debug!("  {}: {}", key, value);
        }

        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("message", message),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context as ctx;
    use serde_json::json;

    #[tokio::test]
    async fn echoes_message() {
        let outcome = DebugLogAction
            .execute(ctx(json!({"message": {"a": 1}})))
            .await
            .unwrap();
        assert_eq!(outcome.output().unwrap().variables["message"], json!("{\"a\":1}"));
    }
}
