use async_trait::async_trait;
use botcore::{to_text, ActionContext, ActionHandler, ActionOutcome, NodeError, NodeOutput, SuspendSpec};
use botruntime::TRY_CATCH_ACTION;

const DEFAULT_INPUT_VARIABLE: &str = "user_input";

/// Halts the run until the user replies
pub struct AwaitInputAction;

#[async_trait]
impl ActionHandler for AwaitInputAction {
    fn action_id(&self) -> &str {
        "await_input"
    }

    fn description(&self) -> &str {
        "Wait for the next user message and store it in a variable"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let mut spec = SuspendSpec::new("await_input");
        spec.prompt = ctx.params.get("prompt").map(to_text).filter(|p| !p.is_empty());
        spec.variable = Some(
            ctx.params
                .get("variable")
                .map(to_text)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INPUT_VARIABLE.to_string()),
        );
        if let Some(data) = ctx.params.get("data") {
            spec.data = data.clone();
        }
        Ok(ActionOutcome::Suspend(spec))
    }
}

/// Marks the start of a guarded region. Its `catch` edge names the
/// handler, its `try` edge the first guarded node.
pub struct TryCatchAction;

#[async_trait]
impl ActionHandler for TryCatchAction {
    fn action_id(&self) -> &str {
        TRY_CATCH_ACTION
    }

    fn description(&self) -> &str {
        "Route failures of the try branch to the catch branch"
    }

    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        Ok(ActionOutcome::branch(NodeOutput::new(), "try"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context as ctx;
    use serde_json::json;

    #[tokio::test]
    async fn await_input_defaults_the_variable() {
        let outcome = AwaitInputAction
            .execute(ctx(json!({"prompt": "Your name?"})))
            .await
            .unwrap();
        match outcome {
            ActionOutcome::Suspend(spec) => {
                assert_eq!(spec.reason, "await_input");
                assert_eq!(spec.prompt.as_deref(), Some("Your name?"));
                assert_eq!(spec.variable.as_deref(), Some("user_input"));
            }
            other => panic!("expected suspension, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn try_catch_enters_try_branch() {
        let outcome = TryCatchAction.execute(ctx(json!({}))).await.unwrap();
        assert_eq!(outcome.flow_output(), Some("try"));
    }
}
