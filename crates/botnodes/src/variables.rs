use async_trait::async_trait;
use botcore::{to_text, ActionContext, ActionHandler, ActionOutcome, NodeError, NodeOutput, Value};

/// Stores `value` under `variable_name`
pub struct SetVariableAction;

#[async_trait]
impl ActionHandler for SetVariableAction {
    fn action_id(&self) -> &str {
        "set_variable"
    }

    fn description(&self) -> &str {
        "Set a workflow variable"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let name = ctx.require_str("variable_name")?.trim().to_string();
        if name.is_empty() {
            return Err(NodeError::Configuration(
                "variable_name must not be empty".to_string(),
            ));
        }
        let value = ctx.get_param_or("value", Value::Null);

        tracing::debug!("set_variable {} = {}", name, value);

        Ok(ActionOutcome::Continue(
            NodeOutput::new()
                .with_variable("variable_name", name.clone())
                .with_variable("value", value.clone())
                .with_variable(name, value),
        ))
    }
}

/// Queues a text reply for the chat
pub struct AppendTextAction;

#[async_trait]
impl ActionHandler for AppendTextAction {
    fn action_id(&self) -> &str {
        "append_text"
    }

    fn description(&self) -> &str {
        "Append a text message to the reply"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let text = to_text(ctx.require_param("text")?);
        let mut output = NodeOutput::new()
            .with_variable("text", text.clone())
            .with_text(text);
        if let Some(menu) = ctx.params.get("next_menu").and_then(Value::as_str) {
            output = output.with_next_menu(menu);
        }
        Ok(ActionOutcome::Continue(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context as ctx;
    use serde_json::json;

    #[tokio::test]
    async fn set_variable_exposes_name_and_value() {
        let outcome = SetVariableAction
            .execute(ctx(json!({"variable_name": "x", "value": 5})))
            .await
            .unwrap();
        let output = outcome.output().unwrap();
        assert_eq!(output.variables["variable_name"], json!("x"));
        assert_eq!(output.variables["value"], json!(5));
        assert_eq!(output.variables["x"], json!(5));
    }

    #[tokio::test]
    async fn set_variable_requires_a_name() {
        let err = SetVariableAction
            .execute(ctx(json!({"value": 5})))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::MissingInput("variable_name".into()));
    }

    #[tokio::test]
    async fn append_text_sets_reply_and_menu() {
        let outcome = AppendTextAction
            .execute(ctx(json!({"text": "Hello", "next_menu": "main"})))
            .await
            .unwrap();
        let output = outcome.output().unwrap();
        assert_eq!(output.text.as_deref(), Some("Hello"));
        assert_eq!(output.next_menu.as_deref(), Some("main"));
    }
}
