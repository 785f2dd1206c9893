use async_trait::async_trait;
use botcore::{to_number, ActionContext, ActionHandler, ActionOutcome, NodeError, NodeOutput};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration
pub struct DelayAction;

#[async_trait]
impl ActionHandler for DelayAction {
    fn action_id(&self) -> &str {
        "time.delay"
    }

    fn description(&self) -> &str {
        "Delay execution for specified milliseconds"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let delay_ms = match ctx.params.get("delay_ms") {
            None => DEFAULT_DELAY_MS,
            Some(value) => match to_number(value) {
                Some(ms) if ms.is_finite() && ms >= 0.0 => ms as u64,
                _ => {
                    return Err(NodeError::InvalidInputType {
                        field: "delay_ms".to_string(),
                        expected: "non-negative number".to_string(),
                        actual: value.to_string(),
                    })
                }
            },
        };

        if ctx.preview {
            tracing::debug!("Preview run, skipping {}ms delay", delay_ms);
        } else {
            tracing::debug!("Delaying for {}ms", delay_ms);
            sleep(Duration::from_millis(delay_ms)).await;
        }

        Ok(ActionOutcome::Continue(
            NodeOutput::new().with_variable("delayed_ms", delay_ms),
        ))
    }
}
