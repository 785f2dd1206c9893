//! Standard action library
//!
//! Collection of built-in actions for common chat-bot operations

mod debug;
mod flow;
mod http;
mod time;
mod variables;

pub use debug::DebugLogAction;
pub use flow::{AwaitInputAction, TryCatchAction};
pub use http::HttpRequestAction;
pub use time::DelayAction;
pub use variables::{AppendTextAction, SetVariableAction};
use botruntime::ActionRegistry;

use std::sync::Arc;

/// Register all standard actions with a registry
pub fn register_all(registry: &mut ActionRegistry) {
    registry.register(Arc::new(variables::SetVariableAction));
    registry.register(Arc::new(variables::AppendTextAction));
    registry.register(Arc::new(flow::AwaitInputAction));
    registry.register(Arc::new(flow::TryCatchAction));
    registry.register(Arc::new(debug::DebugLogAction));
    registry.register(Arc::new(time::DelayAction));
    registry.register(Arc::new(http::HttpRequestAction::new()));
}

/// Context with the given params for handler unit tests.
#[cfg(test)]
pub(crate) fn test_context(params: serde_json::Value) -> botcore::ActionContext {
    botcore::ActionContext::new(
        botcore::ExecutionId::nil(),
        params.as_object().cloned().unwrap_or_default(),
    )
}
