use botcore::{ActionHandler, ActionKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Action id the engine runs as a nested workflow call.
pub const SUB_WORKFLOW_ACTION: &str = "sub_workflow";
/// Action id of the try/catch marker node.
pub const TRY_CATCH_ACTION: &str = "try_catch";

/// Metadata about an action for listings
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    pub action_id: String,
    pub kind: ActionKind,
    pub description: String,
}

/// Registry of available action handlers
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own action id. A later registration for
    /// the same id replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let action_id = handler.action_id().to_string();
        tracing::info!("Registering action: {} ({})", action_id, handler.kind());
        self.handlers.insert(action_id, handler);
    }

    pub fn get(&self, action_id: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_id)
    }

    /// Dispatch family of an action id, `None` when unknown.
    pub fn kind_of(&self, action_id: &str) -> Option<ActionKind> {
        if action_id == SUB_WORKFLOW_ACTION {
            return Some(ActionKind::Workflow);
        }
        self.handlers.get(action_id).map(|h| h.kind())
    }

    /// Get all registered action ids, sorted
    pub fn list_actions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_metadata(&self, action_id: &str) -> Option<ActionMetadata> {
        self.handlers.get(action_id).map(|h| ActionMetadata {
            action_id: action_id.to_string(),
            kind: h.kind(),
            description: h.description().to_string(),
        })
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
