use botcore::{Map, NodeId, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outputs of the last-mile nodes of a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TerminalOutputs {
    pub by_node: BTreeMap<NodeId, Map>,
    /// `terminal_<node>__<output>` keys for ancestor workflows.
    pub flattened: Map,
}

/// Replace anything outside `[A-Za-z0-9_]` with `_` and collapse runs of `_`.
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

pub fn terminal_key(node_id: &str, output: &str) -> String {
    format!("terminal_{}__{}", sanitize_key(node_id), sanitize_key(output))
}

fn is_reserved(field: &str) -> bool {
    field.starts_with("__")
}

/// Collect outputs of nodes without an outgoing control edge, or of every
/// node that produced output when no such node exists.
pub fn collect_terminal_outputs(
    workflow: &Workflow,
    node_outputs: &BTreeMap<NodeId, Map>,
) -> TerminalOutputs {
    let terminals: Vec<&NodeId> = workflow
        .nodes
        .iter()
        .filter(|n| !workflow.has_outgoing_control(&n.id))
        .map(|n| &n.id)
        .collect();

    let sources: Vec<&NodeId> = if terminals.is_empty() {
        node_outputs.keys().collect()
    } else {
        terminals
    };

    let mut collected = TerminalOutputs::default();
    for node_id in sources {
        let Some(outputs) = node_outputs.get(node_id) else {
            continue;
        };
        let visible: Map = outputs
            .iter()
            .filter(|(k, _)| !is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (field, value) in &visible {
            collected
                .flattened
                .insert(terminal_key(node_id, field), value.clone());
        }
        collected.by_node.insert(node_id.clone(), visible);
    }
    collected
}
