use crate::value::{Map, Value};
use serde::{Deserialize, Serialize};

pub type WorkflowId = String;
pub type NodeId = String;

/// Input port that puts a workflow into control-bus mode when targeted.
pub const CONTROL_INPUT: &str = "control_input";
/// Generic sequencing output used alongside [`CONTROL_INPUT`].
pub const CONTROL_OUTPUT: &str = "control_output";

const CONTROL_TOKENS: [&str; 9] = [
    "true", "false", "loop", "done", "try", "catch", "success", "error", "default",
];

/// Whether a port name is a flow-control token rather than a data port.
pub fn is_control_port(name: &str) -> bool {
    CONTROL_TOKENS.contains(&name)
        || name.starts_with("case_")
        || name == CONTROL_INPUT
        || name == CONTROL_OUTPUT
}

/// Whether a control port selects a branch (as opposed to plain sequencing).
pub fn is_branch_port(name: &str) -> bool {
    is_control_port(name) && name != CONTROL_INPUT && name != CONTROL_OUTPUT
}

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Wire `source.output` into `target.input`.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_output: impl Into<String>,
        target: impl Into<NodeId>,
        target_input: impl Into<String>,
    ) -> &mut Edge {
        let id = format!("e{}", self.edges.len() + 1);
        self.edges.push(Edge {
            id,
            source: source.into(),
            source_output: source_output.into(),
            path: None,
            target: target.into(),
            target_input: target_input.into(),
        });
        let last = self.edges.len() - 1;
        &mut self.edges[last]
    }

    /// Wire a control output of `source` into the control input of `target`.
    pub fn connect_control(
        &mut self,
        source: impl Into<NodeId>,
        source_output: impl Into<String>,
        target: impl Into<NodeId>,
    ) -> &mut Edge {
        self.connect(source, source_output, target, CONTROL_INPUT)
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Control-bus mode: some edge targets a control input.
    pub fn is_control_bus(&self) -> bool {
        self.edges.iter().any(|e| e.target_input == CONTROL_INPUT)
    }

    pub fn incoming<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node)
    }

    pub fn outgoing<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node)
    }

    pub fn has_outgoing_control(&self, node: &str) -> bool {
        self.outgoing(node).any(Edge::is_control)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub action_id: String,
    #[serde(default)]
    pub config: Map,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, action_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_id: action_id.into(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Connection between two node ports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub source_output: String,
    /// Narrows the upstream value before it reaches `target_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub target: NodeId,
    pub target_input: String,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        is_control_port(&self.source_output) || is_control_port(&self.target_input)
    }

    pub fn with_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }
}

/// Per-workflow execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub max_steps: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_control_ports() {
        assert!(is_control_port("catch"));
        assert!(is_control_port("case_1"));
        assert!(is_control_port(CONTROL_OUTPUT));
        assert!(!is_control_port("value"));
        assert!(is_branch_port("true"));
        assert!(!is_branch_port(CONTROL_OUTPUT));
    }

    #[test]
    fn control_bus_mode_requires_control_input_target() {
        let mut wf = Workflow::new("wf", "test");
        wf.add_node(NodeSpec::new("a", "noop"));
        wf.add_node(NodeSpec::new("b", "noop"));
        wf.connect("a", "true", "b", "value");
        assert!(!wf.is_control_bus());
        assert!(wf.edges[0].is_control());

        wf.connect_control("a", CONTROL_OUTPUT, "b");
        assert!(wf.is_control_bus());
    }

    #[test]
    fn deserializes_minimal_definition() {
        let wf: Workflow = serde_json::from_str(
            r#"{"id":"w","name":"n","nodes":[{"id":"a","action_id":"set_variable"}]}"#,
        )
        .unwrap();
        assert!(wf.edges.is_empty());
        assert_eq!(wf.nodes[0].config.len(), 0);
        assert_eq!(wf.settings.max_steps, None);
    }
}
