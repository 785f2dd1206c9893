//! Execution ordering.

use crate::router::ControlRouter;
use botcore::{Edge, GraphError, NodeId, Workflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// A validated workflow ready to run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub order: Vec<NodeId>,
    pub control_bus: bool,
    pub router: ControlRouter,
    positions: HashMap<NodeId, usize>,
}

impl ExecutionPlan {
    /// Validate `workflow` and compute its execution order.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        validate_references(workflow)?;
        let router = ControlRouter::build(workflow, true)?;
        let order = execution_order(workflow)?;
        Ok(Self::with_order(workflow, order, router))
    }

    /// Rebuild a plan around a previously computed order without checks.
    pub fn resumed(workflow: &Workflow, order: Vec<NodeId>) -> Self {
        let router = ControlRouter::build(workflow, false).unwrap_or_default();
        Self::with_order(workflow, order, router)
    }

    fn with_order(workflow: &Workflow, order: Vec<NodeId>, router: ControlRouter) -> Self {
        let positions = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            order,
            control_bus: workflow.is_control_bus(),
            router,
            positions,
        }
    }

    pub fn positions(&self) -> &HashMap<NodeId, usize> {
        &self.positions
    }

    pub fn position_of(&self, node: &str) -> Option<usize> {
        self.positions.get(node).copied()
    }
}

fn validate_references(workflow: &Workflow) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }
    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(GraphError::UnknownNode {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Edges that constrain ordering: control edges in control-bus mode,
/// otherwise plain data edges.
fn orders_execution(edge: &Edge, control_bus: bool) -> bool {
    edge.is_control() == control_bus
}

/// Kahn's algorithm over the ordering edges. Ready nodes are taken in
/// declaration order; anything left over is part of (or behind) a cycle.
pub fn execution_order(workflow: &Workflow) -> Result<Vec<NodeId>, GraphError> {
    let control_bus = workflow.is_control_bus();
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut node_to_index: HashMap<&str, NodeIndex> = HashMap::new();

    for node in &workflow.nodes {
        let idx = graph.add_node(node.id.as_str());
        node_to_index.insert(node.id.as_str(), idx);
    }

    for edge in workflow.edges.iter().filter(|e| orders_execution(e, control_bus)) {
        if let (Some(&from), Some(&to)) = (
            node_to_index.get(edge.source.as_str()),
            node_to_index.get(edge.target.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();

    let mut order = Vec::with_capacity(workflow.nodes.len());
    while let Some(idx) = ready.pop_front() {
        order.push(graph[idx].to_string());
        let mut successors: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Outgoing).collect();
        successors.sort();
        for next in successors {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() < workflow.nodes.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let nodes = workflow
            .nodes
            .iter()
            .filter(|n| !ordered.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        return Err(GraphError::Cycle { nodes });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use botcore::{NodeSpec, CONTROL_OUTPUT};

    fn workflow(ids: &[&str]) -> Workflow {
        let mut wf = Workflow::new("wf", "test");
        for id in ids {
            wf.add_node(NodeSpec::new(*id, "noop"));
        }
        wf
    }

    #[test]
    fn data_edges_order_nodes() {
        let mut wf = workflow(&["c", "b", "a"]);
        wf.connect("a", "out", "b", "in");
        wf.connect("b", "out", "c", "in");
        assert_eq!(execution_order(&wf).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let wf = workflow(&["x", "y", "z"]);
        assert_eq!(execution_order(&wf).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn control_bus_ignores_data_edges_for_ordering() {
        let mut wf = workflow(&["1", "2", "3"]);
        wf.connect_control("3", CONTROL_OUTPUT, "1");
        wf.connect_control("1", CONTROL_OUTPUT, "2");
        // Would force 2 before 3 if data edges counted.
        wf.connect("2", "value", "3", "value");
        assert_eq!(execution_order(&wf).unwrap(), vec!["3", "1", "2"]);
    }

    #[test]
    fn cycle_names_every_unresolved_node() {
        let mut wf = workflow(&["start", "a", "b"]);
        wf.connect("a", "out", "b", "in");
        wf.connect("b", "out", "a", "in");
        let err = execution_order(&wf).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                nodes: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn plan_rejects_unknown_and_duplicate_nodes() {
        let mut wf = workflow(&["a"]);
        wf.connect("a", "out", "ghost", "in");
        assert!(matches!(
            ExecutionPlan::build(&wf),
            Err(GraphError::UnknownNode { .. })
        ));

        let dup = workflow(&["a", "a"]);
        assert_eq!(
            ExecutionPlan::build(&dup).unwrap_err(),
            GraphError::DuplicateNode("a".into())
        );
    }

    #[test]
    fn plan_positions() {
        let mut wf = workflow(&["b", "a"]);
        wf.connect("a", "out", "b", "in");
        let plan = ExecutionPlan::build(&wf).unwrap();
        assert_eq!(plan.position_of("a"), Some(0));
        assert_eq!(plan.position_of("b"), Some(1));
        assert!(!plan.control_bus);
    }
}
