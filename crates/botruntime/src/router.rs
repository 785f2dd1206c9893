//! Control-flow routing and try/catch recovery.

use crate::registry::TRY_CATCH_ACTION;
use botcore::{is_branch_port, CaughtError, EngineState, GraphError, NodeId, Workflow};
use std::collections::{HashMap, HashSet};

/// Branch table of one workflow: `(node, output) -> target`.
#[derive(Debug, Clone, Default)]
pub struct ControlRouter {
    branches: HashMap<(NodeId, String), NodeId>,
    /// Every control edge as `source -> [(output, target)]`.
    control: HashMap<NodeId, Vec<(String, NodeId)>>,
}

impl ControlRouter {
    /// Register every branch edge. In strict mode a `(node, output)` pair
    /// that leads to two different targets is rejected; otherwise the first
    /// registration wins.
    pub fn build(workflow: &Workflow, strict: bool) -> Result<Self, GraphError> {
        let mut branches: HashMap<(NodeId, String), NodeId> = HashMap::new();
        for edge in workflow.edges.iter().filter(|e| is_branch_port(&e.source_output)) {
            let key = (edge.source.clone(), edge.source_output.clone());
            match branches.get(&key) {
                Some(existing) if existing == &edge.target => {}
                Some(existing) if strict => {
                    return Err(GraphError::AmbiguousBranch {
                        node: edge.source.clone(),
                        output: edge.source_output.clone(),
                        first: existing.clone(),
                        second: edge.target.clone(),
                    });
                }
                Some(existing) => {
                    tracing::warn!(
                        "node {} output {} already routes to {}, ignoring {}",
                        edge.source,
                        edge.source_output,
                        existing,
                        edge.target
                    );
                }
                None => {
                    branches.insert(key, edge.target.clone());
                }
            }
        }
        let mut control: HashMap<NodeId, Vec<(String, NodeId)>> = HashMap::new();
        for edge in workflow.edges.iter().filter(|e| e.is_control()) {
            control
                .entry(edge.source.clone())
                .or_default()
                .push((edge.source_output.clone(), edge.target.clone()));
        }
        Ok(Self { branches, control })
    }

    /// Nodes reachable from `start` over control edges, `start` included.
    /// The edge `skip` is not followed.
    fn reachable(&self, start: &str, skip: Option<(&str, &str)>) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            for (output, target) in self.control.get(&node).into_iter().flatten() {
                if skip == Some((node.as_str(), output.as_str())) {
                    continue;
                }
                stack.push(target.clone());
            }
        }
        seen
    }

    /// Nodes that only the catch branch of `try_node` leads to.
    fn catch_region(&self, try_node: &str, catch_node: &str) -> HashSet<NodeId> {
        let guarded = self.reachable(try_node, Some((try_node, "catch")));
        self.reachable(catch_node, None)
            .into_iter()
            .filter(|node| !guarded.contains(node))
            .collect()
    }

    pub fn branch_target(&self, node: &str, output: &str) -> Option<&NodeId> {
        self.branches.get(&(node.to_string(), output.to_string()))
    }

    /// Push a handler frame when a try marker with a `catch` edge completes.
    pub fn register_try(&self, engine: &mut EngineState, node: &str, action_id: &str) {
        if action_id != TRY_CATCH_ACTION {
            return;
        }
        if let Some(catch) = self.branch_target(node, "catch") {
            tracing::debug!("try node {} registered catch target {}", node, catch);
            engine.push_handler(node, catch.clone());
        }
    }

    /// Cursor after a successful node: the branch target for `flow_output`
    /// when one is registered and scheduled, else the next position.
    pub fn next_index(
        &self,
        node: &str,
        flow_output: Option<&str>,
        cursor: usize,
        positions: &HashMap<NodeId, usize>,
    ) -> usize {
        flow_output
            .and_then(|output| self.branch_target(node, output))
            .and_then(|target| positions.get(target).copied())
            .unwrap_or(cursor + 1)
    }

    /// Close the innermost try region when a successful step would run into
    /// its catch node: pop the frame and move `next` past the catch region.
    pub fn leave_try(
        &self,
        engine: &mut EngineState,
        node: &str,
        next: usize,
        order: &[NodeId],
        positions: &HashMap<NodeId, usize>,
    ) -> usize {
        let Some(frame) = engine.handler_stack.last() else {
            return next;
        };
        if frame.try_node == node || positions.get(&frame.catch_node) != Some(&next) {
            return next;
        }
        let Some(frame) = engine.pop_handler() else {
            return next;
        };

        let region = self.catch_region(&frame.try_node, &frame.catch_node);
        let mut cursor = next;
        while cursor < order.len() && region.contains(&order[cursor]) {
            cursor += 1;
        }
        tracing::debug!(
            "try region of {} completed, skipping catch {} to position {}",
            frame.try_node,
            frame.catch_node,
            cursor
        );
        cursor
    }

    /// Pop the newest handler frame and, when its catch node is scheduled,
    /// record the failure and return the catch position.
    pub fn recover(
        &self,
        engine: &mut EngineState,
        failed_node: &str,
        message: &str,
        positions: &HashMap<NodeId, usize>,
    ) -> Option<usize> {
        let frame = engine.pop_handler()?;
        let position = positions.get(&frame.catch_node).copied()?;
        engine.last_error = Some(CaughtError {
            message: message.to_string(),
            node_id: failed_node.to_string(),
            try_node_id: frame.try_node,
        });
        Some(position)
    }
}
