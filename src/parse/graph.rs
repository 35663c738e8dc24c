//! petgraph-based control-edge graph for the authored workflow.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::types::GraphDocument;
use crate::error::CompilerError;

/// Edge weight: the branch label on condition successors.
pub type EdgeLabel = Option<bool>;

pub struct ControlGraph {
    pub graph: DiGraph<String, EdgeLabel>,
    pub node_indices: HashMap<String, NodeIndex>,
}

impl ControlGraph {
    pub fn build(document: &GraphDocument) -> Result<Self, Vec<CompilerError>> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        let mut errors = Vec::new();

        for node in &document.nodes {
            if node_indices.contains_key(&node.id) {
                // Duplicates are reported by validation (V001).
                continue;
            }
            let idx = graph.add_node(node.id.clone());
            node_indices.insert(node.id.clone(), idx);
        }

        for edge in &document.control_edges {
            let source_idx = node_indices.get(&edge.source);
            let target_idx = node_indices.get(&edge.target);

            match (source_idx, target_idx) {
                (Some(&s), Some(&t)) => {
                    graph.add_edge(s, t, edge.branch);
                }
                (None, _) => {
                    errors.push(CompilerError::parse(
                        "P002",
                        format!(
                            "Control edge '{}' -> '{}' references unknown source node '{}'",
                            edge.source, edge.target, edge.source
                        ),
                    ));
                }
                (_, None) => {
                    errors.push(CompilerError::parse(
                        "P002",
                        format!(
                            "Control edge '{}' -> '{}' references unknown target node '{}'",
                            edge.source, edge.target, edge.target
                        ),
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ControlGraph {
            graph,
            node_indices,
        })
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_indices.contains_key(node_id)
    }

    /// Outgoing edges as `(target, branch)`, sorted for stable iteration.
    pub fn successors(&self, node_id: &str) -> Vec<(&str, EdgeLabel)> {
        let Some(&idx) = self.node_indices.get(node_id) else {
            return vec![];
        };
        let mut out: Vec<(&str, EdgeLabel)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].as_str(), *e.weight()))
            .collect();
        out.sort();
        out
    }

    /// Incoming edges as `(source, branch)`, sorted for stable iteration.
    pub fn predecessors(&self, node_id: &str) -> Vec<(&str, EdgeLabel)> {
        let Some(&idx) = self.node_indices.get(node_id) else {
            return vec![];
        };
        let mut out: Vec<(&str, EdgeLabel)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].as_str(), *e.weight()))
            .collect();
        out.sort();
        out
    }

    pub fn incoming_count(&self, node_id: &str) -> usize {
        self.predecessors(node_id).len()
    }

    pub fn outgoing_count(&self, node_id: &str) -> usize {
        self.successors(node_id).len()
    }

    /// Every node with a control path into `node_id` (excluding itself unless
    /// it sits on a cycle).
    pub fn ancestors(&self, node_id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.node_indices.get(node_id) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for parent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if seen.insert(self.graph[parent].clone()) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    /// Depth-first search with recursion-stack marking. Returns the first
    /// cycle found as a closed path (`[a, b, a]`), visiting roots in id order.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut ids: Vec<&String> = self.node_indices.keys().collect();
        ids.sort();

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut path: Vec<NodeIndex> = Vec::new();

        for id in ids {
            let root = self.node_indices[id];
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS: each frame holds the node and its sorted children.
            let mut frames: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
            marks[root.index()] = Mark::OnStack;
            path.push(root);
            frames.push((root, self.sorted_children(root)));

            while let Some((node, children)) = frames.last_mut() {
                let node = *node;
                match children.pop() {
                    Some(child) => match marks[child.index()] {
                        Mark::OnStack => {
                            let start = path.iter().position(|&n| n == child).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|&n| self.graph[n].clone()).collect();
                            cycle.push(self.graph[child].clone());
                            return Some(cycle);
                        }
                        Mark::Unvisited => {
                            marks[child.index()] = Mark::OnStack;
                            path.push(child);
                            frames.push((child, self.sorted_children(child)));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        path.pop();
                        frames.pop();
                    }
                }
            }
        }

        None
    }

    /// Children in reverse id order, so popping yields ascending ids.
    fn sorted_children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        children.sort_by(|a, b| self.graph[*b].cmp(&self.graph[*a]));
        children.dedup();
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::types::{ControlEdge, GraphDocument, GraphNode, NodeBody};

    fn doc(ids: &[&str], edges: &[(&str, &str)]) -> GraphDocument {
        GraphDocument {
            id: "wf".into(),
            name: "wf".into(),
            description: None,
            version: "1".into(),
            inputs: vec![],
            outputs: Default::default(),
            nodes: ids
                .iter()
                .map(|id| GraphNode {
                    id: id.to_string(),
                    label: None,
                    body: NodeBody::Action {
                        action: "noop".into(),
                    },
                    params: Default::default(),
                    inputs: Default::default(),
                    compensation: None,
                    runtime: None,
                    task_queue: None,
                    timeout_ms: None,
                })
                .collect(),
            control_edges: edges
                .iter()
                .map(|(s, t)| ControlEdge {
                    source: s.to_string(),
                    target: t.to_string(),
                    branch: None,
                })
                .collect(),
            data_edges: vec![],
        }
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let g = ControlGraph::build(&doc(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]))
            .unwrap();
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn cycle_path_is_closed() {
        let g = ControlGraph::build(&doc(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]))
            .unwrap();
        assert_eq!(g.find_cycle().unwrap(), vec!["b", "c", "b"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = ControlGraph::build(&doc(&["a"], &[("a", "a")])).unwrap();
        assert_eq!(g.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn ancestors_are_transitive() {
        let g = ControlGraph::build(&doc(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c")])).unwrap();
        let anc: Vec<String> = g.ancestors("c").into_iter().collect();
        assert_eq!(anc, vec!["a", "b"]);
        assert!(g.ancestors("d").is_empty());
    }

    #[test]
    fn unknown_edge_endpoint_is_p002() {
        let errors = ControlGraph::build(&doc(&["a"], &[("a", "ghost")])).err().unwrap();
        assert_eq!(errors[0].code, "P002");
    }
}
