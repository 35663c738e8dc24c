//! Topological sort of the control graph.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;

use crate::error::CompilerError;
use crate::parse::graph::ControlGraph;

/// Returns node IDs in topological order, ties broken by ascending node id.
pub fn topo_sort(graph: &ControlGraph) -> Result<Vec<String>, Vec<CompilerError>> {
    let mut in_degree: HashMap<&str, usize> = graph
        .node_indices
        .iter()
        .map(|(id, &idx)| {
            let degree = graph
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .count();
            (id.as_str(), degree)
        })
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        let idx = graph.node_indices[id];
        for child in graph.graph.neighbors_directed(idx, Direction::Outgoing) {
            let child_id = graph.graph[child].as_str();
            if let Some(d) = in_degree.get_mut(child_id) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(child_id);
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let stuck = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| *id)
            .min()
            .unwrap_or_default()
            .to_string();
        return Err(vec![CompilerError::lower(
            "L001",
            format!("Cycle detected at node '{}'", stuck),
            Some(stuck),
        )]);
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn graph(json: &str) -> ControlGraph {
        parse::parse_and_build(json).unwrap().1
    }

    #[test]
    fn ties_break_by_id() {
        let g = graph(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"c","type":"action","action":"x"},
                {"id":"b","type":"action","action":"x"},
                {"id":"a","type":"action","action":"x"}
            ],"controlEdges":[{"source":"c","target":"a"}]}"#,
        );
        assert_eq!(topo_sort(&g).unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn cycle_is_lowering_error() {
        let g = graph(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"a","type":"action","action":"x"},
                {"id":"b","type":"action","action":"x"}
            ],"controlEdges":[{"source":"a","target":"b"},{"source":"b","target":"a"}]}"#,
        );
        assert_eq!(topo_sort(&g).unwrap_err()[0].code, "L001");
    }
}
