//! Graph-level structural validation rules (V001–V010).

use std::collections::{HashMap, HashSet};

use crate::error::CompilerError;
use crate::ir::types::state_name;
use crate::lower::reference::{INDEX_ROOT, INPUT_ROOT, ITEM_ROOT};
use crate::parse::graph::ControlGraph;
use crate::parse::types::GraphDocument;

/// Run all structural validation rules. Returns all errors found.
pub fn validate_structural(doc: &GraphDocument, graph: &ControlGraph) -> Vec<CompilerError> {
    let mut errors = Vec::new();

    v001_unique_node_ids(doc, &mut errors);
    v002_data_edges_reference_existing_nodes(doc, graph, &mut errors);
    v003_no_duplicate_control_edges(doc, &mut errors);
    v004_no_cycles(graph, &mut errors);
    v005_has_nodes(doc, &mut errors);
    v006_condition_has_two_branches(doc, graph, &mut errors);
    v007_branch_labels_only_on_conditions(doc, &mut errors);
    v008_unique_state_names(doc, &mut errors);
    v009_node_id_charset(doc, &mut errors);
    v010_reserved_node_ids(doc, &mut errors);

    errors
}

fn v001_unique_node_ids(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    let mut seen = HashSet::new();
    for node in &doc.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(CompilerError::validate(
                "V001",
                format!("Duplicate node ID '{}'", node.id),
                Some(node.id.clone()),
            ));
        }
    }
}

fn v002_data_edges_reference_existing_nodes(
    doc: &GraphDocument,
    graph: &ControlGraph,
    errors: &mut Vec<CompilerError>,
) {
    for edge in &doc.data_edges {
        if !graph.contains(&edge.source) {
            errors.push(CompilerError::validate(
                "V002",
                format!(
                    "Data edge '{}.{}' -> '{}.{}' references unknown source node '{}'",
                    edge.source, edge.source_port, edge.target, edge.target_port, edge.source
                ),
                None,
            ));
        }
        if !graph.contains(&edge.target) {
            errors.push(CompilerError::validate(
                "V002",
                format!(
                    "Data edge '{}.{}' -> '{}.{}' references unknown target node '{}'",
                    edge.source, edge.source_port, edge.target, edge.target_port, edge.target
                ),
                None,
            ));
        }
    }
}

fn v003_no_duplicate_control_edges(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    let mut seen = HashSet::new();
    for edge in &doc.control_edges {
        if !seen.insert((&edge.source, &edge.target, edge.branch)) {
            errors.push(CompilerError::validate(
                "V003",
                format!(
                    "Duplicate control edge from '{}' to '{}'",
                    edge.source, edge.target
                ),
                Some(edge.source.clone()),
            ));
        }
    }
}

fn v004_no_cycles(graph: &ControlGraph, errors: &mut Vec<CompilerError>) {
    if let Some(cycle) = graph.find_cycle() {
        errors.push(CompilerError::validate(
            "V004",
            format!("Control edges contain a cycle: {}", cycle.join(" -> ")),
            cycle.first().cloned(),
        ));
    }
}

fn v005_has_nodes(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    if doc.nodes.is_empty() {
        errors.push(CompilerError::validate(
            "V005",
            "Workflow must contain at least one node",
            None,
        ));
    }
}

fn v006_condition_has_two_branches(
    doc: &GraphDocument,
    graph: &ControlGraph,
    errors: &mut Vec<CompilerError>,
) {
    for node in doc.nodes.iter().filter(|n| n.is_condition()) {
        let successors = graph.successors(&node.id);
        let labels: Vec<Option<bool>> = successors.iter().map(|(_, b)| *b).collect();
        let valid = successors.len() == 2
            && labels.contains(&Some(true))
            && labels.contains(&Some(false));
        if !valid {
            errors.push(CompilerError::validate(
                "V006",
                format!(
                    "Condition node '{}' must have exactly two successors labelled true and false, found {}",
                    node.id,
                    successors.len()
                ),
                Some(node.id.clone()),
            ));
        }
    }
}

fn v007_branch_labels_only_on_conditions(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    let conditions: HashSet<&str> = doc
        .nodes
        .iter()
        .filter(|n| n.is_condition())
        .map(|n| n.id.as_str())
        .collect();
    for edge in &doc.control_edges {
        if edge.branch.is_some() && !conditions.contains(edge.source.as_str()) {
            errors.push(CompilerError::validate(
                "V007",
                format!(
                    "Edge '{}' -> '{}' carries a branch label but '{}' is not a condition node",
                    edge.source, edge.target, edge.source
                ),
                Some(edge.source.clone()),
            ));
        }
    }
}

fn v008_unique_state_names(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for node in &doc.nodes {
        let state = state_name(&node.id);
        match seen.get(&state) {
            Some(&other) if other != node.id => errors.push(CompilerError::validate(
                "V008",
                format!(
                    "Nodes '{}' and '{}' both derive state name '{}'",
                    other, node.id, state
                ),
                Some(node.id.clone()),
            )),
            Some(_) => {}
            None => {
                seen.insert(state, &node.id);
            }
        }
    }
}

/// Node ids are embedded in activity, timer and child-run ids, which use
/// `#`, `@`, `:` and `/` as separators.
fn v009_node_id_charset(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    for node in &doc.nodes {
        if node.id.is_empty() || !node.id.chars().all(valid) {
            errors.push(CompilerError::validate(
                "V009",
                format!(
                    "Node ID '{}' may only contain letters, digits, '_', '-' and '.'",
                    node.id
                ),
                Some(node.id.clone()),
            ));
        }
    }
}

fn v010_reserved_node_ids(doc: &GraphDocument, errors: &mut Vec<CompilerError>) {
    for node in &doc.nodes {
        let root = node.id.split('.').next().unwrap_or_default();
        if [INPUT_ROOT, ITEM_ROOT, INDEX_ROOT].contains(&root) {
            errors.push(CompilerError::validate(
                "V010",
                format!(
                    "Node ID '{}' collides with the reserved template root '{}'",
                    node.id, root
                ),
                Some(node.id.clone()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn check(json: &str) -> Vec<String> {
        let (doc, graph) = parse::parse_and_build(json).unwrap();
        validate_structural(&doc, &graph)
            .into_iter()
            .map(|e| e.code)
            .collect()
    }

    #[test]
    fn cycle_message_carries_path() {
        let (doc, graph) = parse::parse_and_build(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"a","type":"action","action":"x"},
                {"id":"b","type":"action","action":"x"}
            ],"controlEdges":[{"source":"a","target":"b"},{"source":"b","target":"a"}]}"#,
        )
        .unwrap();
        let errors = validate_structural(&doc, &graph);
        assert_eq!(errors[0].code, "V004");
        assert!(errors[0].message.contains("a -> b -> a"), "{}", errors[0].message);
    }

    #[test]
    fn duplicate_ids_and_state_names() {
        let codes = check(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"a-b","type":"action","action":"x"},
                {"id":"a-b","type":"action","action":"x"},
                {"id":"a.b","type":"action","action":"x"}
            ]}"#,
        );
        assert_eq!(codes, vec!["V001", "V008"]);
    }

    #[test]
    fn empty_workflow() {
        assert_eq!(check(r#"{"id":"w","name":"w","version":"1","nodes":[]}"#), vec!["V005"]);
    }

    #[test]
    fn condition_branches() {
        let codes = check(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"c","type":"condition","conditions":[{"field":"input.x","operator":"exists"}]},
                {"id":"t","type":"action","action":"x"},
                {"id":"u","type":"action","action":"x"}
            ],"controlEdges":[
                {"source":"c","target":"t","branch":true},
                {"source":"t","target":"u","branch":false}
            ]}"#,
        );
        assert_eq!(codes, vec!["V006", "V007"]);
    }

    #[test]
    fn duplicate_control_edge() {
        let codes = check(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"a","type":"action","action":"x"},
                {"id":"b","type":"action","action":"x"}
            ],"controlEdges":[{"source":"a","target":"b"},{"source":"a","target":"b"}]}"#,
        );
        assert_eq!(codes, vec!["V003"]);
    }

    #[test]
    fn node_ids_must_not_contain_id_separators() {
        let codes = check(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"each","type":"action","action":"x"},
                {"id":"each#1","type":"action","action":"x"},
                {"id":"a@b","type":"action","action":"x"},
                {"id":"ok_name-1.v2","type":"action","action":"x"}
            ]}"#,
        );
        assert_eq!(codes, vec!["V009", "V009"]);
    }

    #[test]
    fn reserved_template_roots_are_not_node_ids() {
        let (doc, graph) = parse::parse_and_build(
            r#"{"id":"w","name":"w","version":"1","nodes":[
                {"id":"input","type":"action","action":"x"},
                {"id":"item.sub","type":"action","action":"x"},
                {"id":"indexer","type":"action","action":"x"}
            ]}"#,
        )
        .unwrap();
        let errors = validate_structural(&doc, &graph);
        let flagged: Vec<_> = errors
            .iter()
            .filter(|e| e.code == "V010")
            .filter_map(|e| e.node_id.as_deref())
            .collect();
        assert_eq!(flagged, vec!["input", "item.sub"]);
    }
}
