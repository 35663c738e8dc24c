//! Shared lookup tables for validation and lowering.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::CompilerConfig;
use crate::parse::graph::ControlGraph;
use crate::parse::types::{GraphDocument, GraphNode};
use crate::registry::{PortSet, Registry, node_ports};

pub struct CompileContext<'a> {
    pub doc: &'a GraphDocument,
    pub graph: &'a ControlGraph,
    pub registry: &'a Registry,
    pub config: &'a CompilerConfig,
    /// First occurrence of each node id.
    pub nodes: HashMap<&'a str, &'a GraphNode>,
    pub node_ids: HashSet<&'a str>,
    /// Derived ports per node; `None` when the contract does not resolve.
    pub ports: HashMap<&'a str, Option<PortSet>>,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        doc: &'a GraphDocument,
        graph: &'a ControlGraph,
        registry: &'a Registry,
        config: &'a CompilerConfig,
    ) -> Self {
        let mut nodes = HashMap::new();
        let mut ports = HashMap::new();
        for node in &doc.nodes {
            if nodes.contains_key(node.id.as_str()) {
                continue;
            }
            nodes.insert(node.id.as_str(), node);
            ports.insert(node.id.as_str(), node_ports(node, registry));
        }
        let node_ids = nodes.keys().copied().collect();
        CompileContext {
            doc,
            graph,
            registry,
            config,
            nodes,
            node_ids,
            ports,
        }
    }

    pub fn node(&self, id: &str) -> Option<&'a GraphNode> {
        self.nodes.get(id).copied()
    }

    /// Nodes in document order, skipping repeated ids.
    pub fn unique_nodes(&self) -> impl Iterator<Item = &'a GraphNode> + '_ {
        let mut seen = HashSet::new();
        self.doc
            .nodes
            .iter()
            .filter(move |n| seen.insert(n.id.as_str()))
    }

    pub fn ports_of(&self, id: &str) -> Option<&PortSet> {
        self.ports.get(id).and_then(|p| p.as_ref())
    }

    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        self.graph.ancestors(id)
    }
}
