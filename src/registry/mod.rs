//! Node registry snapshot: typed contracts per action kind plus the
//! known-workflow signatures sub-workflow nodes resolve against.

pub mod ports;
pub mod schema;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use ports::{PortSet, node_ports};
pub use schema::ValueType;

use crate::error::CompilerError;

/// Where an action's worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Runtime {
    Container,
    Host,
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Runtime::Container => write!(f, "container"),
            Runtime::Host => write!(f, "host"),
        }
    }
}

/// A named, typed slot: used for params, input ports and output ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl PortSchema {
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        PortSchema {
            name: name.into(),
            value_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        PortSchema {
            name: name.into(),
            value_type,
            required: false,
        }
    }
}

/// Object type whose fields are the given ports.
pub fn ports_as_object(ports: &[PortSchema]) -> ValueType {
    ValueType::Object {
        fields: ports
            .iter()
            .map(|p| (p.name.clone(), p.value_type.clone()))
            .collect(),
    }
}

/// Typed contract of one action kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeContract {
    pub kind: String,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub task_queue: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub params: Vec<PortSchema>,
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
}

/// Declared input/output contract of an independently defined workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSignature {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub nodes: Vec<NodeContract>,
    #[serde(default)]
    pub workflows: Vec<WorkflowSignature>,
}

impl Registry {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::parse("P001", format!("Failed to parse registry JSON: {}", e))
        })
    }

    pub fn contract(&self, kind: &str) -> Option<&NodeContract> {
        self.nodes.iter().find(|c| c.kind == kind)
    }

    pub fn workflow(&self, id: &str) -> Option<&WorkflowSignature> {
        self.workflows.iter().find(|w| w.id == id)
    }

    pub fn with_contract(mut self, contract: NodeContract) -> Self {
        self.nodes.retain(|c| c.kind != contract.kind);
        self.nodes.push(contract);
        self
    }

    pub fn with_workflow(mut self, signature: WorkflowSignature) -> Self {
        self.workflows.retain(|w| w.id != signature.id);
        self.workflows.push(signature);
        self
    }

    /// Contracts keyed by kind, for ordered iteration.
    pub fn contracts_by_kind(&self) -> BTreeMap<&str, &NodeContract> {
        self.nodes.iter().map(|c| (c.kind.as_str(), c)).collect()
    }
}
