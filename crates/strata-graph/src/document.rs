//! Engine hand-off format

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub name: String,
    pub nodes: Vec<NodeDocument>,
    pub edges: Vec<EdgeDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: NodeId,
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Edge with endpoints addressed by node name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDocument {
    pub source: String,
    pub source_port: String,
    pub target: String,
    pub target_port: String,
}

impl GraphDocument {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn node(&self, name: &str) -> Option<&NodeDocument> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Edges whose target is the named node
    pub fn inputs_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EdgeDocument> {
        self.edges.iter().filter(move |e| e.target == name)
    }
}
