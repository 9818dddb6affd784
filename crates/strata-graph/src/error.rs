use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node with this name already exists, or an input port is already wired
    #[error("duplicate construction: {what}")]
    DuplicateConstruction { what: String },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),

    #[error("connecting {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },
}

impl GraphError {
    #[inline]
    #[must_use]
    pub fn duplicate(what: impl Into<String>) -> Self {
        Self::DuplicateConstruction { what: what.into() }
    }

    #[inline]
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateConstruction { .. })
    }
}
