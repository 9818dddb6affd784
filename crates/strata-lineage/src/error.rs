//! Provenance errors

/// Errors raised while encoding, decoding or inspecting lineage chains
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvenanceError {
    /// The text is not a lineage chain, or an entry is not `name:producer`
    #[error("malformed provenance: {reason}")]
    Malformed {
        /// What was wrong with the input
        reason: String,
    },

    /// A production step was requested from a chain with no entries
    #[error("empty provenance: lineage chain has no production step")]
    Empty,
}

impl ProvenanceError {
    /// Create a malformed-provenance error
    #[inline]
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
