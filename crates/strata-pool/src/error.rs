//! Pool errors

use strata_lineage::{LineageKey, ProvenanceError};

/// Errors raised by pool lookups, inserts and strategy combination
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// None of the requested names is in the pool
    #[error(
        "resource not found: {}. Check that an earlier block lists it among its outputs and is switched on",
        .names.join(", ")
    )]
    ResourceNotFound {
        /// Names (or alternative groups) that were requested
        names: Vec<String>,
    },

    /// The resource exists but not under this lineage
    #[error("resource '{resource}' has no lineage {key}")]
    LineageNotFound {
        /// Resource name
        resource: String,
        /// Requested key
        key: LineageKey,
    },

    /// Several lineages exist and no key was given
    #[error("resource '{resource}' has {count} lineages; a lineage key is required")]
    AmbiguousResource {
        /// Resource name
        resource: String,
        /// Number of lineages present
        count: usize,
    },

    /// A non-injected insert carried no lineage
    #[error("cannot insert '{resource}': metadata carries no lineage")]
    EmptyProvenance {
        /// Resource being inserted
        resource: String,
    },

    /// Every declared input of a block is absent
    #[error("none of the listed resources are in the pool: {}", .inputs.join(", "))]
    NoStrategiesFound {
        /// Declared input names
        inputs: Vec<String>,
    },

    /// Lineage could not be encoded or decoded
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
}

impl PoolError {
    /// Resource-not-found for a single name
    #[inline]
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            names: vec![name.into()],
        }
    }
}
