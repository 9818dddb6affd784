//! Error types for the engine
//!
//! Fatal errors abort the current session build. Two kinds are
//! recoverable and only skip work: a stage body declining because the node
//! it would build already exists, and enrichment that cannot find the
//! transform it projects through.

use std::path::PathBuf;

use strata_graph::GraphError;
use strata_lineage::ProvenanceError;
use strata_pool::PoolError;

/// Configuration loading and lookup failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config key not found: {path}")]
    MissingKey { path: String },

    #[error("config value at {path} is not {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
    },
}

impl ConfigError {
    #[inline]
    #[must_use]
    pub fn missing<S: AsRef<str>>(path: &[S]) -> Self {
        Self::MissingKey {
            path: crate::config::display_path(path),
        }
    }

    #[inline]
    #[must_use]
    pub fn mismatch<S: AsRef<str>>(path: &[S], expected: &'static str) -> Self {
        Self::TypeMismatch {
            path: crate::config::display_path(path),
            expected,
        }
    }
}

/// Failure reported by a stage body
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Failed(String),
}

impl StageError {
    #[inline]
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// The body declined because its node already exists
    #[must_use]
    pub fn is_duplicate_construction(&self) -> bool {
        matches!(self, Self::Graph(e) if e.is_duplicate())
    }
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("malformed block declaration '{block}': {reason}")]
    MalformedBlockDeclaration { block: String, reason: String },

    #[error("block '{block}' produced '{label}', which is not among its declared outputs")]
    UndeclaredOutput { block: String, label: String },

    #[error("stage '{node}' failed: {source}")]
    Stage {
        node: String,
        #[source]
        source: StageError,
    },

    #[error("no '{transform}' lineage available to project '{label}' to template space")]
    MissingUpstreamTransform { label: String, transform: String },

    #[error("malformed output label '{label}': {reason}")]
    MalformedOutputLabel { label: String, reason: String },

    #[error("session '{session}' aborted: {reason}")]
    SessionAborted { session: String, reason: String },
}

impl EngineError {
    #[inline]
    #[must_use]
    pub fn malformed_block(block: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedBlockDeclaration {
            block: block.into(),
            reason: reason.into(),
        }
    }

    /// Check if error only skips work instead of aborting the build
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Stage { source, .. } => source.is_duplicate_construction(),
            Self::MissingUpstreamTransform { .. } => true,
            _ => false,
        }
    }
}
