//! Per-build state

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_graph::WorkflowGraph;
use strata_pool::ResourcePool;

use crate::{EnrichmentSettings, PipelineConfig};

/// Everything one subject/session build owns
///
/// Resolution is single threaded; nothing in a context is shared with
/// another build except the configuration.
#[derive(Debug)]
pub struct BuildContext {
    pub pool: ResourcePool,
    pub graph: WorkflowGraph,
    pub config: Arc<PipelineConfig>,
    pub enrichment: EnrichmentSettings,
    pub diagnostics: Diagnostics,
}

impl BuildContext {
    /// Empty pool and graph; enrichment settings read from `config`
    pub fn new(id: impl Into<String>, config: Arc<PipelineConfig>) -> Self {
        let id = id.into();
        Self {
            pool: ResourcePool::new(id.as_str()),
            graph: WorkflowGraph::new(format!("pipeline_{id}")),
            enrichment: EnrichmentSettings::from_config(&config),
            config,
            diagnostics: Diagnostics::default(),
        }
    }

    #[must_use]
    pub fn with_enrichment(mut self, enrichment: EnrichmentSettings) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn id(&self) -> &str {
        self.pool.id()
    }
}

/// Why an invocation or enrichment was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// No active option, or the switch has no `true` branch
    Inert,
    DuplicateConstruction,
    MissingUpstreamTransform,
    /// An input enrichment needs is not in the pool
    MissingInput,
    /// The body returned no outputs
    EmptyOutputs,
    /// The stage's outputs were already present
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEvent {
    pub block: String,
    /// Fingerprint of the strategy's lineage key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    pub kind: SkipKind,
    pub reason: String,
}

/// Skips recorded during one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub skips: Vec<SkipEvent>,
}

impl Diagnostics {
    pub fn record(&mut self, event: SkipEvent) {
        self.skips.push(event);
    }

    pub fn count(&self, kind: SkipKind) -> usize {
        self.skips.iter().filter(|s| s.kind == kind).count()
    }

    pub fn for_block<'a>(&'a self, block: &'a str) -> impl Iterator<Item = &'a SkipEvent> {
        self.skips.iter().filter(move |s| s.block == block)
    }

    pub fn is_empty(&self) -> bool {
        self.skips.is_empty()
    }
}
