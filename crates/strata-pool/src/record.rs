//! Records and insert requests

use serde::{Deserialize, Serialize};
use strata_graph::OutputRef;

use crate::Metadata;

/// One variant of a resource: where it comes from and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Producer port in the workflow graph
    pub output: OutputRef,
    /// Sidecar metadata, lineage included
    pub metadata: Metadata,
}

/// Arguments of [`crate::ResourcePool::put`]
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Resource name being written
    pub name: String,
    /// Producer port
    pub output: OutputRef,
    /// Metadata whose lineage is the ancestry of this write
    pub metadata: Metadata,
    /// Stage id recorded in the new lineage step
    pub producer: String,
    /// Keep the previous version of the resource alongside this one
    pub fork: bool,
    /// Zero-ancestry data entering from outside the graph
    pub inject: bool,
}

impl PutRequest {
    /// Non-forking, non-injected write with empty metadata
    #[must_use]
    pub fn new(name: impl Into<String>, output: OutputRef, producer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output,
            metadata: Metadata::default(),
            producer: producer.into(),
            fork: false,
            inject: false,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the fork flag
    #[must_use]
    pub fn forking(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// Mark as injected
    #[must_use]
    pub fn injected(mut self) -> Self {
        self.inject = true;
        self
    }
}
