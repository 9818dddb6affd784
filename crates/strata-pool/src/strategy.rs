//! Strategy pools: one chosen lineage per input

use indexmap::IndexMap;
use strata_graph::OutputRef;
use strata_lineage::{label, Lineage, LineageKey};

use crate::{Metadata, PoolError, ResourceQuery, ResourceRecord};

/// Producer reference plus the fork labels of that resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Producer port
    pub output: OutputRef,
    /// Stage ids that forked this resource
    pub variant: Vec<String>,
}

/// Flattened sub-pool holding exactly one record per resource name
///
/// Produced by the combination engine for each surviving combination of
/// input lineages, and handed to a stage body for one invocation.
#[derive(Debug, Clone)]
pub struct StrategyPool {
    key: LineageKey,
    lineage: Lineage,
    records: IndexMap<String, ResourceRecord>,
    merged: Metadata,
}

impl StrategyPool {
    /// Combine chosen `(name, record)` pairs
    ///
    /// A single input keeps its own lineage and metadata. Several inputs
    /// get a merged lineage (one nested chain per input) and fresh
    /// metadata carrying the union of their fork tags, first writer wins.
    #[must_use]
    pub fn assemble(chosen: Vec<(String, ResourceRecord)>) -> Self {
        let (lineage, merged) = if let [(_, only)] = chosen.as_slice() {
            (only.metadata.lineage.clone(), only.metadata.clone())
        } else {
            let lineage = Lineage::merged(
                chosen
                    .iter()
                    .map(|(_, record)| record.metadata.lineage.clone()),
            );
            let mut merged = Metadata::with_lineage(lineage.clone());
            for (_, record) in &chosen {
                merged.adopt_forks(&record.metadata);
            }
            (lineage, merged)
        };

        Self {
            key: lineage.key(),
            lineage,
            records: chosen.into_iter().collect(),
            merged,
        }
    }

    /// Key of the merged lineage
    #[inline]
    #[must_use]
    pub fn key(&self) -> &LineageKey {
        &self.key
    }

    /// Merged lineage
    #[inline]
    #[must_use]
    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    /// Metadata every output of this strategy starts from
    #[inline]
    #[must_use]
    pub fn merged_metadata(&self) -> &Metadata {
        &self.merged
    }

    /// Number of resources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no resource is held
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resource names in input order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// `(name, record)` pairs in input order
    pub fn records(&self) -> impl Iterator<Item = (&str, &ResourceRecord)> {
        self.records.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// True if `name` is held
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Record by name or by ordered alternatives
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if no candidate is held.
    pub fn get(&self, query: impl Into<ResourceQuery>) -> Result<(&str, &ResourceRecord), PoolError> {
        let query = query.into();
        self.get_optional(&query)
            .ok_or_else(|| PoolError::ResourceNotFound {
                names: query.names().to_vec(),
            })
    }

    /// Like [`StrategyPool::get`] but absence is `None`
    #[must_use]
    pub fn get_optional(&self, query: impl Into<ResourceQuery>) -> Option<(&str, &ResourceRecord)> {
        let query = query.into();
        query.names().iter().find_map(|name| {
            self.records
                .get_key_value(name)
                .map(|(n, r)| (n.as_str(), r))
        })
    }

    /// Producer reference by name or alternatives
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if no candidate is held.
    pub fn get_data(&self, query: impl Into<ResourceQuery>) -> Result<&OutputRef, PoolError> {
        self.get(query).map(|(_, record)| &record.output)
    }

    /// Producer reference and fork labels of `name`
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if `name` is not held.
    pub fn node_data(&self, name: &str) -> Result<NodeData, PoolError> {
        let (name, record) = self.get(name)?;
        Ok(NodeData {
            output: record.output.clone(),
            variant: record.metadata.fork.get(name).cloned().unwrap_or_default(),
        })
    }

    /// Metadata of the last held input whose data type is `data_type`
    #[must_use]
    pub fn metadata_for_type(&self, data_type: &str) -> Option<&Metadata> {
        self.records
            .iter()
            .rev()
            .find(|(name, _)| label::data_type(name) == data_type)
            .map(|(_, record)| &record.metadata)
    }

    /// Point `name` at `output`
    ///
    /// A held name keeps its metadata; a new one starts from the merged
    /// metadata of the strategy.
    pub fn set_output(&mut self, name: &str, output: OutputRef) {
        if let Some(record) = self.records.get_mut(name) {
            record.output = output;
            return;
        }
        let record = ResourceRecord {
            output,
            metadata: self.merged.clone(),
        };
        self.records.insert(name.to_string(), record);
    }

    /// Also expose the record of `actual` under `alias`
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if `actual` is not held.
    pub fn alias(&mut self, alias: &str, actual: impl Into<ResourceQuery>) -> Result<(), PoolError> {
        let (_, record) = self.get(actual)?;
        let record = record.clone();
        self.records.insert(alias.to_string(), record);
        Ok(())
    }
}
