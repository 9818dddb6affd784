//! Materialization plan: which records get written, and where

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strata_graph::OutputRef;
use strata_lineage::{label, LineageKey};
use strata_pool::{Metadata, ResourcePool};

/// Which pool resources are written out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPolicy {
    /// Written under `anat/`
    pub anat: BTreeSet<String>,
    /// Written under `func/`
    pub func: BTreeSet<String>,
    /// Write resources listed in neither set under `other/`
    pub include_other: bool,
    /// Write freshly ingested data back out
    pub include_raw: bool,
    pub exclude: BTreeSet<String>,
    /// A resource is dropped when its name contains every substring of a group
    pub exclude_substrings: Vec<Vec<String>>,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            anat: BTreeSet::new(),
            func: BTreeSet::new(),
            include_other: true,
            include_raw: false,
            exclude: BTreeSet::new(),
            exclude_substrings: vec![vec!["desc-reginput".into(), "bold".into()]],
        }
    }
}

impl OutputPolicy {
    fn subdir(&self, resource: &str) -> Option<&'static str> {
        if self.anat.contains(resource) {
            Some("anat")
        } else if self.func.contains(resource) {
            Some("func")
        } else if self.include_other {
            Some("other")
        } else {
            None
        }
    }

    fn excludes(&self, resource: &str) -> bool {
        self.exclude.contains(resource)
            || self
                .exclude_substrings
                .iter()
                .any(|group| !group.is_empty() && group.iter().all(|s| resource.contains(s.as_str())))
    }
}

/// One record to materialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub resource: String,
    /// Resource name, numbered when the resource has several variants
    pub label: String,
    pub key: LineageKey,
    /// Pipe number of the record's lineage key
    pub ordinal: usize,
    pub subdir: String,
    pub filename: String,
    pub output: OutputRef,
    pub metadata: Metadata,
}

/// Records to materialize, in pool order
pub fn gather_outputs(pool: &ResourcePool, policy: &OutputPolicy) -> Vec<OutputEntry> {
    let mut entries = Vec::new();
    for (resource, variants) in pool.iter() {
        if variants.is_empty() || policy.excludes(resource) {
            continue;
        }
        let Some(subdir) = policy.subdir(resource) else {
            continue;
        };
        let numbered = variants.len() > 1;
        for (index, (key, record)) in variants.iter().enumerate() {
            if !policy.include_raw && !record.metadata.raw_sources.is_empty() {
                continue;
            }
            let variant_label = if numbered {
                label::with_variant_number(resource, index + 1)
            } else {
                resource.to_string()
            };
            entries.push(OutputEntry {
                resource: resource.to_string(),
                filename: format!("{}_{variant_label}", pool.id()),
                label: variant_label,
                key: key.clone(),
                ordinal: pool.ordinal(key).unwrap_or_default(),
                subdir: subdir.to_string(),
                output: record.output.clone(),
                metadata: record.metadata.clone(),
            });
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_graph::NodeId;
    use strata_pool::PutRequest;

    fn pool() -> ResourcePool {
        let mut pool = ResourcePool::new("sub-01_ses-1");
        let raw = pool
            .put(PutRequest::new("bold", NodeId::new(0).output("data"), "ingress").injected())
            .unwrap();
        let ancestry = pool.get_record("bold", &raw).unwrap().metadata.clone();
        let mut derived = ancestry.clone();
        derived.raw_sources.clear();
        for (n, producer) in ["afni", "fsl"].into_iter().enumerate() {
            pool.put(
                PutRequest::new("desc-preproc_bold", NodeId::new(n + 1).output("out"), producer)
                    .with_metadata(derived.clone())
                    .forking(true),
            )
            .unwrap();
        }
        pool.put(
            PutRequest::new("alff", NodeId::new(5).output("out"), "alff")
                .with_metadata(derived.clone()),
        )
        .unwrap();
        pool.put(
            PutRequest::new("desc-reginput_bold", NodeId::new(6).output("out"), "reg")
                .with_metadata(derived),
        )
        .unwrap();
        pool
    }

    #[test]
    fn numbers_variants_and_skips_raw() {
        let mut policy = OutputPolicy::default();
        policy.func.insert("desc-preproc_bold".into());
        let entries = gather_outputs(&pool(), &policy);
        let labels: Vec<_> = entries.iter().map(|e| (e.label.as_str(), e.subdir.as_str())).collect();
        assert_eq!(
            labels,
            vec![
                ("desc-preproc-1_bold", "func"),
                ("desc-preproc-2_bold", "func"),
                ("alff", "other"),
            ]
        );
        assert_eq!(entries[2].filename, "sub-01_ses-1_alff");
        assert_ne!(entries[0].ordinal, entries[1].ordinal);
    }

    #[test]
    fn other_resources_can_be_dropped() {
        let policy = OutputPolicy {
            include_other: false,
            ..OutputPolicy::default()
        };
        assert!(gather_outputs(&pool(), &policy).is_empty());
    }
}
