//! The resource pool

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use strata_graph::OutputRef;
use strata_lineage::{Lineage, LineageKey, Step};

use crate::{PoolError, PutRequest, ResourceQuery, ResourceRecord, StrategyPool};

/// Every lineage of one resource, in insertion order
pub type Variants = IndexMap<LineageKey, ResourceRecord>;

/// Lineage-keyed store of the resources produced during one build
///
/// A pool belongs to exactly one subject/session build and is mutated only
/// by that build. Every key ever created is also appended to an ordered
/// registry whose indices ("pipe numbers") name strategies in node names.
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    id: String,
    resources: IndexMap<String, Variants>,
    ordinals: IndexSet<LineageKey>,
    info: BTreeMap<String, serde_json::Value>,
}

impl ResourcePool {
    /// Empty pool for the build identified by `id`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Build identifier (subject/session)
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store a free-form pool info value
    pub fn set_info(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.info.insert(key.into(), value.into());
    }

    /// Pool info value
    #[must_use]
    pub fn info(&self, key: &str) -> Option<&serde_json::Value> {
        self.info.get(key)
    }

    /// Insert a record and return its lineage key
    ///
    /// Injected writes keep a non-empty metadata lineage as is (prior
    /// outputs) or start a one-step lineage. Other writes append
    /// `name:producer` to the metadata lineage. Without `fork`, the
    /// previous version of the resource along that lineage is replaced.
    ///
    /// # Errors
    /// [`PoolError::EmptyProvenance`] for a non-injected write without a
    /// lineage; [`PoolError::Provenance`] for an invalid resource name.
    pub fn put(&mut self, request: PutRequest) -> Result<LineageKey, PoolError> {
        let PutRequest {
            name,
            output,
            mut metadata,
            producer,
            fork,
            inject,
        } = request;

        if metadata.is_bare() {
            metadata.raw_sources = vec![name.clone()];
        }

        let ancestry = std::mem::take(&mut metadata.lineage);
        let lineage = if inject {
            if ancestry.is_empty() {
                Lineage::from_steps([Step::new(name.as_str(), producer.as_str())?])
            } else {
                ancestry.clone()
            }
        } else {
            if ancestry.is_empty() {
                return Err(PoolError::EmptyProvenance { resource: name });
            }
            ancestry.appended(Step::new(name.as_str(), producer.as_str())?)
        };
        let key = lineage.key();
        metadata.lineage = lineage;

        let variants = self.resources.entry(name.clone()).or_default();
        if !fork && !inject {
            if let Some(previous) = ancestry.predecessor_of(&name) {
                if variants.shift_remove(&previous.key()).is_some() {
                    tracing::trace!(resource = %name, "replaced previous version");
                }
            }
        }
        variants.insert(key.clone(), ResourceRecord { output, metadata });
        self.ordinals.insert(key.clone());

        tracing::trace!(
            resource = %name,
            producer = %producer,
            fork,
            inject,
            key = %key.fingerprint(),
            "put resource"
        );
        Ok(key)
    }

    /// First present name of the query
    #[must_use]
    pub fn resolve_name(&self, query: &ResourceQuery) -> Option<&str> {
        query.names().iter().find_map(|name| {
            self.resources
                .get_key_value(name.as_str())
                .filter(|(_, variants)| !variants.is_empty())
                .map(|(name, _)| name.as_str())
        })
    }

    /// Fetch a resource by name or by ordered alternatives
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if no candidate is present.
    pub fn get(&self, query: impl Into<ResourceQuery>) -> Result<(&str, &Variants), PoolError> {
        let query = query.into();
        self.get_optional(&query)
            .ok_or_else(|| PoolError::ResourceNotFound {
                names: query.names().to_vec(),
            })
    }

    /// Like [`ResourcePool::get`] but absence is `None`
    #[must_use]
    pub fn get_optional(&self, query: impl Into<ResourceQuery>) -> Option<(&str, &Variants)> {
        let query = query.into();
        let name = self.resolve_name(&query)?;
        self.resources
            .get_key_value(name)
            .map(|(name, variants)| (name.as_str(), variants))
    }

    /// Record of `name` under `key`
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] or [`PoolError::LineageNotFound`].
    pub fn get_record(&self, name: &str, key: &LineageKey) -> Result<&ResourceRecord, PoolError> {
        let (_, variants) = self.get(name)?;
        variants.get(key).ok_or_else(|| PoolError::LineageNotFound {
            resource: name.to_string(),
            key: key.clone(),
        })
    }

    /// Producer reference of `name`
    ///
    /// With a key, that lineage. Without one, the only lineage, or the
    /// first when `quick_single` is set.
    ///
    /// # Errors
    /// [`PoolError::AmbiguousResource`] when several lineages exist and
    /// neither a key nor `quick_single` was given.
    pub fn get_data(
        &self,
        name: &str,
        key: Option<&LineageKey>,
        quick_single: bool,
    ) -> Result<&OutputRef, PoolError> {
        if let Some(key) = key {
            return self.get_record(name, key).map(|r| &r.output);
        }
        let (_, variants) = self.get(name)?;
        if variants.len() == 1 || quick_single {
            if let Some((_, record)) = variants.first() {
                return Ok(&record.output);
            }
        }
        Err(PoolError::AmbiguousResource {
            resource: name.to_string(),
            count: variants.len(),
        })
    }

    /// Alias every lineage of `name` under `new_name` as well
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if `name` is absent.
    pub fn copy_resource(&mut self, name: &str, new_name: &str) -> Result<(), PoolError> {
        let (_, variants) = self.get(name)?;
        let variants = variants.clone();
        self.resources.insert(new_name.to_string(), variants);
        Ok(())
    }

    /// Add every lineage of `name` to `into`, keeping those already there
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if `name` is absent.
    pub fn merge_resource(&mut self, name: &str, into: &str) -> Result<(), PoolError> {
        let (_, variants) = self.get(name)?;
        let variants = variants.clone();
        let target = self.resources.entry(into.to_string()).or_default();
        for (key, record) in variants {
            target.entry(key).or_insert(record);
        }
        Ok(())
    }

    /// Move every lineage of `name` to `new_name`
    ///
    /// # Errors
    /// [`PoolError::ResourceNotFound`] if `name` is absent.
    pub fn rename_resource(&mut self, name: &str, new_name: &str) -> Result<(), PoolError> {
        self.merge_resource(name, new_name)?;
        self.resources.shift_remove(name);
        Ok(())
    }

    /// Sub-pool made of the records reached by `chains`
    ///
    /// Each chain names its resource through its last step.
    ///
    /// # Errors
    /// Lookup errors for a chain that is not in the pool.
    pub fn subset_by_lineage(&self, chains: &[Lineage]) -> Result<StrategyPool, PoolError> {
        let chosen = chains
            .iter()
            .map(|chain| {
                let name = chain.resource()?;
                let record = self.get_record(name, &chain.key())?;
                Ok((name.to_string(), record.clone()))
            })
            .collect::<Result<Vec<_>, PoolError>>()?;
        Ok(StrategyPool::assemble(chosen))
    }

    /// Lineage keys of `name` in insertion order
    #[must_use]
    pub fn lineage_keys(&self, name: &str) -> Vec<&LineageKey> {
        self.resources
            .get(name)
            .map(|v| v.keys().collect())
            .unwrap_or_default()
    }

    /// Lineages of `name` in insertion order
    #[must_use]
    pub fn lineages(&self, name: &str) -> Vec<&Lineage> {
        self.resources
            .get(name)
            .map(|v| v.values().map(|r| &r.metadata.lineage).collect())
            .unwrap_or_default()
    }

    /// Register `key` in the ordinal registry and return its pipe number
    pub fn register_key(&mut self, key: &LineageKey) -> usize {
        match self.ordinals.get_index_of(key) {
            Some(index) => index,
            None => self.ordinals.insert_full(key.clone()).0,
        }
    }

    /// Pipe number of a key, if it was ever registered
    #[must_use]
    pub fn ordinal(&self, key: &LineageKey) -> Option<usize> {
        self.ordinals.get_index_of(key)
    }

    /// True if `name` has at least one lineage
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resources.get(name).is_some_and(|v| !v.is_empty())
    }

    /// True if any of `names` is present
    #[must_use]
    pub fn contains_any<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| self.contains(n.as_ref()))
    }

    /// Resource names in insertion order
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// `(name, variants)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variants)> {
        self.resources.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Number of lineages of `name`
    #[must_use]
    pub fn variant_count(&self, name: &str) -> usize {
        self.resources.get(name).map_or(0, IndexMap::len)
    }

    /// Upstream breakdown of one record: resource -> encoded entry
    ///
    /// # Errors
    /// Lookup errors if the record is absent.
    pub fn strategy_info(
        &self,
        name: &str,
        key: &LineageKey,
    ) -> Result<BTreeMap<String, String>, PoolError> {
        let record = self.get_record(name, key)?;
        Ok(record
            .metadata
            .lineage
            .by_resource()
            .into_iter()
            .map(|(resource, entry)| (resource.to_string(), entry.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metadata;
    use strata_graph::NodeId;

    fn out(n: usize) -> OutputRef {
        NodeId::new(n).output("out")
    }

    fn inject(pool: &mut ResourcePool, name: &str) -> LineageKey {
        pool.put(PutRequest::new(name, out(0), "ingress").injected())
            .unwrap()
    }

    #[test]
    fn injected_resource_gets_one_step_lineage() {
        let mut pool = ResourcePool::new("sub-01");
        let key = inject(&mut pool, "raw_T1w");
        assert_eq!(key.as_str(), r#"["raw_T1w:ingress"]"#);
        let record = pool.get_record("raw_T1w", &key).unwrap();
        assert_eq!(record.metadata.raw_sources, vec!["raw_T1w"]);
        assert_eq!(pool.ordinal(&key), Some(0));
    }

    #[test]
    fn injected_prior_output_keeps_its_lineage() {
        let mut pool = ResourcePool::new("sub-01");
        let lineage: Lineage = r#"["T1w:anat_ingress","desc-brain_T1w:skullstrip"]"#.parse().unwrap();
        let key = pool
            .put(
                PutRequest::new("desc-brain_T1w", out(3), "")
                    .with_metadata(Metadata::with_lineage(lineage.clone()))
                    .injected(),
            )
            .unwrap();
        assert_eq!(key, lineage.key());
    }

    #[test]
    fn non_injected_put_requires_lineage() {
        let mut pool = ResourcePool::new("sub-01");
        let err = pool.put(PutRequest::new("desc-brain_T1w", out(1), "skullstrip")).unwrap_err();
        assert_eq!(
            err,
            PoolError::EmptyProvenance {
                resource: "desc-brain_T1w".into()
            }
        );
    }

    #[test]
    fn non_forking_put_replaces_previous_version() {
        let mut pool = ResourcePool::new("sub-01");
        let first = inject(&mut pool, "bold");
        let ancestry = pool.get_record("bold", &first).unwrap().metadata.clone();

        let second = pool
            .put(PutRequest::new("bold", out(1), "despike").with_metadata(ancestry.clone()))
            .unwrap();
        assert_eq!(pool.lineage_keys("bold"), vec![&second]);

        let again = pool
            .put(PutRequest::new("bold", out(2), "despike").with_metadata(ancestry))
            .unwrap();
        assert_eq!(again, second);
        assert_eq!(pool.variant_count("bold"), 1);
        assert_eq!(pool.get_data("bold", None, false).unwrap(), &out(2));
    }

    #[test]
    fn forking_put_keeps_previous_version() {
        let mut pool = ResourcePool::new("sub-01");
        let first = inject(&mut pool, "bold");
        let ancestry = pool.get_record("bold", &first).unwrap().metadata.clone();
        let second = pool
            .put(
                PutRequest::new("bold", out(1), "despike")
                    .with_metadata(ancestry)
                    .forking(true),
            )
            .unwrap();
        assert_eq!(pool.lineage_keys("bold"), vec![&first, &second]);
        assert!(matches!(
            pool.get_data("bold", None, false),
            Err(PoolError::AmbiguousResource { count: 2, .. })
        ));
        assert_eq!(pool.get_data("bold", None, true).unwrap(), &out(0));
        assert_eq!(pool.get_data("bold", Some(&second), false).unwrap(), &out(1));
    }

    #[test]
    fn alternatives_return_first_present() {
        let mut pool = ResourcePool::new("sub-01");
        inject(&mut pool, "bold");
        inject(&mut pool, "desc-preproc_bold");
        let (name, _) = pool.get(["desc-preproc_bold", "bold"]).unwrap();
        assert_eq!(name, "desc-preproc_bold");
        assert!(pool.get_optional("T1w").is_none());
        assert!(matches!(
            pool.get(["T1w", "desc-brain_T1w"]),
            Err(PoolError::ResourceNotFound { names }) if names.len() == 2
        ));
    }

    #[test]
    fn copy_and_rename() {
        let mut pool = ResourcePool::new("sub-01");
        inject(&mut pool, "T1w");
        pool.copy_resource("T1w", "desc-head_T1w").unwrap();
        assert!(pool.contains("T1w"));
        assert!(pool.contains("desc-head_T1w"));

        pool.rename_resource("desc-head_T1w", "desc-reorient_T1w").unwrap();
        assert!(!pool.contains("desc-head_T1w"));
        assert_eq!(pool.variant_count("desc-reorient_T1w"), 1);
        assert!(pool.copy_resource("missing", "x").is_err());
    }

    #[test]
    fn register_key_is_idempotent() {
        let mut pool = ResourcePool::new("sub-01");
        let a = inject(&mut pool, "a");
        let merged = Lineage::merged([a.decode().unwrap()]).key();
        assert_eq!(pool.register_key(&merged), 1);
        assert_eq!(pool.register_key(&merged), 1);
        assert_eq!(pool.register_key(&a), 0);
    }

    #[test]
    fn subset_by_lineage_picks_named_records() {
        let mut pool = ResourcePool::new("sub-01");
        let t1 = inject(&mut pool, "T1w");
        let bold = inject(&mut pool, "bold");
        let chains = [t1.decode().unwrap(), bold.decode().unwrap()];
        let strategy = pool.subset_by_lineage(&chains).unwrap();
        assert_eq!(strategy.len(), 2);
        assert_eq!(strategy.lineage(), &Lineage::merged(chains.clone()));
    }

    #[test]
    fn strategy_info_breaks_down_upstream() {
        let mut pool = ResourcePool::new("sub-01");
        let key = inject(&mut pool, "T1w");
        let info = pool.strategy_info("T1w", &key).unwrap();
        assert_eq!(info["T1w"], "T1w:ingress");
    }
}
