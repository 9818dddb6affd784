//! Lineage chains and their canonical encoding
//!
//! A chain is serialized as a JSON array whose elements are either
//! `"name:producer"` strings or nested arrays (one per merged input). The
//! compact JSON rendering is the canonical key form: equal chains always
//! produce byte-identical strings.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{LineageKey, ProvenanceError, Step};

/// One element of a lineage chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineageEntry {
    /// A single production step
    Step(Step),
    /// A complete upstream chain merged in when several inputs were combined
    Merged(Lineage),
}

impl LineageEntry {
    /// Last production step contained in this entry
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Empty`] for an empty merged chain.
    pub fn last_step(&self) -> Result<&Step, ProvenanceError> {
        match self {
            Self::Step(step) => Ok(step),
            Self::Merged(chain) => chain.last_step(),
        }
    }

    /// Nested chain, if this entry is a merge point
    #[inline]
    #[must_use]
    pub fn as_merged(&self) -> Option<&Lineage> {
        match self {
            Self::Merged(chain) => Some(chain),
            Self::Step(_) => None,
        }
    }

    fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Step(step) => serde_json::Value::String(step.to_string()),
            Self::Merged(chain) => chain.to_value(),
        }
    }
}

impl Display for LineageEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => write!(f, "{step}"),
            Self::Merged(chain) => write!(f, "{chain}"),
        }
    }
}

impl From<Step> for LineageEntry {
    fn from(step: Step) -> Self {
        Self::Step(step)
    }
}

impl From<Lineage> for LineageEntry {
    fn from(chain: Lineage) -> Self {
        Self::Merged(chain)
    }
}

/// Ordered chain of production steps that led to a resource
///
/// Chains are immutable once keyed; [`Lineage::appended`] returns a new
/// chain rather than mutating the receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Lineage(Vec<LineageEntry>);

impl Lineage {
    /// Empty chain
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Chain built from raw entries
    #[inline]
    #[must_use]
    pub fn from_entries(entries: Vec<LineageEntry>) -> Self {
        Self(entries)
    }

    /// Linear chain of steps
    #[must_use]
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self(steps.into_iter().map(LineageEntry::Step).collect())
    }

    /// Chain whose entries are the given upstream chains, each nested
    ///
    /// This is the shape of a strategy that merged several inputs.
    #[must_use]
    pub fn merged(chains: impl IntoIterator<Item = Lineage>) -> Self {
        Self(chains.into_iter().map(LineageEntry::Merged).collect())
    }

    /// Entries in order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[LineageEntry] {
        &self.0
    }

    /// Number of top-level entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the chain has no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an entry in place
    #[inline]
    pub fn push(&mut self, entry: impl Into<LineageEntry>) {
        self.0.push(entry.into());
    }

    /// New chain with `step` appended
    #[must_use]
    pub fn appended(&self, step: Step) -> Self {
        let mut entries = self.0.clone();
        entries.push(LineageEntry::Step(step));
        Self(entries)
    }

    /// Canonical key of this chain
    #[must_use]
    pub fn key(&self) -> LineageKey {
        LineageKey::from(self)
    }

    /// Last production step, recursing into a trailing merged entry
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Empty`] if the chain (or the trailing
    /// merged chain) has no entries.
    pub fn last_step(&self) -> Result<&Step, ProvenanceError> {
        self.0.last().ok_or(ProvenanceError::Empty)?.last_step()
    }

    /// Resource produced by the last step
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Empty`] for an empty chain.
    pub fn resource(&self) -> Result<&str, ProvenanceError> {
        self.last_step().map(Step::resource)
    }

    /// All steps, depth first, in order
    #[must_use]
    pub fn flatten(&self) -> Vec<&Step> {
        let mut steps = Vec::new();
        self.collect_steps(&mut steps);
        steps
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a Step>) {
        for entry in &self.0 {
            match entry {
                LineageEntry::Step(step) => out.push(step),
                LineageEntry::Merged(chain) => chain.collect_steps(out),
            }
        }
    }

    /// Top-level entries keyed by the resource each one ends in
    ///
    /// Empty merged entries are skipped.
    #[must_use]
    pub fn by_resource(&self) -> Vec<(&str, &LineageEntry)> {
        self.0
            .iter()
            .filter_map(|entry| entry.last_step().ok().map(|s| (s.resource(), entry)))
            .collect()
    }

    /// First merged entry whose last step produced `resource`
    ///
    /// Plain steps are not searched. A single step is never the key of a
    /// stored version; only whole chains are.
    #[must_use]
    pub fn find_upstream(&self, resource: &str) -> Option<&Lineage> {
        self.0.iter().filter_map(LineageEntry::as_merged).find(|chain| {
            chain
                .last_step()
                .is_ok_and(|step| step.resource() == resource)
        })
    }

    /// Chain holding the previous version of `resource`, if any
    ///
    /// This is the chain itself when its last step produced `resource`,
    /// otherwise the first merged entry that did. A plain step earlier in
    /// the chain does not count.
    #[must_use]
    pub fn predecessor_of(&self, resource: &str) -> Option<&Lineage> {
        match self.resource() {
            Ok(last) if last == resource => Some(self),
            _ => self.find_upstream(resource),
        }
    }

    /// True if any step anywhere in the chain was written by `producer`
    #[must_use]
    pub fn has_producer(&self, producer: &str) -> bool {
        self.flatten().iter().any(|step| step.producer() == producer)
    }

    pub(crate) fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Array(self.0.iter().map(LineageEntry::to_value).collect())
    }
}

impl Display for Lineage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl FromStr for Lineage {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|e| ProvenanceError::malformed(e.to_string()))
    }
}

impl FromIterator<LineageEntry> for Lineage {
    fn from_iter<I: IntoIterator<Item = LineageEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Lineage {
    type Item = &'a LineageEntry;
    type IntoIter = std::slice::Iter<'a, LineageEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for LineageEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Step(step) => serializer.collect_str(step),
            Self::Merged(chain) => chain.serialize(serializer),
        }
    }
}

impl Serialize for Lineage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(&self.0)
    }
}

struct LineageVisitor;

impl<'de> Visitor<'de> for LineageVisitor {
    type Value = Lineage;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("a lineage list of \"name:producer\" strings and nested lists")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(entry) = seq.next_element::<LineageEntry>()? {
            entries.push(entry);
        }
        Ok(Lineage(entries))
    }
}

impl<'de> Deserialize<'de> for Lineage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(LineageVisitor)
    }
}

impl<'de> Deserialize<'de> for LineageEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = LineageEntry;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a \"name:producer\" string or a nested lineage list")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse::<Step>()
                    .map(LineageEntry::Step)
                    .map_err(de::Error::custom)
            }

            fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                LineageVisitor.visit_seq(seq).map(LineageEntry::Merged)
            }
        }

        deserializer.deserialize_any(EntryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn step(s: &str) -> Step {
        s.parse().unwrap()
    }

    fn linear(steps: &[&str]) -> Lineage {
        Lineage::from_steps(steps.iter().map(|s| step(s)))
    }

    #[test]
    fn canonical_encoding_is_compact_json() {
        let chain = linear(&["raw_T1w:ingress", "preproc_T1w:stageA"]);
        assert_eq!(chain.to_string(), r#"["raw_T1w:ingress","preproc_T1w:stageA"]"#);
    }

    #[test]
    fn nested_chains_encode_as_nested_arrays() {
        let merged = Lineage::merged([linear(&["a:x"]), linear(&["b:y"])]).appended(step("c:z"));
        assert_eq!(merged.to_string(), r#"[["a:x"],["b:y"],"c:z"]"#);
        assert_eq!(merged.to_string().parse::<Lineage>().unwrap(), merged);
    }

    #[test]
    fn last_step_recurses_into_trailing_merge() {
        let merged = Lineage::merged([linear(&["a:x"]), linear(&["a:x", "b:y"])]);
        assert_eq!(merged.last_step().unwrap().to_string(), "b:y");
        assert_eq!(merged.resource().unwrap(), "b");
    }

    #[test]
    fn last_step_of_empty_chain_fails() {
        assert_eq!(Lineage::new().last_step(), Err(ProvenanceError::Empty));
        let hollow = Lineage::merged([Lineage::new()]);
        assert_eq!(hollow.last_step(), Err(ProvenanceError::Empty));
    }

    #[test]
    fn decode_rejects_non_list() {
        assert!(matches!(
            r#"{"a": 1}"#.parse::<Lineage>(),
            Err(ProvenanceError::Malformed { .. })
        ));
        assert!(r#""raw_T1w:ingress""#.parse::<Lineage>().is_err());
        assert!("not json".parse::<Lineage>().is_err());
    }

    #[test]
    fn decode_rejects_entries_without_producer() {
        assert!(r#"["raw_T1w"]"#.parse::<Lineage>().is_err());
        assert!(r#"["a:x", 3]"#.parse::<Lineage>().is_err());
    }

    #[test]
    fn flatten_is_depth_first() {
        let chain = Lineage::merged([linear(&["a:x", "b:y"]), linear(&["c:z"])]).appended(step("d:w"));
        let names: Vec<String> = chain.flatten().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a:x", "b:y", "c:z", "d:w"]);
    }

    #[test]
    fn find_upstream_only_considers_merged_entries() {
        let xfm = linear(&["bold:ingress", "from-bold_to-template_mode-image_xfm:reg"]);
        let chain = Lineage::merged([linear(&["alff:calc"]), xfm.clone()]);
        assert_eq!(
            chain.find_upstream("from-bold_to-template_mode-image_xfm"),
            Some(&xfm)
        );
        assert_eq!(linear(&["alff:calc"]).find_upstream("alff"), None);
    }

    #[test]
    fn predecessor_prefers_whole_chain() {
        let chain = linear(&["bold:ingress", "desc-preproc_bold:motion"]);
        assert_eq!(chain.predecessor_of("desc-preproc_bold"), Some(&chain));

        let upstream = linear(&["mask:ingress"]);
        let merged = Lineage::merged([chain.clone(), upstream.clone()]);
        assert_eq!(merged.predecessor_of("mask"), Some(&upstream));
        assert_eq!(merged.predecessor_of("T1w"), None);
    }

    #[test]
    fn plain_steps_are_not_predecessors() {
        let chain = linear(&["T1w:ingress", "desc-reorient_T1w:reorient", "desc-brain_T1w:bet"]);
        assert_eq!(chain.predecessor_of("desc-reorient_T1w"), None);
        assert_eq!(chain.find_upstream("T1w"), None);

        let nested = Lineage::merged([linear(&["T1w:ingress", "desc-reorient_T1w:reorient"])])
            .appended(step("desc-brain_T1w:bet"));
        assert_eq!(
            nested.predecessor_of("desc-reorient_T1w").map(Lineage::len),
            Some(2)
        );
    }

    #[test]
    fn by_resource_keys_top_level_entries() {
        let chain = Lineage::merged([linear(&["a:x"]), linear(&["a:x", "b:y"])]).appended(step("c:z"));
        let keys: Vec<&str> = chain.by_resource().iter().map(|(name, _)| *name).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        ("[A-Za-z0-9_-]{1,16}", "[A-Za-z0-9_ :.-]{0,16}")
            .prop_map(|(resource, producer)| Step::new(resource, producer).unwrap())
    }

    fn arb_lineage() -> impl Strategy<Value = Lineage> {
        let leaf = prop::collection::vec(arb_step(), 0..4).prop_map(Lineage::from_steps);
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(
                prop_oneof![
                    arb_step().prop_map(LineageEntry::Step),
                    inner.prop_map(LineageEntry::Merged),
                ],
                0..4,
            )
            .prop_map(Lineage::from_entries)
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(chain in arb_lineage()) {
            let decoded: Lineage = chain.to_string().parse().unwrap();
            prop_assert_eq!(decoded, chain);
        }

        #[test]
        fn equal_chains_encode_identically(chain in arb_lineage()) {
            prop_assert_eq!(chain.clone().to_string(), chain.to_string());
        }
    }
}
