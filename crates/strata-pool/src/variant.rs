//! Fork labels observed per resource

use std::collections::{BTreeMap, BTreeSet};

use crate::Metadata;

/// Resource name -> every fork label seen on any of its lineages
///
/// A label known to a resource but absent from one of its records means
/// that record took the other branch of that fork.
#[derive(Debug, Clone, Default)]
pub struct VariantRegistry {
    known: BTreeMap<String, BTreeSet<String>>,
}

impl VariantRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fork labels of one lineage of `name`
    pub fn observe(&mut self, name: &str, metadata: &Metadata) {
        let labels = self.known.entry(name.to_string()).or_default();
        labels.extend(metadata.fork_labels().map(str::to_string));
    }

    /// Labels known for `name`
    #[must_use]
    pub fn known(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.known.get(name)
    }

    /// True if two chosen records agree on every label known to both
    /// resources: each such label is applied in both or in neither.
    #[must_use]
    pub fn compatible(&self, x: (&str, &Metadata), y: (&str, &Metadata)) -> bool {
        let (Some(known_x), Some(known_y)) = (self.known(x.0), self.known(y.0)) else {
            return true;
        };
        known_x
            .intersection(known_y)
            .all(|label| x.1.applies(label) == y.1.applies(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(labels: &[&str]) -> Metadata {
        let mut meta = Metadata::default();
        for label in labels {
            meta.tag_fork("bold", *label);
        }
        meta
    }

    #[test]
    fn shared_label_must_agree() {
        let on = tagged(&["apply_m"]);
        let off = tagged(&[]);
        let mut registry = VariantRegistry::new();
        registry.observe("a", &on);
        registry.observe("a", &off);
        registry.observe("b", &on);
        registry.observe("b", &off);

        assert!(registry.compatible(("a", &on), ("b", &on)));
        assert!(registry.compatible(("a", &off), ("b", &off)));
        assert!(!registry.compatible(("a", &on), ("b", &off)));
        assert!(!registry.compatible(("a", &off), ("b", &on)));
    }

    #[test]
    fn label_known_to_one_side_is_ignored() {
        let x = tagged(&["only_a"]);
        let y = tagged(&[]);
        let mut registry = VariantRegistry::new();
        registry.observe("a", &x);
        registry.observe("b", &y);
        assert!(registry.compatible(("a", &x), ("b", &y)));
        assert!(registry.compatible(("a", &x), ("unseen", &y)));
    }
}
