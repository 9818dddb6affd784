//! Record metadata

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_lineage::Lineage;

/// Metadata attached to every resource record
///
/// Serialized with PascalCase keys; this is the sidecar JSON written next
/// to each materialized output and read back when prior outputs are
/// ingested. Stage-specific fields land in [`Metadata::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    /// Authoritative lineage chain
    #[serde(default)]
    pub lineage: Lineage,

    /// Base resource name -> stage ids that forked on it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fork: BTreeMap<String, Vec<String>>,

    /// Resources consumed by the producing invocation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    /// Set only on freshly ingested data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_sources: Vec<String>,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Resolution of the data, numeric or textual
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<serde_json::Value>,

    /// Template the data is aligned to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Any other field
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// Metadata carrying only a lineage
    #[must_use]
    pub fn with_lineage(lineage: Lineage) -> Self {
        Self {
            lineage,
            ..Self::default()
        }
    }

    /// Set the description
    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True when no field at all is set
    #[must_use]
    pub fn is_bare(&self) -> bool {
        *self == Self::default()
    }

    /// True if `label` forked any resource on the way to this record
    #[must_use]
    pub fn applies(&self, label: &str) -> bool {
        self.fork.values().flatten().any(|l| l == label)
    }

    /// Every fork label, in key order
    pub fn fork_labels(&self) -> impl Iterator<Item = &str> {
        self.fork.values().flatten().map(String::as_str)
    }

    /// Record that `label` forked `resource`; labels accumulate, never repeat
    pub fn tag_fork(&mut self, resource: impl Into<String>, label: impl Into<String>) {
        let label = label.into();
        let labels = self.fork.entry(resource.into()).or_default();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    /// Take fork tags from `other` for resources not yet tagged here
    pub fn adopt_forks(&mut self, other: &Self) {
        for (resource, labels) in &other.fork {
            self.fork
                .entry(resource.clone())
                .or_insert_with(|| labels.clone());
        }
    }

    /// Collapse runs of whitespace in the description
    pub fn normalize_description(&mut self) {
        if let Some(text) = self.description.as_mut() {
            *text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }

    /// Sidecar JSON
    #[must_use]
    pub fn to_sidecar(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn sidecar_uses_pascal_case_and_keeps_extras() {
        let sidecar = json!({
            "Lineage": ["T1w:anat_ingress", "desc-brain_T1w:brain_extraction"],
            "Fork": {"T1w": ["brain_extraction"]},
            "Description": "skull stripped",
            "SkullStripped": true
        });
        let meta: Metadata = serde_json::from_value(sidecar.clone()).unwrap();
        assert_eq!(meta.lineage.len(), 2);
        assert_eq!(meta.extra["SkullStripped"], json!(true));
        assert!(meta.applies("brain_extraction"));
        assert_eq!(meta.to_sidecar(), sidecar);
    }

    #[test]
    fn fork_tags_accumulate_without_repeats() {
        let mut meta = Metadata::default();
        meta.tag_fork("bold", "nuisance_a");
        meta.tag_fork("bold", "nuisance_a");
        meta.tag_fork("bold", "nuisance_b");
        assert_eq!(meta.fork["bold"], vec!["nuisance_a", "nuisance_b"]);
    }

    #[test]
    fn adopt_forks_keeps_first_writer() {
        let mut a = Metadata::default();
        a.tag_fork("bold", "x");
        let mut b = Metadata::default();
        b.tag_fork("bold", "y");
        b.tag_fork("T1w", "z");
        a.adopt_forks(&b);
        assert_eq!(a.fork["bold"], vec!["x"]);
        assert_eq!(a.fork["T1w"], vec!["z"]);
    }

    #[test]
    fn description_whitespace_is_collapsed() {
        let mut meta = Metadata::default().described("  mean   of\n  the\tseries ");
        meta.normalize_description();
        assert_eq!(meta.description.as_deref(), Some("mean of the series"));
    }

    #[test]
    fn default_is_bare() {
        assert!(Metadata::default().is_bare());
        assert!(!Metadata::default().described("x").is_bare());
    }
}
