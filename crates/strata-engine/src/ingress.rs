//! Data entering a build from outside the graph
//!
//! Raw inputs, outputs of a previous run and template files named in the
//! pipeline config. All of them are injected: they carry no upstream
//! provenance besides what their sidecar says.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_graph::NodeSpec;
use strata_lineage::{label, Lineage, LineageKey, Step};
use strata_pool::{Metadata, PutRequest};

use crate::block::ConfigPath;
use crate::{BuildContext, EngineError};

/// Producer of prior outputs that come without a sidecar lineage
pub const EXTERNAL_ORIGIN: &str = "External Origin";

const EXTERNAL_DESCRIPTION: &str = "This data was generated elsewhere and supplied by \
the user into this run's output directory. This metadata was generated automatically \
because no sidecar was supplied with the data.";

/// File extensions stripped from prior output names
const EXTENSIONS: [&str; 8] = [".nii", ".gz", ".mat", ".1D", ".txt", ".csv", ".rms", ".mgz"];

/// A raw input resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressResource {
    pub name: String,
    #[serde(default = "default_producer")]
    pub producer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Metadata::is_bare")]
    pub metadata: Metadata,
}

fn default_producer() -> String {
    "ingress".to_string()
}

impl From<&str> for IngressResource {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            producer: default_producer(),
            path: None,
            metadata: Metadata::default(),
        }
    }
}

/// A template file named by a config path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub resource: String,
    /// Config path holding the file location
    pub path: ConfigPath,
    /// Config path holding the intended resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConfigPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Add a datasource node and inject the resource it provides
///
/// # Errors
/// Duplicate node names and invalid resource names.
pub fn ingress_raw(ctx: &mut BuildContext, resource: &IngressResource) -> Result<LineageKey, EngineError> {
    let mut spec = NodeSpec::new(format!("{}_{}", resource.name, resource.producer), "datasource");
    if let Some(path) = &resource.path {
        spec = spec.with_param("data", path.display().to_string());
    }
    let node = ctx.graph.add_node(spec)?;
    let key = ctx.pool.put(
        PutRequest::new(resource.name.as_str(), node.output("data"), resource.producer.as_str())
            .with_metadata(resource.metadata.clone())
            .injected(),
    )?;
    tracing::debug!(resource = %resource.name, key = %key.fingerprint(), "ingressed raw data");
    Ok(key)
}

/// Resource label of a prior output file
///
/// Strips the directory, known extensions, the `{unique_id}_` prefix,
/// `task-`/`run-` tags and the ordinal of a numbered variant.
///
/// # Errors
/// [`EngineError::MalformedOutputLabel`] when nothing is left, or the file
/// does not belong to `unique_id`.
pub fn prior_output_label(path: &Path, unique_id: &str) -> Result<String, EngineError> {
    let malformed = |reason: &str| EngineError::MalformedOutputLabel {
        label: path.display().to_string(),
        reason: reason.to_string(),
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| malformed("no file name"))?;
    let stem = EXTENSIONS
        .iter()
        .fold(file_name.to_string(), |name, ext| name.replace(ext, ""));

    let label = stem
        .strip_prefix(unique_id)
        .map(|rest| rest.trim_start_matches('_'))
        .ok_or_else(|| malformed("file does not start with the session id"))?;
    let label = label::strip_variant_number(&label::strip_tags(label, &["task", "run"]));
    if label.is_empty() {
        return Err(malformed("empty label"));
    }
    Ok(label)
}

/// Inject one output of a previous run
///
/// The sidecar lineage is kept as is; without one the lineage is
/// `[label:External Origin]` and a default description is set.
///
/// # Errors
/// Label parsing, duplicate node names and pool writes.
pub fn ingress_prior_output(
    ctx: &mut BuildContext,
    path: &Path,
    sidecar: Option<Metadata>,
) -> Result<LineageKey, EngineError> {
    let resource = prior_output_label(path, ctx.id())?;

    let mut metadata = sidecar.unwrap_or_default();
    if metadata.lineage.is_empty() {
        metadata.lineage = Lineage::from_steps([Step::new(resource.as_str(), EXTERNAL_ORIGIN)?]);
        if metadata.description.is_none() {
            metadata.description = Some(EXTERNAL_DESCRIPTION.to_string());
        }
    }

    let node_name = format!("gather_{resource}_{}", ctx.graph.node_count());
    let node = ctx.graph.add_node(
        NodeSpec::new(node_name, "datasource").with_param("data", path.display().to_string()),
    )?;
    let key = ctx.pool.put(
        PutRequest::new(resource.as_str(), node.output("data"), EXTERNAL_ORIGIN)
            .with_metadata(metadata)
            .injected(),
    )?;
    tracing::debug!(resource = %resource, key = %key.fingerprint(), "ingressed prior output");
    Ok(key)
}

/// Inject template files named in the config
///
/// Entries whose path is unset are skipped. With a resolution path, the
/// file goes through a resampling node.
///
/// # Errors
/// Duplicate node names and pool writes.
pub fn ingress_config_paths(
    ctx: &mut BuildContext,
    templates: &[TemplateEntry],
) -> Result<Vec<LineageKey>, EngineError> {
    let mut keys = Vec::new();
    for entry in templates {
        let Some(location) = ctx
            .config
            .get(&entry.path)
            .and_then(serde_yaml::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            tracing::debug!(resource = %entry.resource, "template path not set");
            continue;
        };

        let mut metadata = Metadata::default();
        if let Some(description) = &entry.description {
            metadata.description = Some(format!("{description} - {location}"));
        }

        let resolution = entry
            .resolution
            .as_ref()
            .and_then(|path| ctx.config.get(path))
            .map(|value| serde_json::to_value(value).unwrap_or(serde_json::Value::Null));

        let (spec, port, producer) = match resolution {
            Some(resolution) => {
                metadata.resolution = Some(resolution.clone());
                (
                    NodeSpec::new(format!("resampled_{}", entry.resource), "resample_template")
                        .with_param("template", location.as_str())
                        .with_param("template_name", entry.resource.as_str())
                        .with_param("resolution", resolution),
                    "resampled_template",
                    "template_resample",
                )
            }
            None => (
                NodeSpec::new(format!("{}_config_ingress", entry.resource), "datasource")
                    .with_param("data", location.as_str()),
                "data",
                "template_ingress",
            ),
        };
        let node = ctx.graph.add_node(spec)?;
        keys.push(ctx.pool.put(
            PutRequest::new(entry.resource.as_str(), node.output(port), producer)
                .with_metadata(metadata)
                .injected(),
        )?);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ID: &str = "sub-01_ses-1";

    #[test]
    fn prior_output_labels() {
        let cases = [
            ("out/func/sub-01_ses-1_task-rest_run-1_desc-preproc-2_bold.nii.gz", "desc-preproc_bold"),
            ("sub-01_ses-1_space-template_desc-brain_mask.nii.gz", "space-template_desc-brain_mask"),
            ("sub-01_ses-1_from-bold_to-template_mode-image_xfm.mat", "from-bold_to-template_mode-image_xfm"),
            ("sub-01_ses-1_desc-3_alff.nii.gz", "alff"),
        ];
        for (path, expected) in cases {
            assert_eq!(prior_output_label(Path::new(path), ID).unwrap(), expected, "{path}");
        }
    }

    #[test]
    fn foreign_or_empty_labels_are_rejected() {
        for path in ["sub-02_ses-1_bold.nii.gz", "sub-01_ses-1.nii.gz"] {
            assert!(matches!(
                prior_output_label(Path::new(path), ID),
                Err(EngineError::MalformedOutputLabel { .. })
            ));
        }
    }
}
