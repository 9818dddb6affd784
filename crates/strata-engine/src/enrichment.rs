//! Post-assembly enrichment
//!
//! Runs after every committed output. Depending on the config and the
//! output's label it may:
//! - project the output to template space through a bold-to-template transform
//! - smooth it once per configured method
//! - z-score it, or Fisher-z it when it is a correlation map
//!
//! Every derived output is a fork of the committed one and its lineage
//! extends the committed lineage.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use strata_graph::{GraphError, NodeId, NodeSpec, OutputRef};
use strata_lineage::{label, Lineage, LineageKey};
use strata_pool::{Metadata, PutRequest};

use crate::context::{SkipEvent, SkipKind};
use crate::resolver::Committed;
use crate::{BuildContext, EngineError, PipelineConfig};

const FUNC_TO_TEMPLATE: [&str; 4] = [
    "registration_workflows",
    "functional_registration",
    "func_registration_to_template",
    "run",
];
const SMOOTHING: [&str; 2] = ["post_processing", "spatial_smoothing"];
const ZSCORING: [&str; 2] = ["post_processing", "z-scoring"];

/// Which labels each enrichment applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentPolicy {
    /// Derivatives computed in native space that get projected
    pub space_dependent: BTreeSet<String>,
    pub to_smooth: BTreeSet<String>,
    pub to_zscore: BTreeSet<String>,
    pub to_fisher_z: BTreeSet<String>,
    /// Resource holding the bold-to-template transform
    pub transform: String,
    /// Resource holding the template reference image
    pub template_reference: String,
}

fn key_path(base: &[&str], key: &str) -> Vec<String> {
    base.iter().chain([&key]).map(|s| (*s).to_string()).collect()
}

fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for EnrichmentPolicy {
    fn default() -> Self {
        Self {
            space_dependent: set_of(&["alff", "falff", "reho"]),
            to_smooth: set_of(&[
                "alff",
                "falff",
                "reho",
                "space-template_alff",
                "space-template_falff",
                "space-template_reho",
                "space-template_lfcd",
                "space-template_degree-centrality",
            ]),
            to_zscore: set_of(&[
                "alff",
                "falff",
                "reho",
                "space-template_alff",
                "space-template_falff",
                "space-template_reho",
                "space-template_lfcd",
                "space-template_degree-centrality",
            ]),
            to_fisher_z: set_of(&[
                "desc-MeanSCA_correlations",
                "desc-DualReg_correlations",
                "space-template_desc-MeanSCA_correlations",
                "space-template_desc-DualReg_correlations",
            ]),
            transform: "from-bold_to-template_mode-image_xfm".to_string(),
            template_reference: "T1w-brain-template-deriv".to_string(),
        }
    }
}

/// Enrichment switches read from the pipeline config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    pub project_to_template: bool,
    pub smoothing: bool,
    pub fwhm: Vec<f64>,
    pub smoothing_methods: Vec<String>,
    pub zscore: bool,
    pub policy: EnrichmentPolicy,
}

impl EnrichmentSettings {
    /// Everything off unless the config turns it on
    pub fn from_config(config: &PipelineConfig) -> Self {
        let fwhm = match config.get(&key_path(&SMOOTHING, "fwhm")) {
            Some(Value::Sequence(items)) => items.iter().filter_map(Value::as_f64).collect(),
            Some(value) => value.as_f64().into_iter().collect(),
            None => Vec::new(),
        };
        Self {
            project_to_template: config.flag(&FUNC_TO_TEMPLATE),
            smoothing: config.contains_str(&key_path(&SMOOTHING, "output"), "smoothed"),
            fwhm,
            smoothing_methods: config.strings_at(&key_path(&SMOOTHING, "smoothing_method")),
            zscore: config.contains_str(&key_path(&ZSCORING, "output"), "z-scored"),
            policy: EnrichmentPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: EnrichmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.project_to_template || self.smoothing || self.zscore
    }
}

/// Registration package that produced a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationTool {
    Ants,
    Fsl,
}

impl RegistrationTool {
    /// Infer the tool from the producers along a transform lineage
    pub fn detect(lineage: &Lineage) -> Option<Self> {
        lineage.flatten().iter().rev().find_map(|step| {
            let producer = step.producer().to_ascii_lowercase();
            if producer.contains("ants") {
                Some(Self::Ants)
            } else if producer.contains("fsl") {
                Some(Self::Fsl)
            } else {
                None
            }
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ants => "ants",
            Self::Fsl => "fsl",
        }
    }
}

/// Mask used when smoothing or z-scoring `output_label`
pub fn mask_for(output_label: &str) -> &'static str {
    if output_label.contains("centrality") || output_label.contains("lfcd") {
        "template-specification-file"
    } else if output_label.contains("space-template") {
        "space-template_res-derivative_desc-bold_mask"
    } else {
        "space-bold_desc-brain_mask"
    }
}

impl BuildContext {
    pub(crate) fn enrich(&mut self, committed: &Committed<'_>) -> Result<(), EngineError> {
        if !self.enrichment.is_enabled() {
            return Ok(());
        }
        let policy = &self.enrichment.policy;
        let project = self.enrichment.project_to_template
            && policy.space_dependent.contains(committed.label);
        let smooth = self.enrichment.smoothing && policy.to_smooth.contains(committed.label);
        let zscore = self.enrichment.zscore && policy.to_zscore.contains(committed.label);
        let fisher_z = self.enrichment.zscore && policy.to_fisher_z.contains(committed.label);

        if project {
            self.project_to_template(committed)?;
        }
        if smooth || zscore {
            match self.mask(committed) {
                Some(mask) => {
                    if smooth {
                        self.smooth(committed, &mask)?;
                    }
                    if zscore {
                        self.zscore(committed, &mask)?;
                    }
                }
                None => {
                    let mask = mask_for(committed.label);
                    self.skip_enrichment(
                        committed,
                        SkipKind::MissingInput,
                        format!("mask '{mask}' is not in the pool"),
                    );
                }
            }
        }
        if fisher_z {
            self.fisher_z(committed)?;
        }
        Ok(())
    }

    fn project_to_template(&mut self, committed: &Committed<'_>) -> Result<(), EngineError> {
        let transform = self.enrichment.policy.transform.clone();
        let reference_name = self.enrichment.policy.template_reference.clone();

        let candidates: Vec<Lineage> = match committed.metadata.lineage.find_upstream(&transform) {
            Some(chain) => vec![chain.clone()],
            None => self.pool.lineages(&transform).into_iter().cloned().collect(),
        };
        if candidates.is_empty() {
            let err = EngineError::MissingUpstreamTransform {
                label: committed.label.to_string(),
                transform,
            };
            self.skip_enrichment(committed, SkipKind::MissingUpstreamTransform, err.to_string());
            return Ok(());
        }
        let Ok(reference) = self.pool.get_data(&reference_name, None, true).cloned() else {
            self.skip_enrichment(
                committed,
                SkipKind::MissingInput,
                format!("template reference '{reference_name}' is not in the pool"),
            );
            return Ok(());
        };

        let projected = format!("space-template_{}", committed.label);
        for (num, chain) in candidates.into_iter().enumerate() {
            let xfm = self
                .pool
                .get_data(&transform, Some(&chain.key()), false)?
                .clone();
            let mut spec = NodeSpec::new(
                format!(
                    "{}_xfm_{}_{}_{num}",
                    committed.label, committed.node_name, committed.pipe_number
                ),
                "transform_derivative",
            )
            .with_param("label", committed.label);
            if let Some(tool) = RegistrationTool::detect(&chain) {
                spec = spec.with_param("reg_tool", tool.as_str());
            }
            let inputs = [
                (committed.output, "in_file"),
                (&reference, "reference"),
                (&xfm, "transform"),
            ];
            let Some(node) = self.add_enrichment_node(committed, spec, &inputs)? else {
                continue;
            };

            let mut metadata = committed.metadata.clone();
            metadata.lineage.push(chain);
            let producer = format!("{projected}_xfm_{num}");
            self.put_enriched(&projected, node.output("out_file"), metadata, &producer)?;
        }
        Ok(())
    }

    fn smooth(&mut self, committed: &Committed<'_>, mask: &OutputRef) -> Result<(), EngineError> {
        let smoothed = label::append_desc(committed.label, "sm");
        let fwhm = serde_json::Value::from(self.enrichment.fwhm.clone());
        for method in self.enrichment.smoothing_methods.clone() {
            let spec = NodeSpec::new(
                format!(
                    "{}_smooth_{method}_{}_{}",
                    committed.label, committed.node_name, committed.pipe_number
                ),
                "spatial_smoothing",
            )
            .with_param("fwhm", fwhm.clone())
            .with_param("method", method.as_str());
            let inputs = [(committed.output, "in_file"), (mask, "mask")];
            let Some(node) = self.add_enrichment_node(committed, spec, &inputs)? else {
                continue;
            };

            let producer = format!("spatial_smoothing_{method}");
            self.put_enriched(&smoothed, node.output("out_file"), committed.metadata.clone(), &producer)?;
            self.put_enriched("fwhm", node.output("fwhm"), committed.metadata.clone(), &producer)?;
        }
        Ok(())
    }

    fn zscore(&mut self, committed: &Committed<'_>, mask: &OutputRef) -> Result<(), EngineError> {
        let spec = NodeSpec::new(
            format!(
                "{}_zstd_{}_{}",
                committed.label, committed.node_name, committed.pipe_number
            ),
            "z_score_standardize",
        );
        let inputs = [(committed.output, "in_file"), (mask, "mask")];
        let Some(node) = self.add_enrichment_node(committed, spec, &inputs)? else {
            return Ok(());
        };
        self.put_enriched(
            &label::append_desc(committed.label, "zstd"),
            node.output("out_file"),
            committed.metadata.clone(),
            "zscore_standardize",
        )?;
        Ok(())
    }

    fn fisher_z(&mut self, committed: &Committed<'_>) -> Result<(), EngineError> {
        let timeseries_label = committed.label.replace("correlations", "timeseries");
        let Some(timeseries) = committed.siblings.get(&timeseries_label) else {
            self.skip_enrichment(
                committed,
                SkipKind::MissingInput,
                format!("'{timeseries_label}' was not produced alongside"),
            );
            return Ok(());
        };
        let spec = NodeSpec::new(
            format!(
                "{}_fisher_zstd_{}_{}",
                committed.label, committed.node_name, committed.pipe_number
            ),
            "fisher_z_score_standardize",
        )
        .with_param("label", committed.label);
        let inputs = [
            (committed.output, "correlation_file"),
            (timeseries, "timeseries_oned"),
        ];
        let Some(node) = self.add_enrichment_node(committed, spec, &inputs)? else {
            return Ok(());
        };
        self.put_enriched(
            &label::append_desc(committed.label, "zstd"),
            node.output("out_file"),
            committed.metadata.clone(),
            "fisher_zscore_standardize",
        )?;
        Ok(())
    }

    /// Add a node and wire its inputs, or skip it when it collides
    ///
    /// A duplicate node name or input port rolls the graph back to before
    /// the node and records a [`SkipKind::DuplicateConstruction`].
    fn add_enrichment_node(
        &mut self,
        committed: &Committed<'_>,
        spec: NodeSpec,
        inputs: &[(&OutputRef, &str)],
    ) -> Result<Option<NodeId>, EngineError> {
        let checkpoint = self.graph.checkpoint();
        match self.wire_node(spec, inputs) {
            Ok(node) => Ok(Some(node)),
            Err(e) if e.is_duplicate() => {
                self.graph.rollback_to(checkpoint);
                self.skip_enrichment(committed, SkipKind::DuplicateConstruction, e.to_string());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn wire_node(
        &mut self,
        spec: NodeSpec,
        inputs: &[(&OutputRef, &str)],
    ) -> Result<NodeId, GraphError> {
        let node = self.graph.add_node(spec)?;
        for (source, port) in inputs {
            self.graph.connect(source, node, *port)?;
        }
        Ok(node)
    }

    /// Mask along the committed lineage, else any variant in the pool
    fn mask(&self, committed: &Committed<'_>) -> Option<OutputRef> {
        let mask = mask_for(committed.label);
        committed
            .metadata
            .lineage
            .find_upstream(mask)
            .and_then(|chain| self.pool.get_record(mask, &chain.key()).ok())
            .map(|record| record.output.clone())
            .or_else(|| self.pool.get_data(mask, None, true).ok().cloned())
    }

    fn put_enriched(
        &mut self,
        name: &str,
        output: OutputRef,
        mut metadata: Metadata,
        producer: &str,
    ) -> Result<LineageKey, EngineError> {
        metadata.tag_fork(label::base_label(name), producer);
        let key = self.pool.put(
            PutRequest::new(name, output, producer)
                .with_metadata(metadata)
                .forking(true),
        )?;
        Ok(key)
    }

    fn skip_enrichment(&mut self, committed: &Committed<'_>, kind: SkipKind, reason: String) {
        tracing::warn!(
            block = %committed.node_name,
            resource = %committed.label,
            strategy = %committed.key.fingerprint(),
            reason = %reason,
            "skipping enrichment"
        );
        self.diagnostics.record(SkipEvent {
            block: committed.node_name.to_string(),
            strategy: Some(committed.key.fingerprint().to_string()),
            option: None,
            kind,
            reason,
        });
    }
}
