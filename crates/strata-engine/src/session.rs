//! Per-session builds
//!
//! Each session owns its own [`BuildContext`]. Sessions share nothing but
//! the immutable catalogue and configuration, so they run on separate
//! blocking tasks and a failure aborts only its own session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_graph::GraphDocument;
use strata_pool::Metadata;

use crate::ingress::{ingress_config_paths, ingress_prior_output, ingress_raw, IngressResource, TemplateEntry};
use crate::{
    gather_outputs, BuildContext, ConfigError, ConnectSummary, Diagnostics, EngineError, OutputEntry,
    OutputPolicy, Pipeline, PipelineConfig,
};

/// An output of a previous run to feed back in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorOutput {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<Metadata>,
}

/// Data for one subject/session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub id: String,
    #[serde(default)]
    pub resources: Vec<IngressResource>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub prior_outputs: Vec<PriorOutput>,
}

impl SessionSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<IngressResource>) -> Self {
        self.resources.push(resource.into());
        self
    }
}

/// Sessions file: the sessions to build and what to write out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub sessions: Vec<SessionSpec>,
    #[serde(default)]
    pub outputs: OutputPolicy,
}

impl SessionManifest {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

/// Result of one successful session build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub id: String,
    pub summary: ConnectSummary,
    pub graph: GraphDocument,
    pub outputs: Vec<OutputEntry>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub id: String,
    pub result: Result<BuildReport, EngineError>,
}

/// Build one session: ingress, connect every stage, gather outputs
///
/// # Errors
/// The first fatal error of the build.
pub fn build_session(
    pipeline: &Pipeline,
    config: Arc<PipelineConfig>,
    session: &SessionSpec,
    policy: &OutputPolicy,
) -> Result<BuildReport, EngineError> {
    let span = tracing::info_span!("session", id = %session.id);
    let _guard = span.enter();

    let mut ctx = BuildContext::new(session.id.as_str(), config);
    for resource in &session.resources {
        ingress_raw(&mut ctx, resource)?;
    }
    ingress_config_paths(&mut ctx, &session.templates)?;
    for prior in &session.prior_outputs {
        ingress_prior_output(&mut ctx, &prior.path, prior.sidecar.clone())?;
    }

    let summary = pipeline.build(&mut ctx)?;
    ctx.graph.validate()?;
    let outputs = gather_outputs(&ctx.pool, policy);

    tracing::info!(
        nodes = ctx.graph.node_count(),
        edges = ctx.graph.edge_count(),
        outputs = outputs.len(),
        skipped = ctx.diagnostics.skips.len(),
        "session built"
    );
    Ok(BuildReport {
        id: session.id.clone(),
        summary,
        graph: ctx.graph.to_document(),
        outputs,
        diagnostics: ctx.diagnostics,
    })
}

/// Build every session in parallel; outcomes come back in input order
pub async fn build_sessions(
    pipeline: Arc<Pipeline>,
    config: Arc<PipelineConfig>,
    sessions: Vec<SessionSpec>,
    policy: Arc<OutputPolicy>,
) -> Vec<SessionOutcome> {
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|session| {
            let id = session.id.clone();
            let pipeline = Arc::clone(&pipeline);
            let config = Arc::clone(&config);
            let policy = Arc::clone(&policy);
            let handle = tokio::task::spawn_blocking(move || {
                build_session(&pipeline, config, &session, &policy)
            });
            (id, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::SessionAborted {
                session: id.clone(),
                reason: e.to_string(),
            }),
        };
        if let Err(e) = &result {
            tracing::error!(session = %id, error = %e, "session failed");
        }
        outcomes.push(SessionOutcome { id, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_from_yaml() {
        let manifest = SessionManifest::from_yaml_str(
            r"
sessions:
  - id: sub-01_ses-1
    resources: [{name: T1w, path: /data/sub-01/anat/T1w.nii.gz}, {name: bold, producer: func_ingress}]
    prior_outputs:
      - path: /out/sub-01_ses-1/anat/sub-01_ses-1_desc-brain_T1w.nii.gz
        sidecar: {Lineage: ['T1w:anat_ingress', 'desc-brain_T1w:brain_extraction']}
outputs:
  func: [desc-preproc_bold]
",
        )
        .unwrap();
        let session = &manifest.sessions[0];
        assert_eq!(session.resources[0].producer, "ingress");
        assert_eq!(session.resources[1].producer, "func_ingress");
        assert_eq!(
            session.prior_outputs[0].sidecar.as_ref().unwrap().lineage.len(),
            2
        );
        assert!(manifest.outputs.func.contains("desc-preproc_bold"));
        assert!(manifest.outputs.include_other);
    }
}
