//! Catalogues, ingress and whole-session builds

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata_engine::ingress::{ingress_config_paths, ingress_prior_output, EXTERNAL_ORIGIN};
use strata_engine::prelude::*;
use strata_engine::{
    build_session, build_sessions, OutputPolicy, Pipeline, PriorOutput, SessionSpec, SkipKind,
    TemplateEntry,
};
use strata_lineage::{Lineage, Step};
use strata_pool::PoolError;
use strata_test_utils::{config_from_yaml, context_with, producers};

const CATALOGUE: &str = r"
stages:
  - name: anatomical
    blocks:
      - {name: reorient, config: None, switch: None, option_key: None, option_val: None, inputs: [T1w], outputs: [desc-reorient_T1w]}
  - name: functional
    skip_if_present: [desc-preproc_bold]
    blocks:
      - {name: func_preproc, config: None, switch: None, option_key: None, option_val: None, inputs: [bold, T1w], outputs: [desc-preproc_bold]}
";

fn pipeline() -> Pipeline {
    Pipeline::from_yaml_str(CATALOGUE).unwrap()
}

fn path_list(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| (*p).to_string()).collect()
}

#[test]
fn stage_is_skipped_when_its_outputs_exist() {
    let mut ctx = context_with("sub-01", "", &["T1w", "bold", "desc-preproc_bold"]);
    let summary = pipeline().build(&mut ctx).unwrap();

    assert_eq!(summary.committed, 1);
    assert!(!ctx.graph.contains("func_preproc_1"));
    assert_eq!(ctx.diagnostics.count(SkipKind::AlreadyPresent), 1);
    assert_eq!(ctx.diagnostics.for_block("functional").count(), 1);
}

#[test]
fn template_paths_from_config() {
    let mut ctx = context_with(
        "sub-01",
        "templates: {brain: /tpl/brain.nii.gz, res: 2mm, unset: null}",
        &[],
    );
    let entries = [
        TemplateEntry {
            resource: "T1w-brain-template".into(),
            path: path_list(&["templates", "brain"]),
            resolution: Some(path_list(&["templates", "res"])),
            description: Some("MNI152".into()),
        },
        TemplateEntry {
            resource: "T1w-template".into(),
            path: path_list(&["templates", "unset"]),
            resolution: None,
            description: None,
        },
    ];
    let keys = ingress_config_paths(&mut ctx, &entries).unwrap();
    assert_eq!(keys.len(), 1);
    assert!(!ctx.pool.contains("T1w-template"));

    let record = ctx.pool.get_record("T1w-brain-template", &keys[0]).unwrap();
    assert_eq!(record.metadata.description.as_deref(), Some("MNI152 - /tpl/brain.nii.gz"));
    assert_eq!(record.metadata.resolution, Some(serde_json::json!("2mm")));
    assert_eq!(record.output.port, "resampled_template");
    let graph = ctx.graph.to_document();
    assert_eq!(graph.node("resampled_T1w-brain-template").unwrap().kind, "resample_template");
    assert_eq!(
        producers(&ctx.pool, "T1w-brain-template"),
        vec![vec!["template_resample"]]
    );
}

#[test]
fn prior_output_without_sidecar_is_external() {
    let mut ctx = context_with("sub-01", "", &[]);
    let key = ingress_prior_output(
        &mut ctx,
        Path::new("/out/sub-01/anat/sub-01_desc-brain-2_T1w.nii.gz"),
        None,
    )
    .unwrap();

    assert_eq!(producers(&ctx.pool, "desc-brain_T1w"), vec![vec![EXTERNAL_ORIGIN]]);
    let record = ctx.pool.get_record("desc-brain_T1w", &key).unwrap();
    assert!(record.metadata.description.is_some());
    assert!(ctx.graph.contains("gather_desc-brain_T1w_0"));
}

#[test]
fn prior_output_keeps_sidecar_lineage() {
    let mut ctx = context_with("sub-01", "", &[]);
    let lineage = Lineage::from_steps([
        Step::new("T1w", "anat_ingress").unwrap(),
        Step::new("desc-brain_T1w", "brain_extraction").unwrap(),
    ]);
    let key = ingress_prior_output(
        &mut ctx,
        Path::new("sub-01_desc-brain_T1w.nii.gz"),
        Some(Metadata::with_lineage(lineage.clone())),
    )
    .unwrap();
    assert_eq!(key, lineage.key());
    let record = ctx.pool.get_record("desc-brain_T1w", &key).unwrap();
    assert!(record.metadata.description.is_none());
}

#[test]
fn session_report_lists_outputs() {
    let session = SessionSpec::new("sub-01")
        .with_resource("T1w")
        .with_resource("bold");
    let report = build_session(
        &pipeline(),
        config_from_yaml(""),
        &session,
        &OutputPolicy::default(),
    )
    .unwrap();

    assert_eq!(report.summary.committed, 2);
    let labels: Vec<_> = report.outputs.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["desc-reorient_T1w", "desc-preproc_bold"]);
    assert_eq!(report.outputs[0].filename, "sub-01_desc-reorient_T1w");
    assert_eq!(report.graph.name, "pipeline_sub-01");
    assert!(report.diagnostics.is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["id"], "sub-01");
}

#[test]
fn prior_outputs_skip_their_stage() {
    let mut session = SessionSpec::new("sub-02").with_resource("T1w");
    session.prior_outputs.push(PriorOutput {
        path: "sub-02_desc-preproc_bold.nii.gz".into(),
        sidecar: None,
    });
    let report = build_session(
        &pipeline(),
        config_from_yaml(""),
        &session,
        &OutputPolicy::default(),
    )
    .unwrap();
    assert_eq!(report.diagnostics.count(SkipKind::AlreadyPresent), 1);
}

#[tokio::test]
async fn sessions_fail_independently() {
    let sessions = vec![
        SessionSpec::new("sub-01")
            .with_resource("T1w")
            .with_resource("bold"),
        SessionSpec::new("sub-02").with_resource("bold"),
        SessionSpec::new("sub-03").with_resource("T1w"),
    ];
    let outcomes = build_sessions(
        Arc::new(pipeline()),
        config_from_yaml(""),
        sessions,
        Arc::new(OutputPolicy::default()),
    )
    .await;

    let ids: Vec<_> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["sub-01", "sub-02", "sub-03"]);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        &outcomes[1].result,
        Err(EngineError::Pool(PoolError::NoStrategiesFound { .. }))
    ));
    assert!(matches!(
        &outcomes[2].result,
        Err(EngineError::Pool(PoolError::ResourceNotFound { names })) if names == &["bold"]
    ));
}

#[test]
fn manifest_and_config_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("sessions.yml");
    std::fs::write(
        &manifest_path,
        "sessions: [{id: sub-01, resources: [{name: T1w}, {name: bold}]}]\noutputs: {include_other: false, anat: [desc-reorient_T1w]}\n",
    )
    .unwrap();
    let config_path = dir.path().join("pipeline.yml");
    std::fs::write(&config_path, "pipeline_setup: {name: test}\n").unwrap();

    let manifest = strata_engine::SessionManifest::from_path(&manifest_path).unwrap();
    let config = PipelineConfig::from_path(&config_path).unwrap();
    let report = build_session(
        &pipeline(),
        Arc::new(config),
        &manifest.sessions[0],
        &manifest.outputs,
    )
    .unwrap();
    let written: Vec<_> = report
        .outputs
        .iter()
        .map(|o| (o.subdir.as_str(), o.label.as_str()))
        .collect();
    assert_eq!(written, vec![("anat", "desc-reorient_T1w")]);

    let missing = strata_engine::SessionManifest::from_path(dir.path().join("absent.yml"));
    assert!(matches!(missing, Err(strata_engine::ConfigError::Io { .. })));
}
