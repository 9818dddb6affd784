//! Node block resolution
//!
//! For every block of a group:
//! - resolve its options against the config (none: the block is inert)
//! - evaluate its switch (no `true` branch: inert)
//! - combine its inputs into strategies, once per block
//! - invoke the body for each strategy and option
//! - commit each output to the pool, then enrich it

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use strata_graph::OutputRef;
use strata_lineage::{label, LineageKey};
use strata_pool::{Metadata, PoolError, PutRequest, StrategyPool};

use crate::context::{SkipEvent, SkipKind};
use crate::stage::StageOutputs;
use crate::{
    BlockDecl, BlockGroup, BlockOption, BuildContext, ConfigError, EngineError, Invocation,
    NodeBlock, OptionAxis, PipelineConfig, Switch,
};

/// Counters of one [`BuildContext::connect`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSummary {
    /// Strategies combined across every block of the group
    pub strategies: usize,
    /// Stage bodies applied, one per strategy and option
    pub invocations: usize,
    /// Outputs written to the pool, enrichment excluded
    pub committed: usize,
    /// Invocations skipped for duplicate construction or empty outputs
    pub skipped: usize,
}

/// A committed output, as enrichment sees it
#[derive(Debug)]
pub(crate) struct Committed<'a> {
    /// Producer id of the invocation
    pub(crate) node_name: &'a str,
    pub(crate) label: &'a str,
    pub(crate) output: &'a OutputRef,
    pub(crate) key: LineageKey,
    pub(crate) metadata: Metadata,
    pub(crate) pipe_number: usize,
    /// Every output of the same invocation
    pub(crate) siblings: &'a StageOutputs,
}

impl BuildContext {
    /// Connect a block, or a group of alternative blocks, to the graph
    ///
    /// # Errors
    /// Config lookups, combination failures, stage failures other than
    /// duplicate construction, undeclared outputs and pool writes.
    pub fn connect(&mut self, group: &BlockGroup) -> Result<ConnectSummary, EngineError> {
        let options = group
            .blocks()
            .iter()
            .map(|block| active_options(block.decl(), &self.config))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let all_opts: usize = options.iter().map(Vec::len).sum();

        let mut summary = ConnectSummary::default();
        for (block, block_options) in group.blocks().iter().zip(&options) {
            self.connect_block(block, block_options, all_opts, &mut summary)?;
        }
        Ok(summary)
    }

    /// Connect a single block
    ///
    /// # Errors
    /// See [`BuildContext::connect`].
    pub fn connect_one(&mut self, block: &NodeBlock) -> Result<ConnectSummary, EngineError> {
        self.connect(&BlockGroup::from(block.clone()))
    }

    fn connect_block(
        &mut self,
        block: &NodeBlock,
        options: &[BlockOption],
        all_opts: usize,
        summary: &mut ConnectSummary,
    ) -> Result<(), EngineError> {
        let decl = block.decl();
        // options before the switch, so a bad option key fails even when switched off
        if options.is_empty() {
            self.skip_inert(decl, "no active option");
            return Ok(());
        }

        let switch = evaluate_switch(&decl.switch, &self.config)?;
        if !switch.contains(&true) {
            self.skip_inert(decl, "switched off");
            return Ok(());
        }
        let is_fork = switch.contains(&false) || options.len() > 1 || all_opts > 1;

        tracing::info!(block = %decl.name, options = options.len(), fork = is_fork, "connecting block");

        let strategies = self.pool.strategies(&decl.inputs)?;
        summary.strategies += strategies.len();

        for mut strategy in strategies {
            let pipe_number = self.pool.register_key(strategy.key());
            let aliases = apply_interface(block, &mut strategy)?;
            tracing::debug!(
                block = %decl.name,
                strategy = %strategy.key().fingerprint(),
                pipe_number,
                inputs = ?strategy.names().collect::<Vec<_>>(),
                "resolved strategy"
            );

            for option in options {
                let node_name = node_name(decl, option);
                let checkpoint = self.graph.checkpoint();
                let result = {
                    let mut invocation = Invocation::new(
                        decl,
                        &node_name,
                        option,
                        pipe_number,
                        &strategy,
                        &self.config,
                        &mut self.graph,
                    );
                    block.body().apply(&mut invocation)
                };
                summary.invocations += 1;

                let outputs = match result {
                    Ok(outputs) => outputs,
                    Err(e) if e.is_duplicate_construction() => {
                        self.graph.rollback_to(checkpoint);
                        tracing::warn!(
                            block = %decl.name,
                            node = %node_name,
                            strategy = %strategy.key().fingerprint(),
                            error = %e,
                            "skipping invocation"
                        );
                        self.diagnostics.record(SkipEvent {
                            block: decl.name.clone(),
                            strategy: Some(strategy.key().fingerprint().to_string()),
                            option: option.name().map(str::to_string),
                            kind: SkipKind::DuplicateConstruction,
                            reason: e.to_string(),
                        });
                        summary.skipped += 1;
                        continue;
                    }
                    Err(source) => {
                        return Err(EngineError::Stage {
                            node: node_name,
                            source,
                        })
                    }
                };

                if outputs.is_empty() {
                    self.diagnostics.record(SkipEvent {
                        block: decl.name.clone(),
                        strategy: Some(strategy.key().fingerprint().to_string()),
                        option: option.name().map(str::to_string),
                        kind: SkipKind::EmptyOutputs,
                        reason: "stage produced no outputs".into(),
                    });
                    summary.skipped += 1;
                    continue;
                }

                for (output_label, output) in &outputs {
                    let (key, metadata) = self.commit(
                        decl,
                        &node_name,
                        output_label,
                        output,
                        &strategy,
                        &aliases,
                        is_fork,
                    )?;
                    summary.committed += 1;
                    self.enrich(&Committed {
                        node_name: &node_name,
                        label: output_label,
                        output,
                        key,
                        metadata,
                        pipe_number,
                        siblings: &outputs,
                    })?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        decl: &BlockDecl,
        node_name: &str,
        output_label: &str,
        output: &OutputRef,
        strategy: &StrategyPool,
        aliases: &[String],
        is_fork: bool,
    ) -> Result<(LineageKey, Metadata), EngineError> {
        let declared = decl
            .outputs
            .get(output_label)
            .ok_or_else(|| EngineError::UndeclaredOutput {
                block: decl.name.clone(),
                label: output_label.to_string(),
            })?;

        let mut metadata = strategy.merged_metadata().clone();
        metadata.raw_sources.clear();
        if let Some(flag) = strategy
            .metadata_for_type(label::data_type(output_label))
            .and_then(|m| m.extra.get("SkullStripped"))
        {
            metadata
                .extra
                .insert("SkullStripped".to_string(), flag.clone());
        }

        metadata.sources = strategy
            .names()
            .filter(|name| !aliases.iter().any(|a| a == name))
            .map(str::to_string)
            .collect();

        metadata.description.clone_from(&declared.description);
        for (field, value) in &declared.extra {
            metadata.extra.insert(field.clone(), value.clone());
        }
        if let Some(template) = &declared.template {
            metadata.template = Some(template.clone());
            if let Some((_, source)) = strategy.get_optional(template.as_str()) {
                if metadata.sources.contains(template) {
                    if let Some(description) = &source.metadata.description {
                        metadata.template = Some(description.clone());
                    }
                }
                if let Some(resolution) = &source.metadata.resolution {
                    metadata.resolution = Some(resolution.clone());
                }
            }
        }
        metadata.normalize_description();

        if is_fork {
            metadata.tag_fork(label::base_label(output_label), node_name);
        }

        let key = self.pool.put(
            PutRequest::new(output_label, output.clone(), node_name)
                .with_metadata(metadata)
                .forking(is_fork),
        )?;
        let committed = self.pool.get_record(output_label, &key)?.metadata.clone();
        Ok((key, committed))
    }

    fn skip_inert(&mut self, decl: &BlockDecl, reason: &str) {
        tracing::debug!(block = %decl.name, reason, "block is inert");
        self.diagnostics.record(SkipEvent {
            block: decl.name.clone(),
            strategy: None,
            option: None,
            kind: SkipKind::Inert,
            reason: reason.to_string(),
        });
    }
}

/// Options of a block that the config selects
///
/// # Errors
/// [`ConfigError::MissingKey`] when a selection key is absent.
pub fn active_options(
    decl: &BlockDecl,
    config: &PipelineConfig,
) -> Result<Vec<BlockOption>, ConfigError> {
    Ok(match &decl.options {
        OptionAxis::Single => vec![BlockOption::Default],
        OptionAxis::Choice { key, values } => {
            config.lookup(key)?;
            let selected = config.strings_at(key);
            values
                .iter()
                .filter(|value| selected.contains(value))
                .map(|value| BlockOption::Named(value.clone()))
                .collect()
        }
        OptionAxis::UserDefined { key } => match config.lookup(key)? {
            Value::Null => Vec::new(),
            Value::Sequence(entries) => entries.iter().cloned().map(BlockOption::Custom).collect(),
            entry => vec![BlockOption::Custom(entry.clone())],
        },
        OptionAxis::Flags(paths) => paths
            .iter()
            .filter(|path| config.has_member(path.as_slice()))
            .filter_map(|path| path.last())
            .map(|flag| BlockOption::Named(flag.clone()))
            .collect(),
    })
}

/// Branches of a switch: on, off, or both for a forking switch
///
/// # Errors
/// [`ConfigError`] when a switch path is absent or not boolean.
pub fn evaluate_switch(switch: &Switch, config: &PipelineConfig) -> Result<Vec<bool>, ConfigError> {
    match switch {
        Switch::Always => Ok(vec![true]),
        Switch::Fixed(on) => Ok(vec![*on]),
        Switch::Path(path) => branches(config, path),
        Switch::AllOf(paths) => {
            for path in paths {
                if !branches(config, path)?.contains(&true) {
                    return Ok(vec![false]);
                }
            }
            Ok(vec![true])
        }
    }
}

fn branches(config: &PipelineConfig, path: &[String]) -> Result<Vec<bool>, ConfigError> {
    const EXPECTED: &str = "a boolean or a list of booleans";
    match config.lookup(path)? {
        Value::Null => Ok(vec![false]),
        Value::Bool(on) => Ok(vec![*on]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.as_bool().ok_or_else(|| ConfigError::mismatch(path, EXPECTED)))
            .collect(),
        _ => Err(ConfigError::mismatch(path, EXPECTED)),
    }
}

pub(crate) fn node_name(decl: &BlockDecl, option: &BlockOption) -> String {
    match (option, option.name()) {
        (BlockOption::Named(_), Some(name)) if decl.options.declared_count() > 1 => {
            format!("{}_{name}", decl.name)
        }
        (BlockOption::Custom(_), Some(name)) => format!("{}_{name}", decl.name),
        _ => decl.name.clone(),
    }
}

/// Expose interface inputs under their declared names; returns the aliases
fn apply_interface(block: &NodeBlock, strategy: &mut StrategyPool) -> Result<Vec<String>, PoolError> {
    let mut aliases = Vec::new();
    for (expected, actual) in block.interface() {
        let Some(resolved) = strategy.get_optional(actual).map(|(name, _)| name.to_string()) else {
            continue;
        };
        if resolved == *expected {
            continue;
        }
        strategy.alias(expected, actual)?;
        aliases.push(expected.clone());
    }
    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(yaml: &str) -> BlockDecl {
        BlockDecl::from_yaml_str(yaml).unwrap()
    }

    const CONFIG: &str = r"
anatomical_preproc:
  brain_extraction:
    run: [true, false]
    using: [BET]
    FSL-BET:
      frac: 0.5
  acpc_alignment:
    run: null
segmentation:
  thresholds:
    - {Name: low, value: 0.3}
    - {Name: high, value: 0.7}
";

    fn config() -> PipelineConfig {
        PipelineConfig::from_yaml_str(CONFIG).unwrap()
    }

    #[test]
    fn choice_intersects_selection() {
        let d = decl("{name: be, config: [anatomical_preproc, brain_extraction], switch: [run], option_key: using, option_val: [3dSkullStrip, BET], inputs: [T1w], outputs: [desc-brain_T1w]}");
        let options = active_options(&d, &config()).unwrap();
        assert_eq!(options, vec![BlockOption::Named("BET".into())]);
        assert_eq!(node_name(&d, &options[0]), "be_BET");
        assert_eq!(evaluate_switch(&d.switch, &config()).unwrap(), vec![true, false]);
    }

    #[test]
    fn user_defined_and_flag_options() {
        let d = decl("{name: seg, config: [segmentation], switch: true, option_key: thresholds, option_val: USER-DEFINED, inputs: [T1w], outputs: [label-CSF_mask]}");
        let options = active_options(&d, &config()).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(node_name(&d, &options[1]), "seg_high");

        let flags = decl("{name: be, config: [anatomical_preproc, brain_extraction], switch: None, option_key: [[FSL-BET], [niworkflows-ants]], option_val: None, inputs: [T1w], outputs: [desc-brain_T1w]}");
        assert_eq!(
            active_options(&flags, &config()).unwrap(),
            vec![BlockOption::Named("FSL-BET".into())]
        );
    }

    #[test]
    fn switch_forms() {
        let cfg = config();
        let null = Switch::Path(vec!["anatomical_preproc".into(), "acpc_alignment".into(), "run".into()]);
        assert_eq!(evaluate_switch(&null, &cfg).unwrap(), vec![false]);

        let all = Switch::AllOf(vec![
            vec!["anatomical_preproc".into(), "brain_extraction".into(), "run".into()],
            vec!["anatomical_preproc".into(), "acpc_alignment".into(), "run".into()],
        ]);
        assert_eq!(evaluate_switch(&all, &cfg).unwrap(), vec![false]);

        let missing = Switch::Path(vec!["nope".into()]);
        assert!(matches!(
            evaluate_switch(&missing, &cfg),
            Err(ConfigError::MissingKey { .. })
        ));

        let not_bool = Switch::Path(vec![
            "anatomical_preproc".into(),
            "brain_extraction".into(),
            "using".into(),
        ]);
        assert!(matches!(
            evaluate_switch(&not_bool, &cfg),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }
}
