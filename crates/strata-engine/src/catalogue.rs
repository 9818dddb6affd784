//! Block catalogues: ordered stages of block groups
//!
//! ```yaml
//! stages:
//!   - name: anatomical
//!     skip_if_present: [desc-brain_T1w]
//!     blocks:
//!       - {name: reorient, ...}          # a single block
//!       - [{name: be_afni, ...}, {...}]  # alternatives connected together
//! ```

use serde::Deserialize;
use serde_yaml::Value;

use crate::context::{SkipEvent, SkipKind};
use crate::{BlockDecl, BlockGroup, BuildContext, ConnectSummary, EngineError, NodeBlock};

/// Blocks connected in order, skipped when their products already exist
#[derive(Debug, Clone, Default)]
pub struct PipelineStage {
    pub name: String,
    /// Any of these present in the pool skips the stage
    pub skip_if_present: Vec<String>,
    pub groups: Vec<BlockGroup>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<BlockGroup>) -> Self {
        self.groups.push(group.into());
        self
    }

    #[must_use]
    pub fn skipping_if_present(mut self, resources: &[&str]) -> Self {
        self.skip_if_present = resources.iter().map(|r| (*r).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stages: Vec<PipelineStage>,
}

#[derive(Deserialize)]
struct RawCatalogue {
    stages: Vec<RawStage>,
}

#[derive(Deserialize)]
struct RawStage {
    name: String,
    #[serde(default)]
    skip_if_present: Vec<String>,
    #[serde(default)]
    blocks: Vec<Value>,
}

impl Pipeline {
    pub fn new(stages: Vec<PipelineStage>) -> Self {
        Self { stages }
    }

    /// Catalogue whose blocks are built by [`crate::DeclaredStage`]
    ///
    /// # Errors
    /// [`EngineError::MalformedBlockDeclaration`] for any ill-formed block
    /// or catalogue.
    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        let raw: RawCatalogue = serde_yaml::from_str(text)
            .map_err(|e| EngineError::malformed_block("<catalogue>", e.to_string()))?;
        let stages = raw
            .stages
            .into_iter()
            .map(|stage| {
                let groups = stage
                    .blocks
                    .into_iter()
                    .map(|item| match item {
                        Value::Sequence(alternatives) => alternatives
                            .into_iter()
                            .map(|decl| BlockDecl::from_value(decl).map(NodeBlock::declared))
                            .collect::<Result<Vec<_>, _>>()
                            .map(BlockGroup::alternatives),
                        decl => BlockDecl::from_value(decl)
                            .map(NodeBlock::declared)
                            .map(BlockGroup::from),
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                Ok(PipelineStage {
                    name: stage.name,
                    skip_if_present: stage.skip_if_present,
                    groups,
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self { stages })
    }

    pub fn block_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| &s.groups)
            .map(|g| g.blocks().len())
            .sum()
    }

    /// Connect every stage in order
    ///
    /// # Errors
    /// The first fatal error of any group.
    pub fn build(&self, ctx: &mut BuildContext) -> Result<ConnectSummary, EngineError> {
        let mut total = ConnectSummary::default();
        for stage in &self.stages {
            if ctx.pool.contains_any(&stage.skip_if_present) {
                tracing::info!(stage = %stage.name, "outputs already present, skipping stage");
                ctx.diagnostics.record(SkipEvent {
                    block: stage.name.clone(),
                    strategy: None,
                    option: None,
                    kind: SkipKind::AlreadyPresent,
                    reason: format!("one of {:?} is already present", stage.skip_if_present),
                });
                continue;
            }
            for group in &stage.groups {
                let summary = ctx.connect(group)?;
                total.strategies += summary.strategies;
                total.invocations += summary.invocations;
                total.committed += summary.committed;
                total.skipped += summary.skipped;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_groups() {
        let pipeline = Pipeline::from_yaml_str(
            r"
stages:
  - name: anatomical
    skip_if_present: [desc-brain_T1w]
    blocks:
      - {name: reorient, config: None, switch: None, option_key: None, option_val: None, inputs: [T1w], outputs: [desc-reorient_T1w]}
      - - {name: be_a, config: None, switch: None, option_key: None, option_val: None, inputs: [desc-reorient_T1w], outputs: [desc-brain_T1w]}
        - {name: be_b, config: None, switch: None, option_key: None, option_val: None, inputs: [desc-reorient_T1w], outputs: [desc-brain_T1w]}
",
        )
        .unwrap();
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].groups.len(), 2);
        assert_eq!(pipeline.stages[0].groups[1].names(), vec!["be_a", "be_b"]);
        assert_eq!(pipeline.block_count(), 3);
    }

    #[test]
    fn bad_block_fails_the_catalogue() {
        let err = Pipeline::from_yaml_str(
            "stages: [{name: s, blocks: [{name: partial, inputs: [], outputs: []}]}]",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MalformedBlockDeclaration { block, .. } if block == "partial"));
    }
}
