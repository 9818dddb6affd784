//! Stage bodies
//!
//! A stage body builds the graph nodes of one invocation: one strategy of
//! inputs and one option of its block. It returns the outputs it produced,
//! keyed by resource label. Bodies never touch the pool; the resolver
//! commits whatever they return.

use indexmap::IndexMap;
use serde_yaml::Value;
use strata_graph::{NodeSpec, OutputRef, WorkflowGraph};
use strata_pool::StrategyPool;

use crate::{BlockDecl, NodeBlock, PipelineConfig, StageError};

/// Produced outputs: label -> producer port
pub type StageOutputs = IndexMap<String, OutputRef>;

/// One variant of a block's option axis
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOption {
    /// The block has no option axis
    Default,
    /// A value from the declared allow-list or a flag path
    Named(String),
    /// A user-defined configuration entry
    Custom(Value),
}

impl BlockOption {
    /// Name used in node names, if any
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
            Self::Custom(entry) => entry.get("Name").and_then(Value::as_str),
        }
    }

    /// Option as a node parameter
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Default => serde_json::Value::Null,
            Self::Named(name) => serde_json::Value::String(name.clone()),
            Self::Custom(entry) => {
                serde_json::to_value(entry).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

/// Everything a stage body sees during one invocation
pub struct Invocation<'a> {
    pub block: &'a BlockDecl,
    /// Block name, suffixed with the option where it forks
    pub node_name: &'a str,
    pub option: &'a BlockOption,
    /// Ordinal of the strategy's lineage key; keeps node names unique
    pub pipe_number: usize,
    /// Pipe number, plus `-{n}` per level of wrapped sub-block
    pub pipe_id: String,
    pub strategy: &'a StrategyPool,
    pub config: &'a PipelineConfig,
    pub graph: &'a mut WorkflowGraph,
    sub_blocks: usize,
}

impl<'a> Invocation<'a> {
    pub fn new(
        block: &'a BlockDecl,
        node_name: &'a str,
        option: &'a BlockOption,
        pipe_number: usize,
        strategy: &'a StrategyPool,
        config: &'a PipelineConfig,
        graph: &'a mut WorkflowGraph,
    ) -> Self {
        Self {
            block,
            node_name,
            option,
            pipe_number,
            pipe_id: pipe_number.to_string(),
            strategy,
            config,
            graph,
            sub_blocks: 0,
        }
    }

    /// `{node_name}_{pipe_id}`
    pub fn unique_name(&self) -> String {
        format!("{}_{}", self.node_name, self.pipe_id)
    }

    /// Settings below the block's config prefix
    pub fn setting(&self, path: &[&str]) -> Option<&Value> {
        let full: Vec<&str> = self
            .block
            .config
            .iter()
            .map(String::as_str)
            .chain(path.iter().copied())
            .collect();
        self.config.get(&full)
    }

    /// Run other blocks' bodies inside this invocation
    ///
    /// Each body sees a copy of the current strategy with the interface
    /// inputs set, runs under this option, and gets pipe id
    /// `{pipe_id}-{n}`, where `n` counts the sub-blocks run so far by this
    /// invocation. Its outputs are added to the copy, renamed through the
    /// interface, so later sub-blocks see them. The copy is returned for
    /// the caller to read from; nothing reaches the resource pool.
    ///
    /// # Errors
    /// The first sub-body failure.
    pub fn wrap_blocks(
        &mut self,
        blocks: &[NodeBlock],
        interface: &SubInterface,
    ) -> Result<StrategyPool, StageError> {
        let mut pool = self.strategy.clone();
        for block in blocks {
            for (name, output) in &interface.inputs {
                pool.set_output(name, output.clone());
            }
            let pipe_id = format!("{}-{}", self.pipe_id, self.sub_blocks);
            self.sub_blocks += 1;

            let outputs = {
                let mut sub = Invocation {
                    block: block.decl(),
                    node_name: block.name(),
                    option: self.option,
                    pipe_number: self.pipe_number,
                    pipe_id,
                    strategy: &pool,
                    config: self.config,
                    graph: &mut *self.graph,
                    sub_blocks: 0,
                };
                block.body().apply(&mut sub)?
            };
            tracing::trace!(block = %block.name(), outputs = outputs.len(), "wrapped sub-block");
            for (label, output) in outputs {
                let name = interface.outputs.get(&label).cloned().unwrap_or(label);
                pool.set_output(&name, output);
            }
        }
        Ok(pool)
    }
}

/// Name mapping between a calling body and the blocks it wraps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubInterface {
    /// Input a sub-block expects -> producer port in the caller
    pub inputs: IndexMap<String, OutputRef>,
    /// Sub-block output label -> name the caller reads it under
    pub outputs: IndexMap<String, String>,
}

impl SubInterface {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, expected: impl Into<String>, output: OutputRef) -> Self {
        self.inputs.insert(expected.into(), output);
        self
    }

    #[must_use]
    pub fn output(mut self, label: impl Into<String>, name: impl Into<String>) -> Self {
        self.outputs.insert(label.into(), name.into());
        self
    }
}

/// Builds the nodes of one invocation
pub trait StageBody: Send + Sync {
    fn apply(&self, invocation: &mut Invocation<'_>) -> Result<StageOutputs, StageError>;
}

impl<F> StageBody for F
where
    F: for<'a, 'b> Fn(&'a mut Invocation<'b>) -> Result<StageOutputs, StageError> + Send + Sync,
{
    fn apply(&self, invocation: &mut Invocation<'_>) -> Result<StageOutputs, StageError> {
        self(invocation)
    }
}

/// Generic body driven only by the declaration
///
/// Adds one node named `{node_name}_{pipe_id}` whose kind is the block
/// name, wires every strategy resource into a port of the same name and
/// exposes every declared output as a port of that node.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredStage;

impl StageBody for DeclaredStage {
    fn apply(&self, invocation: &mut Invocation<'_>) -> Result<StageOutputs, StageError> {
        let mut spec = NodeSpec::new(invocation.unique_name(), invocation.block.name.as_str());
        if invocation.option != &BlockOption::Default {
            spec = spec.with_param("option", invocation.option.to_json());
        }
        let node = invocation.graph.add_node(spec)?;

        for (name, record) in invocation.strategy.records() {
            invocation.graph.connect(&record.output, node, name)?;
        }

        Ok(invocation
            .block
            .outputs
            .keys()
            .map(|label| (label.clone(), node.output(label.as_str())))
            .collect())
    }
}
