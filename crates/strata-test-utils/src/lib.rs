//! Testing utilities for the Strata workspace
//!
//! Shared fixtures: configs, contexts, block declarations and a stage
//! body that records how it was invoked.

#![allow(missing_docs)]

use std::sync::{Arc, Mutex};

use strata_engine::ingress::ingress_raw;
use strata_engine::{
    BlockDecl, BuildContext, Invocation, NodeBlock, PipelineConfig, StageError, StageOutputs,
};
use strata_graph::{NodeId, NodeSpec};
use strata_lineage::LineageKey;
use strata_pool::ResourcePool;

pub fn config_from_yaml(text: &str) -> Arc<PipelineConfig> {
    Arc::new(PipelineConfig::from_yaml_str(text).unwrap())
}

/// Context over `config` with the given raw resources injected
pub fn context_with(id: &str, config: &str, raw: &[&str]) -> BuildContext {
    let mut ctx = BuildContext::new(id, config_from_yaml(config));
    for name in raw {
        inject(&mut ctx, name);
    }
    ctx
}

pub fn inject(ctx: &mut BuildContext, name: &str) -> LineageKey {
    ingress_raw(ctx, &name.into()).unwrap()
}

pub fn decl(yaml: &str) -> BlockDecl {
    BlockDecl::from_yaml_str(yaml).unwrap()
}

/// Always-on block without options
pub fn simple_decl(name: &str, inputs: &[&str], outputs: &[&str]) -> BlockDecl {
    let list = |items: &[&str]| format!("[{}]", items.join(", "));
    decl(&format!(
        "{{name: {name}, config: None, switch: None, option_key: None, option_val: None, inputs: {}, outputs: {}}}",
        list(inputs),
        list(outputs)
    ))
}

/// What a [`RecordingStage`] saw in one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    pub node_name: String,
    pub option: Option<String>,
    pub pipe_number: usize,
    pub inputs: Vec<String>,
}

/// Stage body that adds one node per invocation and remembers every call
#[derive(Debug, Clone, Default)]
pub struct RecordingStage {
    calls: Arc<Mutex<Vec<InvocationRecord>>>,
}

impl RecordingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<InvocationRecord> {
        self.calls.lock().unwrap().clone()
    }

    /// Block running this stage
    pub fn block(&self, decl: BlockDecl) -> NodeBlock {
        let stage = self.clone();
        NodeBlock::from_fn(decl, move |invocation| stage.record(invocation))
    }

    fn record(&self, invocation: &mut Invocation<'_>) -> Result<StageOutputs, StageError> {
        self.calls.lock().unwrap().push(InvocationRecord {
            node_name: invocation.node_name.to_string(),
            option: invocation.option.name().map(str::to_string),
            pipe_number: invocation.pipe_number,
            inputs: invocation.strategy.names().map(str::to_string).collect(),
        });
        let node = invocation.graph.add_node(NodeSpec::new(
            invocation.unique_name(),
            invocation.block.name.as_str(),
        ))?;
        for (name, record) in invocation.strategy.records() {
            invocation.graph.connect(&record.output, node, name)?;
        }
        Ok(outputs_of(invocation.block, node))
    }
}

/// Every declared output as a port of `node`
pub fn outputs_of(block: &BlockDecl, node: NodeId) -> StageOutputs {
    block
        .outputs
        .keys()
        .map(|label| (label.clone(), node.output(label.as_str())))
        .collect()
}

/// Fork labels of every variant of `name`, in pool order
pub fn fork_labels(pool: &ResourcePool, name: &str) -> Vec<Vec<String>> {
    pool.get_optional(name)
        .map(|(_, variants)| {
            variants
                .values()
                .map(|record| record.metadata.fork_labels().map(str::to_string).collect())
                .collect()
        })
        .unwrap_or_default()
}

/// Producers along each lineage of `name`, in pool order
pub fn producers(pool: &ResourcePool, name: &str) -> Vec<Vec<String>> {
    pool.lineages(name)
        .into_iter()
        .map(|lineage| {
            lineage
                .flatten()
                .into_iter()
                .map(|step| step.producer().to_string())
                .collect()
        })
        .collect()
}
