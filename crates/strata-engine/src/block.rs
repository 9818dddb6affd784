//! Node block declarations
//!
//! A block is declared as a mapping with the keys `name`, `config`,
//! `switch`, `option_key`, `option_val`, `inputs` and `outputs`. Every key
//! must be present; `null` or the string `None` marks an unused one.
//! Declarations are validated into [`BlockDecl`] once, at registration,
//! so that resolution never meets an ill-formed shape.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use strata_pool::{InputSpec, ResourceQuery};

use crate::stage::{DeclaredStage, Invocation, StageBody, StageOutputs};
use crate::{EngineError, StageError};

/// Key path into the pipeline configuration
pub type ConfigPath = Vec<String>;

const REQUIRED_KEYS: [&str; 7] = [
    "name",
    "config",
    "switch",
    "option_key",
    "option_val",
    "inputs",
    "outputs",
];
const NULLABLE_KEYS: [&str; 4] = ["config", "switch", "option_key", "option_val"];
const USER_DEFINED: &str = "USER-DEFINED";

/// When a block applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Switch {
    Always,
    Fixed(bool),
    /// Boolean, or list of booleans to run both branches
    Path(ConfigPath),
    /// Every path must contain `true`
    AllOf(Vec<ConfigPath>),
}

/// Where a block's variants come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionAxis {
    /// One default variant
    Single,
    /// Allow-list intersected with the configured selection
    Choice { key: ConfigPath, values: Vec<String> },
    /// Each configured entry is a custom variant
    UserDefined { key: ConfigPath },
    /// One variant per path whose last key is present in its parent
    Flags(Vec<ConfigPath>),
}

impl OptionAxis {
    /// Number of variants the declaration can name
    pub fn declared_count(&self) -> usize {
        match self {
            Self::Single | Self::UserDefined { .. } => 1,
            Self::Choice { values, .. } => values.len(),
            Self::Flags(paths) => paths.len(),
        }
    }
}

/// Fixed metadata merged into one output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A source resource whose description names the template, or a literal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Validated block declaration
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub name: String,
    /// Config prefix; the block's own settings live below it
    pub config: ConfigPath,
    pub switch: Switch,
    pub options: OptionAxis,
    pub inputs: Vec<InputSpec>,
    pub outputs: IndexMap<String, OutputDecl>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeys {
    One(String),
    Many(Vec<String>),
    Nested(Vec<Vec<String>>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSwitch {
    Fixed(bool),
    Keys(RawKeys),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValues {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutputs {
    Names(Vec<String>),
    Described(IndexMap<String, Option<OutputDecl>>),
}

#[derive(Deserialize)]
struct RawBlockDecl {
    name: String,
    config: Option<RawKeys>,
    switch: Option<RawSwitch>,
    option_key: Option<RawKeys>,
    option_val: Option<RawValues>,
    inputs: Option<Vec<InputSpec>>,
    outputs: Option<RawOutputs>,
}

impl BlockDecl {
    pub fn from_yaml_str(text: &str) -> Result<Self, EngineError> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| EngineError::malformed_block("<unparsed>", e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate a declaration mapping
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let Value::Mapping(mut map) = value else {
            return Err(EngineError::malformed_block(
                "<unnamed>",
                "declaration must be a mapping",
            ));
        };
        let name = map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !map.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::malformed_block(
                name,
                format!("missing keys: {}", missing.join(", ")),
            ));
        }

        for key in NULLABLE_KEYS {
            if let Some(slot) = map.get_mut(key) {
                if matches!(slot.as_str(), Some("None" | "none")) {
                    *slot = Value::Null;
                }
            }
        }

        let raw: RawBlockDecl = serde_yaml::from_value(Value::Mapping(map))
            .map_err(|e| EngineError::malformed_block(name.as_str(), e.to_string()))?;
        raw.validate()
    }

    /// Validate a list of declarations
    pub fn catalogue_from_yaml_str(text: &str) -> Result<Vec<Self>, EngineError> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| EngineError::malformed_block("<catalogue>", e.to_string()))?;
        match value {
            Value::Sequence(items) => items.into_iter().map(Self::from_value).collect(),
            other => Ok(vec![Self::from_value(other)?]),
        }
    }

    pub fn is_declared_output(&self, label: &str) -> bool {
        self.outputs.contains_key(label)
    }
}

impl RawBlockDecl {
    fn validate(self) -> Result<BlockDecl, EngineError> {
        let name = self.name;
        let malformed = |reason: &str| EngineError::malformed_block(name.as_str(), reason);

        if name.trim().is_empty() {
            return Err(malformed("name must not be empty"));
        }

        let config = match self.config {
            None => Vec::new(),
            Some(RawKeys::One(key)) => vec![key],
            Some(RawKeys::Many(keys)) => keys,
            Some(RawKeys::Nested(_)) => {
                return Err(malformed("config must be a key or a list of keys"))
            }
        };
        let under_config = |keys: Vec<String>| -> ConfigPath {
            config.iter().cloned().chain(keys).collect()
        };

        let switch = match self.switch {
            None => Switch::Always,
            Some(RawSwitch::Fixed(on)) => Switch::Fixed(on),
            Some(RawSwitch::Keys(RawKeys::One(key))) => Switch::Path(under_config(vec![key])),
            Some(RawSwitch::Keys(RawKeys::Many(keys))) if keys.is_empty() => Switch::Always,
            Some(RawSwitch::Keys(RawKeys::Many(keys))) => Switch::Path(under_config(keys)),
            Some(RawSwitch::Keys(RawKeys::Nested(paths))) => {
                if !config.is_empty() {
                    return Err(malformed(
                        "several switch paths cannot be combined with a config prefix",
                    ));
                }
                Switch::AllOf(paths)
            }
        };

        let options = match (self.option_key, self.option_val) {
            (None, None) => OptionAxis::Single,
            (None, Some(_)) => return Err(malformed("option_val given without option_key")),
            (Some(RawKeys::Nested(paths)), None) => {
                OptionAxis::Flags(paths.into_iter().map(under_config).collect())
            }
            (Some(_), None) => {
                return Err(malformed(
                    "option_key without option_val must be a list of key lists",
                ))
            }
            (Some(RawKeys::Nested(_)), Some(_)) => {
                return Err(malformed("option_key must be a key or a list of keys"))
            }
            (Some(RawKeys::One(key)), Some(values)) => option_axis(under_config(vec![key]), values),
            (Some(RawKeys::Many(keys)), Some(values)) => option_axis(under_config(keys), values),
        };

        let outputs = match self.outputs {
            None => IndexMap::new(),
            Some(RawOutputs::Names(names)) => names
                .into_iter()
                .map(|n| (n, OutputDecl::default()))
                .collect(),
            Some(RawOutputs::Described(described)) => described
                .into_iter()
                .map(|(n, decl)| (n, decl.unwrap_or_default()))
                .collect(),
        };

        let inputs = self.inputs.unwrap_or_default();
        if inputs
            .iter()
            .any(|i| matches!(i, InputSpec::Linked { linked } if linked.is_empty()))
        {
            return Err(malformed("linked input group must not be empty"));
        }

        Ok(BlockDecl {
            name,
            config,
            switch,
            options,
            inputs,
            outputs,
        })
    }
}

fn option_axis(key: ConfigPath, values: RawValues) -> OptionAxis {
    let values = match values {
        RawValues::One(value) => vec![value],
        RawValues::Many(values) => values,
    };
    if values.iter().any(|v| v == USER_DEFINED) {
        OptionAxis::UserDefined { key }
    } else {
        OptionAxis::Choice { key, values }
    }
}

/// A declaration bound to the body that builds its nodes
#[derive(Clone)]
pub struct NodeBlock {
    decl: BlockDecl,
    body: Arc<dyn StageBody>,
    interface: Vec<(String, ResourceQuery)>,
}

impl NodeBlock {
    pub fn new(decl: BlockDecl, body: impl StageBody + 'static) -> Self {
        Self {
            decl,
            body: Arc::new(body),
            interface: Vec::new(),
        }
    }

    /// Block whose body is a closure
    pub fn from_fn<F>(decl: BlockDecl, body: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut Invocation<'b>) -> Result<StageOutputs, StageError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(decl, body)
    }

    /// Block built by the generic [`DeclaredStage`] body
    pub fn declared(decl: BlockDecl) -> Self {
        Self::new(decl, DeclaredStage)
    }

    /// Look up input `expected` as `actual` instead
    ///
    /// The actual resource is exposed under the expected name during each
    /// invocation and is not listed among the outputs' sources twice.
    #[must_use]
    pub fn with_interface(mut self, expected: &str, actual: impl Into<ResourceQuery>) -> Self {
        let actual = actual.into();
        self.decl.inputs = self
            .decl
            .inputs
            .iter()
            .map(|input| input.renamed(expected, &actual))
            .collect();
        self.interface.push((expected.to_string(), actual));
        self
    }

    pub fn decl(&self) -> &BlockDecl {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn body(&self) -> &dyn StageBody {
        self.body.as_ref()
    }

    pub fn interface(&self) -> &[(String, ResourceQuery)] {
        &self.interface
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.interface.iter().any(|(expected, _)| expected == name)
    }
}

impl fmt::Debug for NodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBlock")
            .field("decl", &self.decl)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Blocks connected together as forking alternatives
#[derive(Debug, Clone, Default)]
pub struct BlockGroup {
    blocks: Vec<NodeBlock>,
}

impl BlockGroup {
    pub fn alternatives(blocks: Vec<NodeBlock>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[NodeBlock] {
        &self.blocks
    }

    pub fn names(&self) -> Vec<&str> {
        self.blocks.iter().map(NodeBlock::name).collect()
    }
}

impl From<NodeBlock> for BlockGroup {
    fn from(block: NodeBlock) -> Self {
        Self {
            blocks: vec![block],
        }
    }
}
