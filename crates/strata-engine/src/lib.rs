//! Strata Engine
//!
//! Resolves declarative node blocks against a lineage-keyed resource pool
//! and assembles the workflow graph for one subject/session build:
//! - Evaluates each block's applicability switch and option axis against the pipeline config
//! - Combines the block's inputs into strategies and invokes the stage body once per strategy and option
//! - Commits outputs with merged metadata and fork tags
//! - Enriches committed outputs (template projection, smoothing, z-scoring)
//! - Builds independent sessions in parallel
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_engine::{BlockDecl, BlockGroup, BuildContext, NodeBlock, PipelineConfig};
//!
//! let config = Arc::new(PipelineConfig::from_yaml_str(CONFIG)?);
//! let mut ctx = BuildContext::new("sub-01_ses-1", config);
//! strata_engine::ingress::ingress_raw(&mut ctx, &"T1w".into())?;
//!
//! let block = NodeBlock::declared(BlockDecl::from_yaml_str(BRAIN_EXTRACTION)?);
//! ctx.connect(&BlockGroup::from(block))?;
//! println!("{}", ctx.graph.to_document().to_json_pretty()?);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod block;
pub mod catalogue;
pub mod config;
pub mod context;
pub mod enrichment;
pub mod error;
pub mod ingress;
pub mod outputs;
pub mod resolver;
pub mod session;
pub mod stage;

pub use block::{BlockDecl, BlockGroup, ConfigPath, NodeBlock, OptionAxis, OutputDecl, Switch};
pub use catalogue::{Pipeline, PipelineStage};
pub use config::PipelineConfig;
pub use context::{BuildContext, Diagnostics, SkipEvent, SkipKind};
pub use enrichment::{EnrichmentPolicy, EnrichmentSettings, RegistrationTool};
pub use error::{ConfigError, EngineError, StageError};
pub use ingress::{IngressResource, TemplateEntry};
pub use outputs::{gather_outputs, OutputEntry, OutputPolicy};
pub use resolver::ConnectSummary;
pub use session::{
    build_session, build_sessions, BuildReport, PriorOutput, SessionManifest, SessionOutcome,
    SessionSpec,
};
pub use stage::{BlockOption, DeclaredStage, Invocation, StageBody, StageOutputs, SubInterface};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for writing stage bodies and driving builds
    pub use crate::{
        BlockDecl, BlockGroup, BlockOption, BuildContext, EngineError, Invocation, NodeBlock,
        PipelineConfig, StageBody, StageError, StageOutputs, SubInterface,
    };
    pub use strata_graph::{NodeSpec, OutputRef, WorkflowGraph};
    pub use strata_pool::{InputSpec, Metadata, ResourcePool, StrategyPool};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
