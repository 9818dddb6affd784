//! Strata Graph
//!
//! The workflow graph assembled during resolution. Nodes are named
//! processing steps with free-form parameters; edges connect a node's
//! output port to another node's input port. The graph is handed to an
//! external execution engine as a [`GraphDocument`].
//!
//! # Core Concepts
//!
//! - [`WorkflowGraph`]: nodes, port-level edges and a petgraph topology kept acyclic
//! - [`NodeId`] / [`NodeSpec`]: node handle and its description
//! - [`OutputRef`]: `(node, port)` pair, the producer reference stored in the resource pool
//! - [`GraphError::DuplicateConstruction`]: a node name or input port used twice
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_graph::{NodeSpec, WorkflowGraph};
//!
//! let mut graph = WorkflowGraph::new("sub-01_ses-1");
//! let src = graph.add_node(NodeSpec::new("T1w_ingress", "datasource"))?;
//! let brain = graph.add_node(NodeSpec::new("brain_extraction_0", "skullstrip"))?;
//! graph.connect(&src.output("T1w"), brain, "in_file")?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod document;
mod error;
mod graph;
mod node;

pub use document::{EdgeDocument, GraphDocument, NodeDocument};
pub use error::GraphError;
pub use graph::{Checkpoint, Edge, WorkflowGraph};
pub use node::{NodeId, NodeSpec, OutputRef};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
