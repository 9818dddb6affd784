//! Strata Resource Pool
//!
//! Lineage-keyed storage of every intermediate resource produced while a
//! pipeline graph is assembled, and the combination engine that turns a
//! block's declared inputs into merged sub-pools ("strategies").
//!
//! # Core Concepts
//!
//! - [`ResourcePool`]: `name -> lineage key -> record`, plus the ordinal registry of keys
//! - [`Metadata`]: typed sidecar carried by every record (lineage, fork tags, sources, ...)
//! - [`InputSpec`]: required, optional and linked input declarations
//! - [`StrategyPool`]: one record per input, the merged lineage and merged metadata
//! - [`VariantRegistry`]: fork labels seen per resource, used to prune incompatible pairs
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_pool::{InputSpec, PutRequest, ResourcePool};
//!
//! let mut pool = ResourcePool::new("sub-01_ses-1");
//! pool.put(PutRequest::new("T1w", source.output("T1w"), "anat_ingress").injected())?;
//!
//! for strategy in pool.strategies(&[InputSpec::required("T1w")])? {
//!     let t1w = strategy.get_data("T1w")?;
//!     // wire t1w into a new node ...
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod combine;
mod error;
mod metadata;
mod pool;
mod query;
mod record;
mod strategy;
mod variant;

pub use combine::InputSpec;
pub use error::PoolError;
pub use metadata::Metadata;
pub use pool::{ResourcePool, Variants};
pub use query::ResourceQuery;
pub use record::{PutRequest, ResourceRecord};
pub use strategy::{NodeData, StrategyPool};
pub use variant::VariantRegistry;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
