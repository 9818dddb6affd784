//! Strata Lineage
//!
//! Provenance codec for resources produced while assembling a pipeline graph.
//! Two outputs of the same stage are the same variant only when their
//! lineage strings are identical, so everything downstream keys on the
//! canonical encoding defined here.
//!
//! # Core Concepts
//!
//! - [`Step`]: one production step, rendered `"{resource}:{producer}"`
//! - [`LineageEntry`]: a step, or a nested chain where several inputs were merged
//! - [`Lineage`]: ordered chain of entries
//! - [`LineageKey`]: canonical string form of a chain, used as a pool key
//! - [`Fingerprint`]: short Blake3 digest of a key for logs and diagnostics
//! - [`label`]: helpers over BIDS-style resource names
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_lineage::{Lineage, Step};
//!
//! let chain = Lineage::from_steps([
//!     Step::new("raw_T1w", "ingress")?,
//!     Step::new("preproc_T1w", "stageA")?,
//! ]);
//! let key = chain.key();
//! assert_eq!(key.as_str(), r#"["raw_T1w:ingress","preproc_T1w:stageA"]"#);
//! assert_eq!(key.decode()?, chain);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod error;
mod key;
pub mod label;
mod lineage;
mod step;

pub use error::ProvenanceError;
pub use key::{Fingerprint, LineageKey};
pub use lineage::{Lineage, LineageEntry};
pub use step::Step;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
