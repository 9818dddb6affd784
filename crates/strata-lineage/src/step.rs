//! A single production step of a lineage chain

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::ProvenanceError;

/// One production step: the resource that was written and the stage id
/// (node name) that wrote it.
///
/// Rendered as `"{resource}:{producer}"`. Resource names never contain `:`;
/// producer ids may, since parsing splits at the first separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Step {
    resource: String,
    producer: String,
}

impl Step {
    /// Separator between resource and producer
    pub const SEPARATOR: char = ':';

    /// Create a step
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Malformed`] if the resource name is empty
    /// or contains the separator.
    pub fn new(
        resource: impl Into<String>,
        producer: impl Into<String>,
    ) -> Result<Self, ProvenanceError> {
        let resource = resource.into();
        if resource.is_empty() {
            return Err(ProvenanceError::malformed("step has an empty resource name"));
        }
        if resource.contains(Self::SEPARATOR) {
            return Err(ProvenanceError::malformed(format!(
                "resource name '{resource}' contains '{}'",
                Self::SEPARATOR
            )));
        }
        Ok(Self {
            resource,
            producer: producer.into(),
        })
    }

    /// Resource written by this step
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Stage id that produced the resource
    #[inline]
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.resource, Self::SEPARATOR, self.producer)
    }
}

impl FromStr for Step {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, producer) = s.split_once(Self::SEPARATOR).ok_or_else(|| {
            ProvenanceError::malformed(format!("entry '{s}' is not of the form name:producer"))
        })?;
        Self::new(resource, producer)
    }
}
