//! Resource lookups by name or by ordered alternatives

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single name, or an ordered list of alternatives where the first
/// present one wins
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceQuery {
    /// Exactly this name
    One(String),
    /// First present of these names
    AnyOf(Vec<String>),
}

impl ResourceQuery {
    /// Candidate names in preference order
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::One(name) => std::slice::from_ref(name),
            Self::AnyOf(names) => names,
        }
    }

    /// Replace `from` with `to` wherever it appears
    #[must_use]
    pub fn renamed(&self, from: &str, to: &ResourceQuery) -> Self {
        match self {
            Self::One(name) if name == from => to.clone(),
            Self::One(_) => self.clone(),
            Self::AnyOf(names) => Self::AnyOf(
                names
                    .iter()
                    .flat_map(|n| {
                        if n == from {
                            to.names().to_vec()
                        } else {
                            vec![n.clone()]
                        }
                    })
                    .collect(),
            ),
        }
    }
}

impl Display for ResourceQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(name) => f.write_str(name),
            Self::AnyOf(names) => write!(f, "[{}]", names.join(" | ")),
        }
    }
}

impl From<&str> for ResourceQuery {
    fn from(name: &str) -> Self {
        Self::One(name.to_string())
    }
}

impl From<String> for ResourceQuery {
    fn from(name: String) -> Self {
        Self::One(name)
    }
}

impl From<&String> for ResourceQuery {
    fn from(name: &String) -> Self {
        Self::One(name.clone())
    }
}

impl From<Vec<String>> for ResourceQuery {
    fn from(names: Vec<String>) -> Self {
        Self::AnyOf(names)
    }
}

impl From<&[&str]> for ResourceQuery {
    fn from(names: &[&str]) -> Self {
        Self::AnyOf(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ResourceQuery {
    fn from(names: [&str; N]) -> Self {
        Self::AnyOf(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl From<&ResourceQuery> for ResourceQuery {
    fn from(query: &ResourceQuery) -> Self {
        query.clone()
    }
}
