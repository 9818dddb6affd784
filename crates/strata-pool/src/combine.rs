//! Strategy combination engine
//!
//! Turns a block's declared inputs into the list of sub-pools it must be
//! invoked on: the cartesian product of the lineages of every present
//! input, minus combinations that mix incompatible fork branches inside a
//! linked group.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::{PoolError, ResourcePool, ResourceQuery, ResourceRecord, StrategyPool, VariantRegistry};

/// One declared input of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSpec {
    /// Must be present
    Required(ResourceQuery),
    /// Dropped silently when absent
    Optional {
        /// Lookup
        optional: ResourceQuery,
    },
    /// Members must come from the same fork branches
    Linked {
        /// Members, each resolved independently
        linked: Vec<ResourceQuery>,
    },
}

impl InputSpec {
    /// Required input
    #[must_use]
    pub fn required(query: impl Into<ResourceQuery>) -> Self {
        Self::Required(query.into())
    }

    /// Optional input
    #[must_use]
    pub fn optional(query: impl Into<ResourceQuery>) -> Self {
        Self::Optional {
            optional: query.into(),
        }
    }

    /// Linked group
    #[must_use]
    pub fn linked<Q: Into<ResourceQuery>>(members: impl IntoIterator<Item = Q>) -> Self {
        Self::Linked {
            linked: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Lookups of this declaration
    #[must_use]
    pub fn queries(&self) -> Vec<&ResourceQuery> {
        match self {
            Self::Required(query) | Self::Optional { optional: query } => vec![query],
            Self::Linked { linked } => linked.iter().collect(),
        }
    }

    /// Every candidate name, flattened
    #[must_use]
    pub fn declared_names(&self) -> Vec<String> {
        self.queries()
            .into_iter()
            .flat_map(|q| q.names().to_vec())
            .collect()
    }

    /// Declaration with `from` looked up as `to` instead
    #[must_use]
    pub fn renamed(&self, from: &str, to: &ResourceQuery) -> Self {
        match self {
            Self::Required(query) => Self::Required(query.renamed(from, to)),
            Self::Optional { optional } => Self::Optional {
                optional: optional.renamed(from, to),
            },
            Self::Linked { linked } => Self::Linked {
                linked: linked.iter().map(|q| q.renamed(from, to)).collect(),
            },
        }
    }
}

struct ResolvedInputs {
    names: Vec<String>,
    linked: Vec<Vec<String>>,
}

impl ResourcePool {
    /// Every valid combination of lineages for `inputs`
    ///
    /// One present input yields one strategy per lineage of that input.
    /// Several yield the deduplicated cartesian product, pruned so that
    /// members of a linked group agree on every fork label both know.
    ///
    /// # Errors
    /// [`PoolError::NoStrategiesFound`] when no declared input is present;
    /// [`PoolError::ResourceNotFound`] when a required input is absent.
    pub fn strategies(&self, inputs: &[InputSpec]) -> Result<Vec<StrategyPool>, PoolError> {
        let resolved = self.resolve_inputs(inputs)?;

        let mut registry = VariantRegistry::new();
        let mut choices: Vec<Vec<(&str, &ResourceRecord)>> = Vec::with_capacity(resolved.names.len());
        for name in &resolved.names {
            let (name, variants) = self.get(name.as_str())?;
            for record in variants.values() {
                registry.observe(name, &record.metadata);
            }
            choices.push(variants.values().map(|record| (name, record)).collect());
        }

        let candidates = cartesian_product(&choices);
        let total = candidates.len();

        let mut seen = IndexSet::new();
        let mut strategies = Vec::new();
        for combination in candidates {
            if !linked_groups_agree(&registry, &resolved.linked, &combination) {
                continue;
            }
            let chosen = combination
                .iter()
                .map(|(name, record)| ((*name).to_string(), (*record).clone()))
                .collect();
            let strategy = StrategyPool::assemble(chosen);
            if seen.insert(strategy.key().clone()) {
                strategies.push(strategy);
            }
        }

        tracing::debug!(
            inputs = ?resolved.names,
            linked = resolved.linked.len(),
            candidates = total,
            kept = strategies.len(),
            "combined strategies"
        );
        Ok(strategies)
    }

    fn resolve_inputs(&self, inputs: &[InputSpec]) -> Result<ResolvedInputs, PoolError> {
        let mut names: Vec<String> = Vec::new();
        let mut linked = Vec::new();
        let mut missing = Vec::new();

        let keep = |names: &mut Vec<String>, name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };

        for input in inputs {
            match input {
                InputSpec::Required(query) => match self.resolve_name(query) {
                    Some(name) => keep(&mut names, name),
                    None => missing.push(query.to_string()),
                },
                InputSpec::Optional { optional } => {
                    if let Some(name) = self.resolve_name(optional) {
                        keep(&mut names, name);
                    }
                }
                InputSpec::Linked { linked: members } => {
                    let present: Vec<String> = members
                        .iter()
                        .filter_map(|q| self.resolve_name(q))
                        .map(str::to_string)
                        .collect();
                    for name in &present {
                        keep(&mut names, name.as_str());
                    }
                    if present.len() >= 2 {
                        linked.push(present);
                    }
                }
            }
        }

        if names.is_empty() {
            return Err(PoolError::NoStrategiesFound {
                inputs: inputs.iter().flat_map(InputSpec::declared_names).collect(),
            });
        }
        if !missing.is_empty() {
            return Err(PoolError::ResourceNotFound { names: missing });
        }
        Ok(ResolvedInputs { names, linked })
    }
}

fn linked_groups_agree(
    registry: &VariantRegistry,
    groups: &[Vec<String>],
    combination: &[(&str, &ResourceRecord)],
) -> bool {
    let chosen = |name: &str| {
        combination
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, record)| &record.metadata)
    };
    groups.iter().all(|group| {
        group.iter().enumerate().all(|(i, x)| {
            group.iter().skip(i + 1).all(|y| match (chosen(x.as_str()), chosen(y.as_str())) {
                (Some(mx), Some(my)) => registry.compatible((x.as_str(), mx), (y.as_str(), my)),
                _ => true,
            })
        })
    })
}

/// All ways of picking one element from each list, in lexicographic order
fn cartesian_product<T: Clone>(lists: &[Vec<T>]) -> Vec<Vec<T>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}
