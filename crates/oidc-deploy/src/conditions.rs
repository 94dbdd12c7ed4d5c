//! Existence evaluation
//!
//! Turns every resource's [`Condition`] into [`Existence::Absent`] or
//! [`Existence::Present`] for one run. Conditions are evaluated in
//! dependency order so `Exists(..)` can look at resources decided earlier.

use crate::error::DeployError;
use crate::model::{Condition, ResourceRef, StackModel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Named boolean toggles derived from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags(BTreeMap<String, bool>);

impl Flags {
    pub fn with(mut self, name: &str, value: bool) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: bool) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    Absent,
    Present,
}

impl Existence {
    pub fn from_bool(present: bool) -> Self {
        if present {
            Existence::Present
        } else {
            Existence::Absent
        }
    }

    pub fn is_present(self) -> bool {
        self == Existence::Present
    }
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Existence::Absent => "absent",
            Existence::Present => "present",
        })
    }
}

/// Existence of every resource in a model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistenceSet(BTreeMap<ResourceRef, Existence>);

impl ExistenceSet {
    /// Every resource of `model` absent, for teardown
    pub fn all_absent(model: &StackModel) -> Self {
        Self(
            model
                .resources
                .iter()
                .map(|r| (r.id(), Existence::Absent))
                .collect(),
        )
    }

    /// Existence of `r`; resources outside the model are absent
    pub fn get(&self, r: &ResourceRef) -> Existence {
        self.0.get(r).copied().unwrap_or(Existence::Absent)
    }

    pub fn is_present(&self, r: &ResourceRef) -> bool {
        self.get(r).is_present()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceRef, Existence)> {
        self.0.iter().map(|(r, e)| (r, *e))
    }

    pub fn present(&self) -> impl Iterator<Item = &ResourceRef> {
        self.iter().filter(|(_, e)| e.is_present()).map(|(r, _)| r)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Evaluate every resource's condition
///
/// `order` must be a topological order of the model (see
/// [`crate::graph::DependencyGraph::order`]). Fails when a condition names
/// an unknown flag or when a present resource references an absent one.
pub fn evaluate(
    model: &StackModel,
    order: &[ResourceRef],
    flags: &Flags,
) -> Result<ExistenceSet, DeployError> {
    let mut decided: BTreeMap<ResourceRef, Existence> = BTreeMap::new();

    for id in order {
        let Some(resource) = model.get(id) else {
            continue;
        };
        let present = eval(&resource.condition, flags, &decided).map_err(|reason| {
            DeployError::ConditionalResolution {
                resource: id.clone(),
                reason,
            }
        })?;
        decided.insert(id.clone(), Existence::from_bool(present));
    }

    for id in order {
        if decided.get(id) != Some(&Existence::Present) {
            continue;
        }
        let Some(resource) = model.get(id) else {
            continue;
        };
        for target in resource.attribute_references() {
            if decided.get(&target) != Some(&Existence::Present) {
                return Err(DeployError::ConditionalResolution {
                    resource: id.clone(),
                    reason: format!("it references {target}, which is absent"),
                });
            }
        }
    }

    Ok(ExistenceSet(decided))
}

fn eval(
    condition: &Condition,
    flags: &Flags,
    decided: &BTreeMap<ResourceRef, Existence>,
) -> Result<bool, String> {
    Ok(match condition {
        Condition::Always => true,
        Condition::Flag(name) => flags
            .get(name)
            .ok_or_else(|| format!("unknown flag '{name}'"))?,
        Condition::Not(inner) => !eval(inner, flags, decided)?,
        Condition::All(items) => {
            for item in items {
                if !eval(item, flags, decided)? {
                    return Ok(false);
                }
            }
            true
        }
        Condition::Any(items) => {
            for item in items {
                if eval(item, flags, decided)? {
                    return Ok(true);
                }
            }
            false
        }
        Condition::Exists(target) => decided
            .get(target)
            .ok_or_else(|| format!("existence of {target} is not decided yet"))?
            .is_present(),
    })
}
