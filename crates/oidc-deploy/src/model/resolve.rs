//! Resolution of declared values against upstream computed attributes

use super::policy::{Principal, render_document, render_statement};
use super::{Resource, ResourceRef, Value};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Resolved attribute bag (declared or computed)
pub type Attributes = BTreeMap<String, Json>;

/// Placeholder shown in plans for values only the provider can assign
pub const UNKNOWN_VALUE: &str = "(known after apply)";

/// What is known about a referenced resource at resolution time
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    /// Present, with its computed attributes
    Known(&'a Attributes),
    /// Present but not created yet (plan mode)
    Unknown,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("references {target}, which does not exist")]
    AbsentTarget { target: ResourceRef },

    #[error("{target} has no computed attribute '{attribute}'")]
    MissingAttribute {
        target: ResourceRef,
        attribute: String,
    },

    #[error("{target}.{attribute} is not known yet")]
    NotYetKnown {
        target: ResourceRef,
        attribute: String,
    },
}

/// Attributes of one resource after resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub attributes: Attributes,
    /// Top-level keys whose value depends on something not yet created
    pub unknown: BTreeSet<String>,
}

impl Resolved {
    pub fn has_unknown_identity(&self, resource: &Resource) -> bool {
        self.unknown
            .iter()
            .any(|key| resource.kind.is_identity_attribute(key))
    }
}

/// Resolve every declared attribute of `resource`
///
/// With `allow_unknown`, references to resources that do not exist yet
/// resolve to [`UNKNOWN_VALUE`] instead of failing.
pub fn resolve_attributes<'a, F>(
    resource: &Resource,
    lookup: F,
    allow_unknown: bool,
) -> Result<Resolved, ResolveError>
where
    F: Fn(&ResourceRef) -> Lookup<'a>,
{
    let resolver = Resolver {
        lookup: &lookup,
        allow_unknown,
    };
    let mut resolved = Resolved::default();
    for (key, value) in &resource.attributes {
        let (json, unknown) = resolver.value(value)?;
        if unknown {
            resolved.unknown.insert(key.clone());
        }
        resolved.attributes.insert(key.clone(), json);
    }
    Ok(resolved)
}

struct Resolver<'f, F> {
    lookup: &'f F,
    allow_unknown: bool,
}

impl<'a, F> Resolver<'_, F>
where
    F: Fn(&ResourceRef) -> Lookup<'a>,
{
    /// Resolve a value, reporting whether it contains an unknown
    fn value(&self, value: &Value) -> Result<(Json, bool), ResolveError> {
        Ok(match value {
            Value::Null => (Json::Null, false),
            Value::Bool(b) => (Json::Bool(*b), false),
            Value::Int(i) => (Json::from(*i), false),
            Value::String(s) => (Json::String(s.clone()), false),
            Value::Sensitive(s) => (Json::String(s.fingerprint()), false),
            Value::List(items) => {
                let mut unknown = false;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let (json, u) = self.value(item)?;
                    unknown |= u;
                    out.push(json);
                }
                (Json::Array(out), unknown)
            }
            Value::Map(entries) => {
                let mut unknown = false;
                let mut out = serde_json::Map::new();
                for (key, item) in entries {
                    let (json, u) = self.value(item)?;
                    unknown |= u;
                    out.insert(key.clone(), json);
                }
                (Json::Object(out), unknown)
            }
            Value::Ref(target, attribute) => self.reference(target, attribute)?,
            Value::Concat(parts) => {
                let mut unknown = false;
                let mut joined = String::new();
                for part in parts {
                    let (json, u) = self.value(part)?;
                    unknown |= u;
                    match json {
                        Json::String(s) => joined.push_str(&s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                if unknown {
                    (Json::String(UNKNOWN_VALUE.into()), true)
                } else {
                    (Json::String(joined), false)
                }
            }
            Value::Policy(doc) => {
                let mut unknown = false;
                let mut statements = Vec::with_capacity(doc.statements.len());
                for statement in &doc.statements {
                    let mut resources = Vec::with_capacity(statement.resources.len());
                    for resource in &statement.resources {
                        let (json, u) = self.value(resource)?;
                        unknown |= u;
                        resources.push(json);
                    }
                    let principal = match &statement.principal {
                        Some(Principal::Federated(v)) | Some(Principal::Aws(v)) => {
                            let (json, u) = self.value(v)?;
                            unknown |= u;
                            Some(json)
                        }
                        Some(Principal::Service(s)) => Some(Json::String(s.clone())),
                        None => None,
                    };
                    statements.push(render_statement(statement, resources, principal));
                }
                (render_document(statements), unknown)
            }
        })
    }

    fn reference(
        &self,
        target: &ResourceRef,
        attribute: &str,
    ) -> Result<(Json, bool), ResolveError> {
        match (self.lookup)(target) {
            Lookup::Known(attrs) => attrs
                .get(attribute)
                .cloned()
                .map(|json| (json, false))
                .ok_or_else(|| ResolveError::MissingAttribute {
                    target: target.clone(),
                    attribute: attribute.to_string(),
                }),
            Lookup::Unknown if self.allow_unknown => Ok((Json::String(UNKNOWN_VALUE.into()), true)),
            Lookup::Unknown => Err(ResolveError::NotYetKnown {
                target: target.clone(),
                attribute: attribute.to_string(),
            }),
            Lookup::Absent => Err(ResolveError::AbsentTarget {
                target: target.clone(),
            }),
        }
    }
}
