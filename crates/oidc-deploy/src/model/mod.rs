//! Resource model
//!
//! Static description of the stack: resources with declared attributes,
//! cross-references between them, existence conditions and outputs. Nothing
//! in here talks to AWS; the [`catalog`] instantiates the fixed topology and
//! the reconciler turns it into live state.

pub mod catalog;
pub mod policy;
mod resolve;
mod value;

use oidc_deploy_common::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub use policy::{Effect, PolicyDocument, Principal, Statement, TrustPolicy};
pub use resolve::{Attributes, Lookup, ResolveError, Resolved, UNKNOWN_VALUE, resolve_attributes};
pub use value::{Sensitive, Value, fingerprint};

/// Identity of a resource: `(kind, name)`, stable across runs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Reference to one of this resource's computed attributes
    pub fn attr(&self, attribute: &str) -> Value {
        Value::Ref(self.clone(), attribute.to_string())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    /// Parse an address of the form `kind.name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("expected <kind>.<name>, got '{s}'"))?;
        let kind =
            ResourceKind::parse(kind).ok_or_else(|| format!("unknown resource kind '{kind}'"))?;
        if name.is_empty() {
            return Err(format!("missing resource name in '{s}'"));
        }
        Ok(Self::new(kind, name))
    }
}

/// Existence condition of a resource
///
/// Evaluated once per apply, in dependency order, into
/// [`crate::conditions::Existence`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Condition {
    #[default]
    Always,
    /// A named configuration toggle
    Flag(String),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    /// True when the referenced resource is present
    Exists(ResourceRef),
}

impl Condition {
    pub fn flag(name: &str) -> Self {
        Condition::Flag(name.to_string())
    }

    /// Collect the resources this condition inspects
    pub fn collect_references(&self, out: &mut BTreeSet<ResourceRef>) {
        match self {
            Condition::Always | Condition::Flag(_) => {}
            Condition::Not(inner) => inner.collect_references(out),
            Condition::All(items) | Condition::Any(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Condition::Exists(r) => {
                out.insert(r.clone());
            }
        }
    }
}

/// A declared resource
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
    pub attributes: BTreeMap<String, Value>,
    /// Explicit ordering edges on top of the ones implied by references
    pub depends_on: BTreeSet<ResourceRef>,
    pub condition: Condition,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            condition: Condition::Always,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, target: ResourceRef) -> Self {
        self.depends_on.insert(target);
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn id(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.name.clone())
    }

    /// Resources referenced from attribute values
    pub fn attribute_references(&self) -> BTreeSet<ResourceRef> {
        let mut out = BTreeSet::new();
        for value in self.attributes.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Every resource that must be handled before this one
    pub fn references(&self) -> BTreeSet<ResourceRef> {
        let mut out = self.attribute_references();
        self.condition.collect_references(&mut out);
        out.extend(self.depends_on.iter().cloned());
        out
    }

    /// Raw sensitive value stored under `key`, if that attribute is sensitive
    pub fn sensitive(&self, key: &str) -> Option<&Sensitive> {
        match self.attributes.get(key) {
            Some(Value::Sensitive(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether the attribute holds a sensitive value (redacted in plans)
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive(key).is_some()
    }
}

/// A value exported to the CI consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub name: String,
    pub source: ResourceRef,
    /// Computed attribute read from the source
    pub attribute: String,
    /// Absent source yields null instead of an error
    pub optional: bool,
}

impl Output {
    pub fn required(name: &str, source: ResourceRef, attribute: &str) -> Self {
        Self {
            name: name.to_string(),
            source,
            attribute: attribute.to_string(),
            optional: false,
        }
    }

    pub fn optional(name: &str, source: ResourceRef, attribute: &str) -> Self {
        Self {
            optional: true,
            ..Self::required(name, source, attribute)
        }
    }
}

/// The full desired model of a stack
#[derive(Debug, Clone, Default)]
pub struct StackModel {
    /// Stack name, used for tagging
    pub name: String,
    pub resources: Vec<Resource>,
    pub outputs: Vec<Output>,
}

impl StackModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a resource, returning its reference for wiring dependents
    pub fn add(&mut self, resource: Resource) -> ResourceRef {
        let id = resource.id();
        self.resources.push(resource);
        id
    }

    pub fn get(&self, r: &ResourceRef) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|res| res.kind == r.kind && res.name == r.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_display_and_parse() {
        let r = ResourceRef::new(ResourceKind::IamRole, "github_deploy");
        assert_eq!(r.to_string(), "iam_role.github_deploy");
        assert_eq!("iam_role.github_deploy".parse::<ResourceRef>().unwrap(), r);
        assert!("iam_role".parse::<ResourceRef>().is_err());
        assert!("bucket.x".parse::<ResourceRef>().is_err());
        assert!("iam_role.".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_references_cover_attributes_conditions_and_depends_on() {
        let a = ResourceRef::new(ResourceKind::IamRole, "a");
        let b = ResourceRef::new(ResourceKind::Secret, "b");
        let c = ResourceRef::new(ResourceKind::EcrRepository, "c");

        let res = Resource::new(ResourceKind::AppRunnerService, "svc")
            .with(
                "image",
                Value::Concat(vec![c.attr("repository_url"), ":latest".into()]),
            )
            .with("role", a.attr("arn"))
            .when(Condition::Exists(b.clone()))
            .depends_on(a.clone());

        assert_eq!(
            res.attribute_references(),
            BTreeSet::from([a.clone(), c.clone()])
        );
        assert_eq!(res.references(), BTreeSet::from([a, b, c]));
    }

    #[test]
    fn test_sensitive_lookup() {
        let res = Resource::new(ResourceKind::SecretVersion, "v")
            .with("value", Value::Sensitive(Sensitive::new("sk-123")))
            .with("secret_id", "plain");
        assert!(res.is_sensitive("value"));
        assert!(!res.is_sensitive("secret_id"));
        assert_eq!(res.sensitive("value").unwrap().expose(), "sk-123");
    }
}
