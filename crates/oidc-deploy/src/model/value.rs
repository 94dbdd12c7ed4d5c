//! Declared attribute values

use super::ResourceRef;
use super::policy::PolicyDocument;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A sensitive string (API keys and the like)
///
/// Never printed: `Debug` is redacted and the value only leaves this type
/// through [`Sensitive::expose`] (for the provider write) or as a SHA-256
/// fingerprint (for diffing and the state database).
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `sha256:<hex>` digest of the value
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

/// `sha256:<hex>` digest of a secret string
pub fn fingerprint(value: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(value.as_bytes())))
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(<redacted>)")
    }
}

/// Declared attribute value, possibly referencing other resources
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Computed attribute of another resource
    Ref(ResourceRef, String),
    /// String concatenation of the parts
    Concat(Vec<Value>),
    Policy(PolicyDocument),
    Sensitive(Sensitive),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Collect every resource referenced anywhere inside this value
    pub fn collect_references(&self, out: &mut BTreeSet<ResourceRef>) {
        match self {
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::String(_)
            | Value::Sensitive(_) => {}
            Value::List(items) | Value::Concat(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Value::Map(entries) => {
                for item in entries.values() {
                    item.collect_references(out);
                }
            }
            Value::Ref(target, _) => {
                out.insert(target.clone());
            }
            Value::Policy(doc) => doc.collect_references(out),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<PolicyDocument> for Value {
    fn from(doc: PolicyDocument) -> Self {
        Value::Policy(doc)
    }
}

impl From<Sensitive> for Value {
    fn from(s: Sensitive) -> Self {
        Value::Sensitive(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_debug_is_redacted() {
        let s = Sensitive::new("sk-live-abc");
        let shown = format!("{:?}", s);
        assert!(!shown.contains("sk-live-abc"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn blank_sensitive_is_empty() {
        assert!(Sensitive::new("").is_empty());
        assert!(Sensitive::new("   ").is_empty());
        assert!(!Sensitive::new("x").is_empty());
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = Sensitive::new("one").fingerprint();
        assert_eq!(a, Sensitive::new("one").fingerprint());
        assert_ne!(a, Sensitive::new("two").fingerprint());
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }
}
