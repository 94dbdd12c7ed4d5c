//! Declared-versus-observed attribute diff

use crate::model::Attributes;
use crate::model::policy::{canonicalize, is_policy_document};
use oidc_deploy_common::ResourceKind;
use serde::Serialize;
use serde_json::Value as Json;

/// One attribute that differs from the live resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub key: String,
    pub before: Option<Json>,
    pub after: Json,
}

/// Changes needed to bring `observed` to `declared`
///
/// Only keys the provider reports are compared: write-only settings such as
/// a secret's recovery window never show up as drift.
pub fn diff(declared: &Attributes, observed: &Attributes) -> Vec<AttributeChange> {
    declared
        .iter()
        .filter_map(|(key, want)| {
            let have = observed.get(key)?;
            if normalize(want) == normalize(have) {
                None
            } else {
                Some(AttributeChange {
                    key: key.clone(),
                    before: Some(have.clone()),
                    after: want.clone(),
                })
            }
        })
        .collect()
}

/// Whether any change touches an identity attribute of `kind`
pub fn requires_replacement(kind: ResourceKind, changes: &[AttributeChange]) -> bool {
    changes.iter().any(|c| kind.is_identity_attribute(&c.key))
}

fn normalize(value: &Json) -> Json {
    if is_policy_document(value) {
        return canonicalize(value);
    }
    match value {
        Json::Array(items) if items.iter().all(Json::is_string) => {
            let mut items = items.clone();
            items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            Json::Array(items)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Json)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_no_changes() {
        let a = attrs(&[("name", json!("x")), ("cpu", json!("1024"))]);
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn test_only_observed_keys_compared() {
        let declared = attrs(&[("name", json!("x")), ("recovery_window_days", json!(7))]);
        let observed = attrs(&[("name", json!("x"))]);
        assert!(diff(&declared, &observed).is_empty());
    }

    #[test]
    fn test_changed_field_reported() {
        let declared = attrs(&[("name", json!("x")), ("cpu", json!("2048"))]);
        let observed = attrs(&[("name", json!("x")), ("cpu", json!("1024"))]);
        let changes = diff(&declared, &observed);
        assert_eq!(
            changes,
            vec![AttributeChange {
                key: "cpu".into(),
                before: Some(json!("1024")),
                after: json!("2048"),
            }]
        );
        assert!(!requires_replacement(ResourceKind::AppRunnerService, &changes));
    }

    #[test]
    fn test_identity_change_requires_replacement() {
        let declared = attrs(&[("name", json!("new"))]);
        let observed = attrs(&[("name", json!("old"))]);
        let changes = diff(&declared, &observed);
        assert!(requires_replacement(ResourceKind::IamRole, &changes));
    }

    #[test]
    fn test_unordered_lists_and_policies_compare_equal() {
        let declared = attrs(&[
            ("thumbprints", json!(["b", "a"])),
            (
                "document",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"}]
                }),
            ),
        ]);
        let observed = attrs(&[
            ("thumbprints", json!(["a", "b"])),
            (
                "document",
                json!({
                    "Statement": [
        {"Resource": ["*"], "Action": ["s3:GetObject"], "Effect": "Allow"}
    ],
                    "Version": "2012-10-17"
                }),
            ),
        ]);
        assert!(diff(&declared, &observed).is_empty());
    }
}
