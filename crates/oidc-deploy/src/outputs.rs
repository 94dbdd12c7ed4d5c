//! Stack outputs
//!
//! Values handed to the CI consumer. An optional output whose source is
//! absent resolves to null; a required one fails.

use crate::error::DeployError;
use crate::model::{ResolveError, ResourceRef, StackModel};
use crate::reconcile::Instance;
use anyhow::Result;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Output name to value; null for absent optional outputs
pub type OutputValues = BTreeMap<String, Json>;

/// Resolve every output of `model` against the instances after a run
pub fn resolve_outputs(
    model: &StackModel,
    instances: &BTreeMap<ResourceRef, Instance>,
) -> Result<OutputValues, DeployError> {
    let mut values = OutputValues::new();

    for output in &model.outputs {
        let attrs = instances.get(&output.source).and_then(Instance::attributes);
        let value = match attrs {
            Some(attrs) => attrs
                .get(&output.attribute)
                .cloned()
                .ok_or_else(|| DeployError::Resolve {
                    resource: output.source.clone(),
                    source: ResolveError::MissingAttribute {
                        target: output.source.clone(),
                        attribute: output.attribute.clone(),
                    },
                })?,
            None if output.optional => Json::Null,
            None => {
                return Err(DeployError::UnresolvedOutput {
                    output: output.name.clone(),
                    source_ref: output.source.clone(),
                });
            }
        };
        values.insert(output.name.clone(), value);
    }

    Ok(values)
}

/// Outputs as a JSON object, for CI
pub fn render_json(values: &OutputValues) -> Result<String> {
    Ok(serde_json::to_string_pretty(values)?)
}

/// Outputs as a table
pub fn render_table(values: &OutputValues) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Output"), Cell::new("Value")]);

    for (name, value) in values {
        let shown = match value {
            Json::Null => "-".to_string(),
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        table.add_row(vec![Cell::new(name), Cell::new(shown)]);
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, Output};
    use oidc_deploy_common::ResourceKind;
    use serde_json::json;

    fn service() -> ResourceRef {
        ResourceRef::new(ResourceKind::AppRunnerService, "app")
    }

    fn role() -> ResourceRef {
        ResourceRef::new(ResourceKind::IamRole, "deploy")
    }

    fn model() -> StackModel {
        let mut model = StackModel::new("t");
        model.outputs.push(Output::required("deploy_role_arn", role(), "arn"));
        model.outputs.push(Output::optional("service_url", service(), "service_url"));
        model
    }

    fn role_instance() -> (ResourceRef, Instance) {
        (
            role(),
            Instance::Present(Attributes::from([(
                "arn".to_string(),
                json!("arn:aws:iam::1:role/deploy"),
            )])),
        )
    }

    #[test]
    fn test_optional_absent_is_null() {
        let instances = BTreeMap::from([role_instance(), (service(), Instance::Absent)]);
        let values = resolve_outputs(&model(), &instances).unwrap();
        assert_eq!(values["deploy_role_arn"], json!("arn:aws:iam::1:role/deploy"));
        assert_eq!(values["service_url"], Json::Null);
    }

    #[test]
    fn test_optional_present_is_value() {
        let instances = BTreeMap::from([
            role_instance(),
            (
                service(),
                Instance::Present(Attributes::from([(
                    "service_url".to_string(),
                    json!("abc.us-east-1.awsapprunner.com"),
                )])),
            ),
        ]);
        let values = resolve_outputs(&model(), &instances).unwrap();
        assert_eq!(values["service_url"], json!("abc.us-east-1.awsapprunner.com"));
    }

    #[test]
    fn test_required_absent_fails() {
        let instances = BTreeMap::from([(role(), Instance::Absent)]);
        let err = resolve_outputs(&model(), &instances).unwrap_err();
        assert!(matches!(
            err,
            DeployError::UnresolvedOutput { ref output, .. } if output == "deploy_role_arn"
        ));
    }

    #[test]
    fn test_missing_attribute_fails() {
        let instances = BTreeMap::from([(role(), Instance::Present(Attributes::new()))]);
        assert!(matches!(
            resolve_outputs(&model(), &instances),
            Err(DeployError::Resolve { .. })
        ));
    }

    #[test]
    fn test_rendering() {
        let values = OutputValues::from([
            ("a".to_string(), json!("x")),
            ("b".to_string(), Json::Null),
        ]);
        let parsed: Json = serde_json::from_str(&render_json(&values).unwrap()).unwrap();
        assert_eq!(parsed, json!({"a": "x", "b": null}));
        let table = render_table(&values);
        assert!(table.contains('x'));
        assert!(table.contains('-'));
    }
}
