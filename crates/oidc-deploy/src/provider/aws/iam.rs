//! IAM: the GitHub OIDC provider, roles, customer-managed policies and
//! role policy attachments

use super::tags::iam_tags;
use super::{AccountId, AwsContext, attr_document, found, parse_iam_document};
use crate::model::Attributes;
use crate::provider::{
    ProviderError, RemoteResource, attr_opt_str, attr_str, attr_str_list, from_sdk_error,
};
use crate::reconcile::AttributeChange;
use aws_sdk_iam::Client;
use serde_json::{Value as Json, json};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// IAM keeps at most five versions of a managed policy
const MAX_POLICY_VERSIONS: usize = 5;

/// IAM client for the identity side of the stack
pub struct IamClient {
    client: Client,
    account_id: AccountId,
    stack: String,
}

impl IamClient {
    pub fn from_context(ctx: &AwsContext, account_id: AccountId, stack: &str) -> Self {
        Self {
            client: ctx.iam_client(),
            account_id,
            stack: stack.to_string(),
        }
    }

    // OIDC provider

    pub async fn read_oidc_provider(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let url = attr_str(declared, "url")?;
        let arn = self.account_id.oidc_provider_arn(url);

        let resp = found(
            self.client
                .get_open_id_connect_provider()
                .open_id_connect_provider_arn(&arn)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(resp) = resp else {
            return Ok(None);
        };

        // IAM reports the URL without its scheme
        let host = resp.url().unwrap_or_else(|| url.trim_start_matches("https://"));
        let url = format!("https://{host}");
        Ok(Some(RemoteResource {
            id: arn.clone(),
            observed: Attributes::from([
                ("url".to_string(), json!(url)),
                ("client_ids".to_string(), json!(resp.client_id_list())),
                ("thumbprints".to_string(), json!(resp.thumbprint_list())),
            ]),
            computed: Attributes::from([
                ("arn".to_string(), json!(arn)),
                ("url".to_string(), json!(url)),
            ]),
        }))
    }

    pub async fn create_oidc_provider(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let url = attr_str(declared, "url")?;
        let client_ids = attr_str_list(declared, "client_ids");
        let thumbprints = attr_str_list(declared, "thumbprints");

        info!(url = %url, "Creating OIDC identity provider");
        let resp = self
            .client
            .create_open_id_connect_provider()
            .url(url)
            .set_client_id_list(Some(client_ids.clone()))
            .set_thumbprint_list(Some(thumbprints.clone()))
            .set_tags(Some(iam_tags(&self.stack)?))
            .send()
            .await
            .map_err(from_sdk_error)?;

        let arn = resp
            .open_id_connect_provider_arn()
            .map(str::to_string)
            .unwrap_or_else(|| self.account_id.oidc_provider_arn(url));
        Ok(RemoteResource {
            id: arn.clone(),
            observed: Attributes::from([
                ("url".to_string(), json!(url)),
                ("client_ids".to_string(), json!(client_ids)),
                ("thumbprints".to_string(), json!(thumbprints)),
            ]),
            computed: Attributes::from([
                ("arn".to_string(), json!(arn)),
                ("url".to_string(), json!(url)),
            ]),
        })
    }

    pub async fn update_oidc_provider(
        &self,
        remote: &RemoteResource,
        changes: &[AttributeChange],
    ) -> Result<(), ProviderError> {
        let arn = remote.id.as_str();
        for change in changes {
            match change.key.as_str() {
                "thumbprints" => {
                    debug!(arn = %arn, "Replacing OIDC provider thumbprints");
                    self.client
                        .update_open_id_connect_provider_thumbprint()
                        .open_id_connect_provider_arn(arn)
                        .set_thumbprint_list(Some(string_list(&change.after)))
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                "client_ids" => {
                    let before: BTreeSet<String> = change
                        .before
                        .as_ref()
                        .map(string_list)
                        .unwrap_or_default()
                        .into_iter()
                        .collect();
                    let after: BTreeSet<String> = string_list(&change.after).into_iter().collect();

                    for added in after.difference(&before) {
                        self.client
                            .add_client_id_to_open_id_connect_provider()
                            .open_id_connect_provider_arn(arn)
                            .client_id(added)
                            .send()
                            .await
                            .map_err(from_sdk_error)?;
                    }
                    for removed in before.difference(&after) {
                        self.client
                            .remove_client_id_from_open_id_connect_provider()
                            .open_id_connect_provider_arn(arn)
                            .client_id(removed)
                            .send()
                            .await
                            .map_err(from_sdk_error)?;
                    }
                }
                other => {
                    return Err(ProviderError::Unsupported(format!(
                        "OIDC provider attribute '{other}' cannot be updated"
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn delete_oidc_provider(&self, remote: &RemoteResource) -> Result<(), ProviderError> {
        info!(arn = %remote.id, "Deleting OIDC identity provider");
        self.client
            .delete_open_id_connect_provider()
            .open_id_connect_provider_arn(&remote.id)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(())
    }

    // Roles

    pub async fn read_role(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let name = attr_str(declared, "name")?;
        let resp = found(
            self.client
                .get_role()
                .role_name(name)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(role) = resp.as_ref().and_then(|r| r.role()) else {
            return Ok(None);
        };

        let mut observed = Attributes::from([
            ("name".to_string(), json!(role.role_name())),
            (
                "description".to_string(),
                json!(role.description().unwrap_or_default()),
            ),
        ]);
        if let Some(doc) = role.assume_role_policy_document() {
            observed.insert("assume_role_policy".to_string(), parse_iam_document(doc)?);
        }

        Ok(Some(RemoteResource {
            id: role.arn().to_string(),
            observed,
            computed: role_computed(role.arn(), role.role_name(), role.role_id()),
        }))
    }

    pub async fn create_role(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;
        let trust = attr_document(declared, "assume_role_policy")?;

        info!(role_name = %name, "Creating IAM role");
        let resp = self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(&trust)
            .set_description(attr_opt_str(declared, "description").map(str::to_string))
            .set_tags(Some(iam_tags(&self.stack)?))
            .send()
            .await
            .map_err(from_sdk_error)?;
        let role = resp
            .role()
            .ok_or_else(|| ProviderError::missing("role in CreateRole response"))?;

        Ok(RemoteResource {
            id: role.arn().to_string(),
            observed: declared
                .iter()
                .filter(|(k, _)| {
                    matches!(k.as_str(), "name" | "description" | "assume_role_policy")
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            computed: role_computed(role.arn(), role.role_name(), role.role_id()),
        })
    }

    pub async fn update_role(
        &self,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<(), ProviderError> {
        let name = attr_str(declared, "name")?;
        for change in changes {
            match change.key.as_str() {
                "description" => {
                    self.client
                        .update_role()
                        .role_name(name)
                        .description(change.after.as_str().unwrap_or_default())
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                "assume_role_policy" => {
                    debug!(role_name = %name, "Updating trust policy");
                    self.client
                        .update_assume_role_policy()
                        .role_name(name)
                        .policy_document(attr_document(declared, "assume_role_policy")?)
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                other => {
                    return Err(ProviderError::Unsupported(format!(
                        "role attribute '{other}' cannot be updated"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Delete a role after detaching its managed policies and removing its
    /// inline policies
    pub async fn delete_role(&self, declared: &Attributes) -> Result<(), ProviderError> {
        let name = attr_str(declared, "name")?;

        let attached = self
            .client
            .list_attached_role_policies()
            .role_name(name)
            .send()
            .await
            .map_err(from_sdk_error)?;
        for policy in attached.attached_policies() {
            if let Some(arn) = policy.policy_arn() {
                debug!(role_name = %name, policy_arn = %arn, "Detaching policy before role delete");
                let detached = self
                    .client
                    .detach_role_policy()
                    .role_name(name)
                    .policy_arn(arn)
                    .send()
                    .await
                    .map_err(from_sdk_error);
                found(detached)?;
            }
        }

        let inline = self
            .client
            .list_role_policies()
            .role_name(name)
            .send()
            .await
            .map_err(from_sdk_error)?;
        for policy_name in inline.policy_names() {
            let deleted = self
                .client
                .delete_role_policy()
                .role_name(name)
                .policy_name(policy_name)
                .send()
                .await
                .map_err(from_sdk_error);
            found(deleted)?;
        }

        info!(role_name = %name, "Deleting IAM role");
        self.client
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(())
    }

    // Managed policies

    pub async fn read_policy(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let name = attr_str(declared, "name")?;
        let arn = self.account_id.policy_arn(name);

        let resp = found(
            self.client
                .get_policy()
                .policy_arn(&arn)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(policy) = resp.as_ref().and_then(|r| r.policy()) else {
            return Ok(None);
        };

        let mut observed = Attributes::from([("name".to_string(), json!(name))]);
        if let Some(version_id) = policy.default_version_id() {
            let version = self
                .client
                .get_policy_version()
                .policy_arn(&arn)
                .version_id(version_id)
                .send()
                .await
                .map_err(from_sdk_error)?;
            if let Some(doc) = version.policy_version().and_then(|v| v.document()) {
                observed.insert("document".to_string(), parse_iam_document(doc)?);
            }
        }

        Ok(Some(RemoteResource {
            id: arn.clone(),
            observed,
            computed: Attributes::from([
                ("arn".to_string(), json!(arn)),
                ("name".to_string(), json!(name)),
            ]),
        }))
    }

    pub async fn create_policy(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;
        let document = attr_document(declared, "document")?;

        info!(policy_name = %name, "Creating IAM policy");
        let resp = self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(&document)
            .set_description(attr_opt_str(declared, "description").map(str::to_string))
            .set_tags(Some(iam_tags(&self.stack)?))
            .send()
            .await
            .map_err(from_sdk_error)?;

        let arn = resp
            .policy()
            .and_then(|p| p.arn())
            .map(str::to_string)
            .unwrap_or_else(|| self.account_id.policy_arn(name));
        let mut observed = Attributes::from([("name".to_string(), json!(name))]);
        if let Some(doc) = declared.get("document") {
            observed.insert("document".to_string(), doc.clone());
        }

        Ok(RemoteResource {
            id: arn.clone(),
            observed,
            computed: Attributes::from([
                ("arn".to_string(), json!(arn)),
                ("name".to_string(), json!(name)),
            ]),
        })
    }

    /// Publish the declared document as the new default version
    pub async fn update_policy(
        &self,
        remote: &RemoteResource,
        changes: &[AttributeChange],
    ) -> Result<(), ProviderError> {
        let arn = remote.id.as_str();
        let Some(change) = changes.iter().find(|c| c.key == "document") else {
            return Ok(());
        };
        if let Some(other) = changes.iter().find(|c| c.key != "document") {
            return Err(ProviderError::Unsupported(format!(
                "policy attribute '{}' cannot be updated",
                other.key
            )));
        }
        let document = serde_json::to_string(&change.after)
            .map_err(|e| ProviderError::InvalidDocument(e.to_string()))?;

        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        if versions.versions().len() >= MAX_POLICY_VERSIONS {
            let oldest = versions
                .versions()
                .iter()
                .filter(|v| !v.is_default_version())
                .min_by_key(|v| v.create_date().map(|d| d.secs()))
                .and_then(|v| v.version_id());
            if let Some(version_id) = oldest {
                debug!(policy_arn = %arn, version_id, "Pruning oldest policy version");
                self.client
                    .delete_policy_version()
                    .policy_arn(arn)
                    .version_id(version_id)
                    .send()
                    .await
                    .map_err(from_sdk_error)?;
            }
        }

        info!(policy_arn = %arn, "Publishing new policy version");
        self.client
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(document)
            .set_as_default(true)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(())
    }

    /// Detach a policy from its roles, drop old versions, then delete it
    pub async fn delete_policy(&self, remote: &RemoteResource) -> Result<(), ProviderError> {
        let arn = remote.id.as_str();

        let entities = self
            .client
            .list_entities_for_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        for role in entities.policy_roles() {
            if let Some(role_name) = role.role_name() {
                debug!(policy_arn = %arn, role_name, "Detaching policy before delete");
                let detached = self
                    .client
                    .detach_role_policy()
                    .role_name(role_name)
                    .policy_arn(arn)
                    .send()
                    .await
                    .map_err(from_sdk_error);
                found(detached)?;
            }
        }

        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        for version in versions.versions().iter().filter(|v| !v.is_default_version()) {
            if let Some(version_id) = version.version_id() {
                self.client
                    .delete_policy_version()
                    .policy_arn(arn)
                    .version_id(version_id)
                    .send()
                    .await
                    .map_err(from_sdk_error)?;
            }
        }

        info!(policy_arn = %arn, "Deleting IAM policy");
        self.client
            .delete_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(())
    }

    // Attachments

    pub async fn read_attachment(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let role = attr_str(declared, "role")?;
        let policy_arn = attr_str(declared, "policy_arn")?;

        let mut marker: Option<String> = None;
        loop {
            let resp = found(
                self.client
                    .list_attached_role_policies()
                    .role_name(role)
                    .set_marker(marker.take())
                    .send()
                    .await
                    .map_err(from_sdk_error),
            )?;
            let Some(resp) = resp else {
                // The role itself is gone
                return Ok(None);
            };

            if resp
                .attached_policies()
                .iter()
                .any(|p| p.policy_arn() == Some(policy_arn))
            {
                return Ok(Some(attachment(role, policy_arn)));
            }

            match resp.marker() {
                Some(next) if resp.is_truncated() => marker = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    pub async fn create_attachment(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let role = attr_str(declared, "role")?;
        let policy_arn = attr_str(declared, "policy_arn")?;

        info!(role_name = %role, policy_arn = %policy_arn, "Attaching policy to role");
        self.client
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(attachment(role, policy_arn))
    }

    pub async fn delete_attachment(&self, declared: &Attributes) -> Result<(), ProviderError> {
        let role = attr_str(declared, "role")?;
        let policy_arn = attr_str(declared, "policy_arn")?;

        info!(role_name = %role, policy_arn = %policy_arn, "Detaching policy from role");
        let detached = self
            .client
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(from_sdk_error);
        found(detached)?;
        Ok(())
    }
}

fn role_computed(arn: &str, name: &str, unique_id: &str) -> Attributes {
    Attributes::from([
        ("arn".to_string(), json!(arn)),
        ("name".to_string(), json!(name)),
        ("unique_id".to_string(), json!(unique_id)),
    ])
}

fn attachment(role: &str, policy_arn: &str) -> RemoteResource {
    let pair = Attributes::from([
        ("role".to_string(), json!(role)),
        ("policy_arn".to_string(), json!(policy_arn)),
    ]);
    let mut computed = pair.clone();
    computed.insert("id".to_string(), json!(format!("{role}|{policy_arn}")));
    RemoteResource {
        id: format!("{role}|{policy_arn}"),
        observed: pair,
        computed,
    }
}

fn string_list(value: &Json) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
