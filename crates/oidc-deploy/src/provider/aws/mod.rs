//! AWS implementation of the provider seam
//!
//! One client wrapper per service, all built from a shared [`AwsContext`].
//! [`AwsProvider`] routes each resource kind to the service that owns it.

pub mod account;
mod apprunner;
pub mod context;
mod ecr;
mod iam;
mod secrets;
pub mod tags;

pub use account::{AccountId, caller_account};
pub use context::AwsContext;

use super::{CloudProvider, ProviderError, RemoteResource, SecretVersionInfo, attr_str};
use crate::model::{Attributes, Sensitive};
use crate::reconcile::AttributeChange;
use anyhow::Result;
use apprunner::AppRunnerClient;
use ecr::EcrClient;
use iam::IamClient;
use oidc_deploy_common::ResourceKind;
use secrets::SecretsClient;
use serde_json::{Value as Json, json};

/// [`CloudProvider`] backed by the AWS SDK
pub struct AwsProvider {
    iam: IamClient,
    ecr: EcrClient,
    secrets: SecretsClient,
    apprunner: AppRunnerClient,
    account_id: AccountId,
    region: String,
}

impl AwsProvider {
    /// Load credentials for `region` and validate them against STS
    ///
    /// Calls are not tied to a run's cancellation: once sent, an App Runner
    /// operation is waited on until it settles or its own timeout ends.
    pub async fn connect(region: &str, profile: Option<&str>, stack: &str) -> Result<Self> {
        let ctx = AwsContext::new(region, profile).await;
        let account_id = caller_account(ctx.sdk_config()).await?;
        Ok(Self::from_context(&ctx, account_id, stack))
    }

    pub fn from_context(ctx: &AwsContext, account_id: AccountId, stack: &str) -> Self {
        Self {
            iam: IamClient::from_context(ctx, account_id.clone(), stack),
            ecr: EcrClient::from_context(ctx, stack),
            secrets: SecretsClient::from_context(ctx, stack),
            apprunner: AppRunnerClient::from_context(ctx, stack),
            account_id,
            region: ctx.region().to_string(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl std::fmt::Debug for AwsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProvider")
            .field("account_id", &self.account_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl CloudProvider for AwsProvider {
    async fn read(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        match kind {
            ResourceKind::OidcProvider => self.iam.read_oidc_provider(declared).await,
            ResourceKind::IamRole => self.iam.read_role(declared).await,
            ResourceKind::IamPolicy => self.iam.read_policy(declared).await,
            ResourceKind::PolicyAttachment => self.iam.read_attachment(declared).await,
            ResourceKind::EcrRepository => self.ecr.read_repository(declared).await,
            ResourceKind::Secret => self.secrets.read_secret(declared).await,
            ResourceKind::SecretVersion => {
                let secret_id = attr_str(declared, "secret_id")?;
                let current = self.secrets.current_version(secret_id).await?;
                Ok(current.map(|v| RemoteResource {
                    id: v.version_id,
                    observed: Attributes::from([("value".to_string(), json!(v.fingerprint))]),
                    computed: Attributes::new(),
                }))
            }
            ResourceKind::AppRunnerService => self.apprunner.read_service(declared).await,
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        match kind {
            ResourceKind::OidcProvider => self.iam.create_oidc_provider(declared).await,
            ResourceKind::IamRole => self.iam.create_role(declared).await,
            ResourceKind::IamPolicy => self.iam.create_policy(declared).await,
            ResourceKind::PolicyAttachment => self.iam.create_attachment(declared).await,
            ResourceKind::EcrRepository => self.ecr.create_repository(declared).await,
            ResourceKind::Secret => self.secrets.create_secret(declared).await,
            ResourceKind::SecretVersion => Err(ProviderError::Unsupported(
                "secret values are written with put_secret_value".into(),
            )),
            ResourceKind::AppRunnerService => self.apprunner.create_service(declared).await,
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<RemoteResource, ProviderError> {
        match kind {
            ResourceKind::OidcProvider => self.iam.update_oidc_provider(remote, changes).await?,
            ResourceKind::IamRole => self.iam.update_role(declared, changes).await?,
            ResourceKind::IamPolicy => self.iam.update_policy(remote, changes).await?,
            ResourceKind::EcrRepository => self.ecr.update_repository(declared, changes).await?,
            ResourceKind::Secret => self.secrets.update_secret(remote, changes).await?,
            ResourceKind::AppRunnerService => {
                return self.apprunner.update_service(remote, declared).await;
            }
            ResourceKind::PolicyAttachment | ResourceKind::SecretVersion => {
                return Err(ProviderError::Unsupported(format!(
                    "{kind} cannot be updated in place"
                )));
            }
        }
        Ok(with_changes(remote, changes))
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<(), ProviderError> {
        let result = match kind {
            ResourceKind::OidcProvider => self.iam.delete_oidc_provider(remote).await,
            ResourceKind::IamRole => self.iam.delete_role(declared).await,
            ResourceKind::IamPolicy => self.iam.delete_policy(remote).await,
            ResourceKind::PolicyAttachment => self.iam.delete_attachment(declared).await,
            ResourceKind::EcrRepository => self.ecr.delete_repository(declared).await,
            ResourceKind::Secret => self.secrets.delete_secret(remote, declared).await,
            ResourceKind::SecretVersion => Err(ProviderError::Unsupported(
                "secret versions are removed with their secret".into(),
            )),
            ResourceKind::AppRunnerService => self.apprunner.delete_service(remote).await,
        };
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn current_secret_version(
        &self,
        secret_id: &str,
    ) -> Result<Option<SecretVersionInfo>, ProviderError> {
        self.secrets.current_version(secret_id).await
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        value: &Sensitive,
    ) -> Result<String, ProviderError> {
        self.secrets.put_value(secret_id, value).await
    }
}

/// Map "not found" to `None`
fn found<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// `remote` with `changes` applied to its observed attributes
fn with_changes(remote: &RemoteResource, changes: &[AttributeChange]) -> RemoteResource {
    let mut updated = remote.clone();
    for change in changes {
        updated.observed.insert(change.key.clone(), change.after.clone());
    }
    updated
}

fn attr_bool(attrs: &Attributes, key: &str) -> Option<bool> {
    attrs.get(key).and_then(Json::as_bool)
}

fn attr_u64(attrs: &Attributes, key: &str) -> Option<u64> {
    attrs.get(key).and_then(Json::as_u64)
}

/// A JSON document attribute serialized for an AWS API call
fn attr_document(attrs: &Attributes, key: &str) -> Result<String, ProviderError> {
    let doc = attrs
        .get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            ProviderError::InvalidDocument(format!("missing document attribute '{key}'"))
        })?;
    serde_json::to_string(doc).map_err(|e| ProviderError::InvalidDocument(e.to_string()))
}

/// Parse a policy document as IAM returns it (URL-encoded JSON)
fn parse_iam_document(encoded: &str) -> Result<Json, ProviderError> {
    let decoded = urlencoding::decode(encoded)
        .map_err(|e| {
            ProviderError::InvalidDocument(format!("policy document is not URL-encoded UTF-8: {e}"))
        })?;
    serde_json::from_str(&decoded)
        .map_err(|e| ProviderError::InvalidDocument(format!("policy document is not JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iam_document() {
        let encoded = "%7B%22Version%22%3A%222012-10-17%22%2C%22Statement%22%3A%5B%5D%7D";
        let doc = parse_iam_document(encoded).unwrap();
        assert_eq!(doc, json!({"Version": "2012-10-17", "Statement": []}));
        assert!(parse_iam_document("not%20json").is_err());
    }

    #[test]
    fn test_attr_document_requires_object() {
        let attrs = Attributes::from([
            ("doc".to_string(), json!({"Version": "2012-10-17"})),
            ("name".to_string(), json!("x")),
        ]);
        assert_eq!(attr_document(&attrs, "doc").unwrap(), r#"{"Version":"2012-10-17"}"#);
        assert!(attr_document(&attrs, "name").is_err());
        assert!(attr_document(&attrs, "missing").is_err());
    }

    #[test]
    fn test_found_maps_not_found() {
        assert_eq!(found(Ok::<_, ProviderError>(1)).unwrap(), Some(1));
        assert_eq!(
            found::<u8>(Err(ProviderError::not_found("role", "x"))).unwrap(),
            None
        );
        assert!(found::<u8>(Err(ProviderError::Throttled)).is_err());
    }

    #[test]
    fn test_with_changes() {
        let remote = RemoteResource {
            id: "arn".into(),
            observed: Attributes::from([("description".to_string(), json!("old"))]),
            computed: Attributes::new(),
        };
        let changes = vec![AttributeChange {
            key: "description".into(),
            before: Some(json!("old")),
            after: json!("new"),
        }];
        assert_eq!(with_changes(&remote, &changes).observed["description"], json!("new"));
    }
}
