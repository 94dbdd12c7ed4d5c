//! Secrets Manager: the API key container and its current value
//!
//! A secret scheduled for deletion reads as absent. Creating it again
//! restores it instead, since the name stays reserved until the recovery
//! window ends.

use super::tags::secrets_tags;
use super::{AwsContext, attr_u64, found};
use crate::model::{Attributes, Sensitive, fingerprint};
use crate::provider::{
    ProviderError, RemoteResource, SecretVersionInfo, attr_opt_str, attr_str, from_sdk_error,
};
use crate::reconcile::AttributeChange;
use aws_sdk_secretsmanager::Client;
use serde_json::json;
use tracing::{debug, info, warn};

pub struct SecretsClient {
    client: Client,
    stack: String,
}

impl SecretsClient {
    pub fn from_context(ctx: &AwsContext, stack: &str) -> Self {
        Self {
            client: ctx.secrets_client(),
            stack: stack.to_string(),
        }
    }

    pub async fn read_secret(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let name = attr_str(declared, "name")?;
        let resp = found(
            self.client
                .describe_secret()
                .secret_id(name)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(resp) = resp else {
            return Ok(None);
        };
        if resp.deleted_date().is_some() {
            debug!(secret = %name, "Secret is scheduled for deletion");
            return Ok(None);
        }

        let arn = resp.arn().ok_or_else(|| ProviderError::missing("secret ARN"))?;
        Ok(Some(secret(
            arn,
            resp.name().unwrap_or(name),
            resp.description().unwrap_or_default(),
        )))
    }

    pub async fn create_secret(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;
        let description = attr_opt_str(declared, "description");

        if let Some(restored) = self.restore_if_pending_deletion(name, description).await? {
            return Ok(restored);
        }

        info!(secret = %name, "Creating secret");
        let resp = self
            .client
            .create_secret()
            .name(name)
            .set_description(description.map(str::to_string))
            .set_tags(Some(secrets_tags(&self.stack)))
            .send()
            .await
            .map_err(from_sdk_error)?;

        let arn = resp.arn().ok_or_else(|| ProviderError::missing("secret ARN"))?;
        Ok(secret(arn, name, description.unwrap_or_default()))
    }

    async fn restore_if_pending_deletion(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let existing = found(
            self.client
                .describe_secret()
                .secret_id(name)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(existing) = existing.filter(|s| s.deleted_date().is_some()) else {
            return Ok(None);
        };
        let arn = existing.arn().ok_or_else(|| ProviderError::missing("secret ARN"))?;

        warn!(secret = %name, "Restoring secret scheduled for deletion");
        self.client
            .restore_secret()
            .secret_id(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;

        let current = existing.description().unwrap_or_default();
        let description = description.unwrap_or_default();
        if current != description {
            self.client
                .update_secret()
                .secret_id(arn)
                .description(description)
                .send()
                .await
                .map_err(from_sdk_error)?;
        }
        Ok(Some(secret(arn, name, description)))
    }

    pub async fn update_secret(
        &self,
        remote: &RemoteResource,
        changes: &[AttributeChange],
    ) -> Result<(), ProviderError> {
        for change in changes {
            match change.key.as_str() {
                "description" => {
                    self.client
                        .update_secret()
                        .secret_id(&remote.id)
                        .description(change.after.as_str().unwrap_or_default())
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                other => {
                    return Err(ProviderError::Unsupported(format!(
                        "secret attribute '{other}' cannot be updated"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Schedule deletion, or delete at once when the recovery window is zero
    pub async fn delete_secret(
        &self,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<(), ProviderError> {
        let window = attr_u64(declared, "recovery_window_days").unwrap_or(0);
        let request = self.client.delete_secret().secret_id(&remote.id);
        let request = if window == 0 {
            request.force_delete_without_recovery(true)
        } else {
            request.recovery_window_in_days(window as i64)
        };

        info!(secret = %remote.id, recovery_window_days = window, "Deleting secret");
        request.send().await.map_err(from_sdk_error)?;
        Ok(())
    }

    /// Fingerprint of the `AWSCURRENT` value, `None` if nothing was stored
    pub async fn current_version(
        &self,
        secret_id: &str,
    ) -> Result<Option<SecretVersionInfo>, ProviderError> {
        let resp = found(
            self.client
                .get_secret_value()
                .secret_id(secret_id)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;
        let Some(resp) = resp else {
            return Ok(None);
        };

        Ok(match (resp.version_id(), resp.secret_string()) {
            (Some(version_id), Some(value)) => Some(SecretVersionInfo {
                version_id: version_id.to_string(),
                fingerprint: fingerprint(value),
            }),
            _ => None,
        })
    }

    pub async fn put_value(
        &self,
        secret_id: &str,
        value: &Sensitive,
    ) -> Result<String, ProviderError> {
        let resp = self
            .client
            .put_secret_value()
            .secret_id(secret_id)
            .secret_string(value.expose())
            .send()
            .await
            .map_err(from_sdk_error)?;

        let version_id = resp
            .version_id()
            .ok_or_else(|| ProviderError::missing("secret version id"))?;
        info!(secret = %secret_id, version_id, "Stored new secret value");
        Ok(version_id.to_string())
    }
}

fn secret(arn: &str, name: &str, description: &str) -> RemoteResource {
    RemoteResource {
        id: arn.to_string(),
        observed: Attributes::from([
            ("name".to_string(), json!(name)),
            ("description".to_string(), json!(description)),
        ]),
        computed: Attributes::from([
            ("arn".to_string(), json!(arn)),
            ("name".to_string(), json!(name)),
        ]),
    }
}
