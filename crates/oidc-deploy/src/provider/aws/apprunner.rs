//! App Runner service
//!
//! Services are looked up by name, since App Runner addresses them by an
//! ARN that embeds a generated id. Create, update and delete return before
//! the operation finishes. Create and update wait for their operation to
//! succeed: a failed update rolls the service back to `RUNNING`, so the
//! service status alone cannot tell success from rollback. Delete waits
//! for the service to go away.

use super::tags::apprunner_tags;
use super::{AwsContext, attr_bool, found};
use crate::model::Attributes;
use crate::provider::{ProviderError, RemoteResource, attr_opt_str, attr_str, from_sdk_error};
use crate::wait::{WaitConfig, wait_for_resource};
use aws_sdk_apprunner::Client;
use aws_sdk_apprunner::types::{
    AuthenticationConfiguration, ImageConfiguration, ImageRepository, ImageRepositoryType,
    InstanceConfiguration, OperationStatus, Service, ServiceStatus, SourceConfiguration,
};
use serde_json::{Map, Value as Json, json};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct AppRunnerClient {
    client: Client,
    stack: String,
}

impl AppRunnerClient {
    pub fn from_context(ctx: &AwsContext, stack: &str) -> Self {
        Self {
            client: ctx.apprunner_client(),
            stack: stack.to_string(),
        }
    }

    /// ARN of the live (not deleted) service called `name`
    async fn find_service_arn(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let mut next_token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_services()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(from_sdk_error)?;

            let hit = resp.service_summary_list().iter().find(|s| {
                s.service_name() == Some(name) && s.status() != Some(&ServiceStatus::Deleted)
            });
            if let Some(summary) = hit {
                return Ok(summary.service_arn().map(str::to_string));
            }

            match resp.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn describe(&self, arn: &str) -> Result<Service, ProviderError> {
        let resp = self
            .client
            .describe_service()
            .service_arn(arn)
            .send()
            .await
            .map_err(from_sdk_error)?;
        resp.service()
            .cloned()
            .ok_or_else(|| ProviderError::missing("service in DescribeService response"))
    }

    pub async fn read_service(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let name = attr_str(declared, "name")?;
        let Some(arn) = self.find_service_arn(name).await? else {
            return Ok(None);
        };
        let service = found(self.describe(&arn).await)?;
        Ok(service.as_ref().map(remote_service))
    }

    pub async fn create_service(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;

        info!(service = %name, "Creating App Runner service");
        let resp = self
            .client
            .create_service()
            .service_name(name)
            .source_configuration(source_configuration(declared)?)
            .instance_configuration(instance_configuration(declared))
            .set_tags(Some(apprunner_tags(&self.stack)))
            .send()
            .await
            .map_err(from_sdk_error)?;
        let arn = resp
            .service()
            .map(|s| s.service_arn().to_string())
            .ok_or_else(|| ProviderError::missing("service in CreateService response"))?;

        self.wait_for_operation(&arn, resp.operation_id(), name).await?;
        Ok(remote_service(&self.describe(&arn).await?))
    }

    /// Push the full declared configuration; App Runner redeploys on update
    pub async fn update_service(
        &self,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;

        info!(service = %name, "Updating App Runner service");
        let resp = self
            .client
            .update_service()
            .service_arn(&remote.id)
            .source_configuration(source_configuration(declared)?)
            .instance_configuration(instance_configuration(declared))
            .send()
            .await
            .map_err(from_sdk_error)?;

        self.wait_for_operation(&remote.id, resp.operation_id(), name).await?;
        Ok(remote_service(&self.describe(&remote.id).await?))
    }

    pub async fn delete_service(&self, remote: &RemoteResource) -> Result<(), ProviderError> {
        info!(service = %remote.id, "Deleting App Runner service");
        self.client
            .delete_service()
            .service_arn(&remote.id)
            .send()
            .await
            .map_err(from_sdk_error)?;

        wait_for_resource(
            WaitConfig::apprunner(),
            move || async move {
                match found(self.describe(&remote.id).await)? {
                    None => Ok(true),
                    Some(service) => deleted(&service),
                }
            },
            &remote.id,
        )
        .await
    }

    /// Poll the service's operations until `operation_id` finishes
    async fn wait_for_operation(
        &self,
        arn: &str,
        operation_id: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        wait_for_resource(
            WaitConfig::apprunner(),
            move || async move {
                let resp = self
                    .client
                    .list_operations()
                    .service_arn(arn)
                    .send()
                    .await
                    .map_err(from_sdk_error)?;
                let status = resp
                    .operation_summary_list()
                    .iter()
                    .find(|op| op.id() == Some(operation_id))
                    .and_then(|op| op.status());
                operation_settled(name, status)
            },
            name,
        )
        .await
    }
}

/// Ready once the operation succeeded; a failed or rolled back one is an error
fn operation_settled(name: &str, status: Option<&OperationStatus>) -> Result<bool, ProviderError> {
    let Some(status) = status else {
        debug!(service = %name, "Operation not listed yet");
        return Ok(false);
    };
    debug!(service = %name, status = %status.as_str(), "App Runner operation status");
    match status {
        OperationStatus::Succeeded => Ok(true),
        OperationStatus::Failed
        | OperationStatus::RollbackSucceeded
        | OperationStatus::RollbackFailed => Err(ProviderError::Sdk {
            code: Some(status.as_str().to_string()),
            message: format!("operation on service {name} ended {}", status.as_str()),
        }),
        _ => Ok(false),
    }
}

/// Ready once the service is deleted; `DELETE_FAILED` ends the wait with an error
fn deleted(service: &Service) -> Result<bool, ProviderError> {
    let status = service.status();
    debug!(
        service = %service.service_name(),
        status = %status.as_str(),
        "App Runner service status"
    );
    match status {
        ServiceStatus::Deleted => Ok(true),
        ServiceStatus::DeleteFailed => Err(ProviderError::Sdk {
            code: Some(status.as_str().to_string()),
            message: format!("service {} reached {}", service.service_name(), status.as_str()),
        }),
        _ => Ok(false),
    }
}

fn source_configuration(declared: &Attributes) -> Result<SourceConfiguration, ProviderError> {
    let secrets: HashMap<String, String> = declared
        .get("runtime_environment_secrets")
        .and_then(Json::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let image = ImageRepository::builder()
        .image_identifier(attr_str(declared, "image_identifier")?)
        .image_repository_type(ImageRepositoryType::Ecr)
        .image_configuration(
            ImageConfiguration::builder()
                .set_port(attr_opt_str(declared, "port").map(str::to_string))
                .set_runtime_environment_secrets((!secrets.is_empty()).then_some(secrets))
                .build(),
        )
        .build()
        .map_err(|e| ProviderError::InvalidDocument(format!("image repository: {e}")))?;

    Ok(SourceConfiguration::builder()
        .image_repository(image)
        .authentication_configuration(
            AuthenticationConfiguration::builder()
                .set_access_role_arn(attr_opt_str(declared, "access_role_arn").map(str::to_string))
                .build(),
        )
        .auto_deployments_enabled(attr_bool(declared, "auto_deployments_enabled").unwrap_or(false))
        .build())
}

fn instance_configuration(declared: &Attributes) -> InstanceConfiguration {
    InstanceConfiguration::builder()
        .set_cpu(attr_opt_str(declared, "cpu").map(str::to_string))
        .set_memory(attr_opt_str(declared, "memory").map(str::to_string))
        .set_instance_role_arn(attr_opt_str(declared, "instance_role_arn").map(str::to_string))
        .build()
}

/// Observed and computed attributes of a described service
fn remote_service(service: &Service) -> RemoteResource {
    let mut observed = Attributes::from([("name".to_string(), json!(service.service_name()))]);

    if let Some(source) = service.source_configuration() {
        if let Some(image) = source.image_repository() {
            observed.insert("image_identifier".to_string(), json!(image.image_identifier()));
            if let Some(config) = image.image_configuration() {
                if let Some(port) = config.port() {
                    observed.insert("port".to_string(), json!(port));
                }
                let secrets: Map<String, Json> = config
                    .runtime_environment_secrets()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), json!(v))).collect())
                    .unwrap_or_default();
                observed.insert("runtime_environment_secrets".to_string(), Json::Object(secrets));
            }
        }
        if let Some(arn) = source
            .authentication_configuration()
            .and_then(|a| a.access_role_arn())
        {
            observed.insert("access_role_arn".to_string(), json!(arn));
        }
        if let Some(enabled) = source.auto_deployments_enabled() {
            observed.insert("auto_deployments_enabled".to_string(), json!(enabled));
        }
    }

    if let Some(instance) = service.instance_configuration() {
        for (key, value) in [
            ("cpu", instance.cpu()),
            ("memory", instance.memory()),
            ("instance_role_arn", instance.instance_role_arn()),
        ] {
            if let Some(value) = value {
                observed.insert(key.to_string(), json!(value));
            }
        }
    }

    RemoteResource {
        id: service.service_arn().to_string(),
        observed,
        computed: Attributes::from([
            ("arn".to_string(), json!(service.service_arn())),
            ("name".to_string(), json!(service.service_name())),
            ("service_id".to_string(), json!(service.service_id())),
            (
                "service_url".to_string(),
                json!(service.service_url().unwrap_or_default()),
            ),
            ("status".to_string(), json!(service.status().as_str())),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_success_ends_wait() {
        assert!(operation_settled("app", Some(&OperationStatus::Succeeded)).unwrap());
        assert!(!operation_settled("app", Some(&OperationStatus::InProgress)).unwrap());
        assert!(!operation_settled("app", Some(&OperationStatus::Pending)).unwrap());
        assert!(!operation_settled("app", None).unwrap());
    }

    #[test]
    fn test_rolled_back_update_is_an_error() {
        // The service is back at RUNNING, but the operation did not succeed
        assert!(!operation_settled("app", Some(&OperationStatus::RollbackInProgress)).unwrap());
        for status in [
            OperationStatus::RollbackSucceeded,
            OperationStatus::RollbackFailed,
            OperationStatus::Failed,
        ] {
            let err = operation_settled("app", Some(&status)).unwrap_err();
            assert!(err.to_string().contains(status.as_str()), "{err}");
            assert!(!err.is_transient());
        }
    }
}
