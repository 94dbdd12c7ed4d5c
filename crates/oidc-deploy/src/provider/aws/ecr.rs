//! ECR image repository

use super::tags::ecr_tags;
use super::{AwsContext, attr_bool, found};
use crate::model::Attributes;
use crate::provider::{ProviderError, RemoteResource, attr_opt_str, attr_str, from_sdk_error};
use crate::reconcile::AttributeChange;
use aws_sdk_ecr::Client;
use aws_sdk_ecr::types::{ImageScanningConfiguration, ImageTagMutability, Repository};
use serde_json::json;
use tracing::info;

pub struct EcrClient {
    client: Client,
    stack: String,
}

impl EcrClient {
    pub fn from_context(ctx: &AwsContext, stack: &str) -> Self {
        Self {
            client: ctx.ecr_client(),
            stack: stack.to_string(),
        }
    }

    pub async fn read_repository(
        &self,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let name = attr_str(declared, "name")?;
        let resp = found(
            self.client
                .describe_repositories()
                .repository_names(name)
                .send()
                .await
                .map_err(from_sdk_error),
        )?;

        resp.as_ref()
            .and_then(|r| r.repositories().first())
            .map(repository)
            .transpose()
    }

    pub async fn create_repository(
        &self,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let name = attr_str(declared, "name")?;
        let mutability = attr_opt_str(declared, "image_tag_mutability").unwrap_or("MUTABLE");
        let scan_on_push = attr_bool(declared, "scan_on_push").unwrap_or(false);

        info!(repository = %name, "Creating ECR repository");
        let resp = self
            .client
            .create_repository()
            .repository_name(name)
            .image_tag_mutability(ImageTagMutability::from(mutability))
            .image_scanning_configuration(
                ImageScanningConfiguration::builder()
                    .scan_on_push(scan_on_push)
                    .build(),
            )
            .set_tags(Some(ecr_tags(&self.stack)?))
            .send()
            .await
            .map_err(from_sdk_error)?;

        let repo = resp
            .repository()
            .ok_or_else(|| ProviderError::missing("repository in CreateRepository response"))?;
        repository(repo)
    }

    pub async fn update_repository(
        &self,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<(), ProviderError> {
        let name = attr_str(declared, "name")?;
        for change in changes {
            match change.key.as_str() {
                "image_tag_mutability" => {
                    let mutability = change.after.as_str().unwrap_or("MUTABLE");
                    self.client
                        .put_image_tag_mutability()
                        .repository_name(name)
                        .image_tag_mutability(ImageTagMutability::from(mutability))
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                "scan_on_push" => {
                    self.client
                        .put_image_scanning_configuration()
                        .repository_name(name)
                        .image_scanning_configuration(
                            ImageScanningConfiguration::builder()
                                .scan_on_push(change.after.as_bool().unwrap_or(false))
                                .build(),
                        )
                        .send()
                        .await
                        .map_err(from_sdk_error)?;
                }
                other => {
                    return Err(ProviderError::Unsupported(format!(
                        "repository attribute '{other}' cannot be updated"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Delete the repository; with `force_delete` its images go too
    pub async fn delete_repository(&self, declared: &Attributes) -> Result<(), ProviderError> {
        let name = attr_str(declared, "name")?;
        let force = attr_bool(declared, "force_delete").unwrap_or(false);

        info!(repository = %name, force, "Deleting ECR repository");
        self.client
            .delete_repository()
            .repository_name(name)
            .force(force)
            .send()
            .await
            .map_err(from_sdk_error)?;
        Ok(())
    }
}

fn repository(repo: &Repository) -> Result<RemoteResource, ProviderError> {
    let arn = repo
        .repository_arn()
        .ok_or_else(|| ProviderError::missing("repository ARN"))?;
    let name = repo.repository_name().unwrap_or_default();
    let scan_on_push = repo
        .image_scanning_configuration()
        .is_some_and(|c| c.scan_on_push());

    let mut observed = Attributes::from([
        ("name".to_string(), json!(name)),
        ("scan_on_push".to_string(), json!(scan_on_push)),
    ]);
    if let Some(mutability) = repo.image_tag_mutability() {
        observed.insert("image_tag_mutability".to_string(), json!(mutability.as_str()));
    }

    Ok(RemoteResource {
        id: arn.to_string(),
        observed,
        computed: Attributes::from([
            ("arn".to_string(), json!(arn)),
            ("name".to_string(), json!(name)),
            (
                "repository_url".to_string(),
                json!(repo.repository_uri().unwrap_or_default()),
            ),
        ]),
    })
}
