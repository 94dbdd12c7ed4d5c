//! Standard tags in each SDK's tag type
//!
//! IAM and ECR validate tags at build time; Secrets Manager and App Runner
//! tags are plain structs.

use super::ProviderError;
use oidc_deploy_common::tags::standard_tags;

fn tag_error(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::InvalidDocument(format!("Failed to build tag: {e}"))
}

pub fn iam_tags(stack: &str) -> Result<Vec<aws_sdk_iam::types::Tag>, ProviderError> {
    standard_tags(stack)
        .into_iter()
        .map(|(key, value)| {
            aws_sdk_iam::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(tag_error)
        })
        .collect()
}

pub fn ecr_tags(stack: &str) -> Result<Vec<aws_sdk_ecr::types::Tag>, ProviderError> {
    standard_tags(stack)
        .into_iter()
        .map(|(key, value)| {
            aws_sdk_ecr::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(tag_error)
        })
        .collect()
}

pub fn secrets_tags(stack: &str) -> Vec<aws_sdk_secretsmanager::types::Tag> {
    standard_tags(stack)
        .into_iter()
        .map(|(key, value)| {
            aws_sdk_secretsmanager::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
        })
        .collect()
}

pub fn apprunner_tags(stack: &str) -> Vec<aws_sdk_apprunner::types::Tag> {
    standard_tags(stack)
        .into_iter()
        .map(|(key, value)| {
            aws_sdk_apprunner::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oidc_deploy_common::tags::{TAG_STACK, TAG_TOOL};

    #[test]
    fn test_every_sdk_gets_the_same_keys() {
        let iam: Vec<String> =
            iam_tags("app").unwrap().iter().map(|t| t.key().to_string()).collect();
        let ecr: Vec<String> =
            ecr_tags("app").unwrap().iter().map(|t| t.key().to_string()).collect();
        let sm: Vec<String> = secrets_tags("app")
            .iter()
            .filter_map(|t| t.key().map(str::to_string))
            .collect();
        let ar: Vec<String> = apprunner_tags("app")
            .iter()
            .filter_map(|t| t.key().map(str::to_string))
            .collect();

        assert!(iam.contains(&TAG_TOOL.to_string()));
        assert!(iam.contains(&TAG_STACK.to_string()));
        assert_eq!(iam, ecr);
        assert_eq!(iam, sm);
        assert_eq!(iam, ar);
    }
}
