//! AWS integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile cargo test --test aws_integration -- --ignored
//! ```
//!
//! They reconcile a reduced stack under a unique name and destroy it again.
//! The GitHub OIDC provider is account-wide and is left out.

use oidc_deploy::conditions::Flags;
use oidc_deploy::model::{PolicyDocument, Resource, Sensitive, StackModel, Statement, TrustPolicy};
use oidc_deploy::provider::CloudProvider;
use oidc_deploy::provider::aws::AwsProvider;
use oidc_deploy::reconcile::{Reconciler, RetryPolicy};
use oidc_deploy::state::open_memory_db;
use oidc_deploy_common::ResourceKind;
use oidc_deploy_test_utils::{get_test_region, test_stack_name};
use serde_json::json;
use std::sync::Arc;

fn reduced_stack(stack: &str, api_key: &str) -> StackModel {
    let mut model = StackModel::new(stack);

    model.add(
        Resource::new(ResourceKind::EcrRepository, "app")
            .with("name", stack)
            .with("image_tag_mutability", "MUTABLE")
            .with("scan_on_push", true)
            .with("force_delete", true),
    );

    let secret = model.add(
        Resource::new(ResourceKind::Secret, "api_key")
            .with("name", format!("{stack}/api-key"))
            .with("description", "integration test")
            .with("recovery_window_days", 0u32),
    );
    model.add(
        Resource::new(ResourceKind::SecretVersion, "api_key")
            .with("secret_id", secret.attr("arn"))
            .with("value", Sensitive::new(api_key)),
    );

    let role = model.add(
        Resource::new(ResourceKind::IamRole, "runtime")
            .with("name", format!("{stack}-runtime"))
            .with("description", "integration test")
            .with("assume_role_policy", TrustPolicy::service("tasks.apprunner.amazonaws.com")),
    );
    let policy = model.add(
        Resource::new(ResourceKind::IamPolicy, "read_key")
            .with("name", format!("{stack}-read-key"))
            .with("description", "integration test")
            .with(
                "document",
                PolicyDocument::new(vec![
                    Statement::allow(["secretsmanager:GetSecretValue"]).on(secret.attr("arn")),
                ]),
            ),
    );
    model.add(
        Resource::new(ResourceKind::PolicyAttachment, "read_key")
            .with("role", role.attr("name"))
            .with("policy_arn", policy.attr("arn")),
    );

    model
}

/// Test create, converge, update and destroy of a reduced stack
///
/// This test verifies:
/// 1. Every resource is created and the secret value written
/// 2. A second apply makes no changes (documents echoed back by IAM compare equal)
/// 3. A new key value is written as a new version
/// 4. Destroy removes everything, the secret without a recovery window
#[tokio::test]
#[ignore]
async fn test_reduced_stack_lifecycle() {
    let region = get_test_region();
    let stack = test_stack_name();
    let provider = Arc::new(
        AwsProvider::connect(&region, None, &stack)
            .await
            .expect("AWS credentials required - set AWS_PROFILE or AWS_ACCESS_KEY_ID"),
    );
    let pool = open_memory_db().await.unwrap();
    let reconciler = Reconciler::new(provider.clone(), pool, stack.clone())
        .with_target(provider.account_id().to_string(), region.clone())
        .with_retry(RetryPolicy::default().with_max_attempts(8));
    let flags = Flags::default();

    let model = reduced_stack(&stack, "sk-integration-one");
    let created = reconciler.apply(&model, &flags).await;

    // Always try to clean up, even when the apply failed
    let converged = match &created {
        Ok(_) => Some(reconciler.apply(&model, &flags).await),
        Err(_) => None,
    };
    let rotated = match &created {
        Ok(_) => Some(
            reconciler
                .apply(&reduced_stack(&stack, "sk-integration-two"), &flags)
                .await,
        ),
        Err(_) => None,
    };
    let destroyed = reconciler.destroy(&model).await;

    let created = created.expect("Should create the reduced stack");
    assert_eq!(created.counts().create, 6);

    let converged = converged.unwrap().expect("Second apply should succeed");
    assert!(!converged.has_changes(), "Second apply changed:\n{converged}");

    let rotated = rotated.unwrap().expect("Key change should apply");
    assert_eq!(rotated.counts().update, 1);

    let destroyed = destroyed.expect("Should destroy the reduced stack");
    assert_eq!(destroyed.counts().delete, 5);

    let gone = provider
        .read(ResourceKind::EcrRepository, &[("name".to_string(), json!(stack))].into())
        .await
        .expect("Should read repository");
    assert!(gone.is_none(), "Repository should not exist after destroy");
}
