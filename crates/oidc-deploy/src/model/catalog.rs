//! The deploy stack topology
//!
//! GitHub OIDC trust, deploy role and policy, ECR repository, API key
//! secret, App Runner roles and the optional App Runner service, wired
//! together by attribute references.

use super::{
    Condition, Output, PolicyDocument, Resource, StackModel, Statement, TrustPolicy, Value,
};
use crate::conditions::Flags;
use crate::config::StackConfig;
use oidc_deploy_common::ResourceKind;
use oidc_deploy_common::defaults::{
    API_KEY_ENV_VAR, GITHUB_OIDC_AUDIENCE, GITHUB_OIDC_THUMBPRINT, GITHUB_OIDC_URL,
};

/// Provision the App Runner service
pub const FLAG_MANAGE_SERVICE: &str = "manage_service";

/// A non-empty API key was supplied
pub const FLAG_SECRET_VALUE_PROVIDED: &str = "secret_value_provided";

/// AWS managed policy letting App Runner pull from private ECR
pub const APPRUNNER_ECR_ACCESS_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSAppRunnerServicePolicyForECRAccess";

const ECR_PUSH_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:CompleteLayerUpload",
    "ecr:GetDownloadUrlForLayer",
    "ecr:InitiateLayerUpload",
    "ecr:PutImage",
    "ecr:UploadLayerPart",
];

const APPRUNNER_DEPLOY_ACTIONS: &[&str] = &[
    "apprunner:CreateService",
    "apprunner:DescribeService",
    "apprunner:ListOperations",
    "apprunner:ListServices",
    "apprunner:StartDeployment",
    "apprunner:UpdateService",
];

/// Output names consumed by the CI workflow
pub mod outputs {
    pub const DEPLOY_ROLE_ARN: &str = "deploy_role_arn";
    pub const ECR_REPOSITORY_NAME: &str = "ecr_repository_name";
    pub const APPRUNNER_SERVICE_ARN: &str = "apprunner_service_arn";
    pub const APPRUNNER_SERVICE_URL: &str = "apprunner_service_url";
}

/// Configuration toggles the conditions are evaluated against
pub fn flags(config: &StackConfig) -> Flags {
    Flags::default()
        .with(FLAG_MANAGE_SERVICE, config.service.manage)
        .with(FLAG_SECRET_VALUE_PROVIDED, config.secret_value_provided())
}

/// Build the full desired model for `config`
pub fn build_stack(config: &StackConfig) -> StackModel {
    let app = config.service.app_name.as_str();
    let mut stack = StackModel::new(app);

    let oidc = stack.add(
        Resource::new(ResourceKind::OidcProvider, "github")
            .with("url", GITHUB_OIDC_URL)
            .with("client_ids", Value::list([GITHUB_OIDC_AUDIENCE]))
            .with("thumbprints", Value::list([GITHUB_OIDC_THUMBPRINT])),
    );

    let ecr = stack.add(
        Resource::new(ResourceKind::EcrRepository, "app")
            .with("name", app)
            .with("image_tag_mutability", "MUTABLE")
            .with("scan_on_push", true)
            .with("force_delete", true),
    );

    let secret = stack.add(
        Resource::new(ResourceKind::Secret, "api_key")
            .with("name", format!("{app}/openai-api-key"))
            .with("description", format!("OpenAI API key for {app}"))
            .with("recovery_window_days", config.secret.recovery_window_days),
    );

    let mut secret_version = Resource::new(ResourceKind::SecretVersion, "api_key")
        .with("secret_id", secret.attr("arn"))
        .when(Condition::flag(FLAG_SECRET_VALUE_PROVIDED));
    if let Some(value) = &config.secret.api_key {
        secret_version = secret_version.with("value", value.clone());
    }
    let secret_version = stack.add(secret_version);

    let access_role = stack.add(
        Resource::new(ResourceKind::IamRole, "apprunner_access")
            .with("name", format!("{app}-apprunner-access"))
            .with("description", "Lets App Runner pull images from ECR")
            .with(
                "assume_role_policy",
                TrustPolicy::service("build.apprunner.amazonaws.com"),
            ),
    );

    let ecr_access = stack.add(
        Resource::new(ResourceKind::PolicyAttachment, "apprunner_ecr_access")
            .with("role", access_role.attr("name"))
            .with("policy_arn", APPRUNNER_ECR_ACCESS_POLICY_ARN),
    );

    let instance_role = stack.add(
        Resource::new(ResourceKind::IamRole, "apprunner_instance")
            .with("name", format!("{app}-apprunner-instance"))
            .with("description", "Runtime role of the App Runner service")
            .with(
                "assume_role_policy",
                TrustPolicy::service("tasks.apprunner.amazonaws.com"),
            ),
    );

    let secret_read = stack.add(
        Resource::new(ResourceKind::IamPolicy, "apprunner_secret_read")
            .with("name", format!("{app}-apprunner-secret-read"))
            .with("description", "Read the API key secret at runtime")
            .with(
                "document",
                PolicyDocument::new(vec![
                    Statement::allow(["secretsmanager:GetSecretValue"])
                        .sid("ReadApiKey")
                        .on(secret.attr("arn")),
                ]),
            ),
    );

    let secret_read_attachment = stack.add(
        Resource::new(ResourceKind::PolicyAttachment, "apprunner_secret_read")
            .with("role", instance_role.attr("name"))
            .with("policy_arn", secret_read.attr("arn")),
    );

    let deploy_role = stack.add(
        Resource::new(ResourceKind::IamRole, "github_deploy")
            .with("name", format!("{app}-github-deploy"))
            .with("description", "Assumed by GitHub Actions to push images and deploy")
            .with(
                "assume_role_policy",
                TrustPolicy::github_oidc(oidc.attr("arn"), &config.github.org, &config.github.repo),
            ),
    );

    let deploy_policy = stack.add(
        Resource::new(ResourceKind::IamPolicy, "github_deploy")
            .with("name", format!("{app}-github-deploy"))
            .with("description", "Push images to ECR and roll out App Runner deployments")
            .with(
                "document",
                PolicyDocument::new(vec![
                    Statement::allow(["ecr:GetAuthorizationToken"])
                        .sid("EcrLogin")
                        .on_any(),
                    Statement::allow(ECR_PUSH_ACTIONS.iter().copied())
                        .sid("EcrPush")
                        .on(ecr.attr("arn")),
                    Statement::allow(APPRUNNER_DEPLOY_ACTIONS.iter().copied())
                        .sid("AppRunnerDeploy")
                        .on_any(),
                    Statement::allow(["iam:PassRole"])
                        .sid("PassAppRunnerRoles")
                        .on(access_role.attr("arn"))
                        .on(instance_role.attr("arn")),
                ]),
            ),
    );

    stack.add(
        Resource::new(ResourceKind::PolicyAttachment, "github_deploy")
            .with("role", deploy_role.attr("name"))
            .with("policy_arn", deploy_policy.attr("arn")),
    );

    let service = stack.add(
        Resource::new(ResourceKind::AppRunnerService, "app")
            .with("name", app)
            .with(
                "image_identifier",
                Value::Concat(vec![
                    ecr.attr("repository_url"),
                    format!(":{}", config.service.image_tag).into(),
                ]),
            )
            .with("port", config.service.port.to_string())
            .with("cpu", config.service.cpu.as_str())
            .with("memory", config.service.memory.as_str())
            .with(
                "runtime_environment_secrets",
                Value::map([(API_KEY_ENV_VAR, secret.attr("arn"))]),
            )
            .with("access_role_arn", access_role.attr("arn"))
            .with("instance_role_arn", instance_role.attr("arn"))
            .with("auto_deployments_enabled", false)
            .depends_on(ecr_access)
            .depends_on(secret_read_attachment)
            .depends_on(secret_version)
            .when(Condition::flag(FLAG_MANAGE_SERVICE)),
    );

    stack.outputs = vec![
        Output::required(outputs::DEPLOY_ROLE_ARN, deploy_role, "arn"),
        Output::required(outputs::ECR_REPOSITORY_NAME, ecr, "name"),
        Output::optional(outputs::APPRUNNER_SERVICE_ARN, service.clone(), "arn"),
        Output::optional(outputs::APPRUNNER_SERVICE_URL, service, "service_url"),
    ];

    stack
}
