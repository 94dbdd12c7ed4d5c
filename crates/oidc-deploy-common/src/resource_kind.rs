//! Resource kinds and destroy ordering
//!
//! The engine manages a fixed catalog of AWS resource kinds. This module
//! names them, gives them stable string forms for the state database, and
//! records the per-kind rules the reconciler needs (which attributes are
//! part of a resource's identity, which kinds can be tagged, and in which
//! order orphans are destroyed).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Types of AWS resources managed by oidc-deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// IAM OpenID Connect identity provider
    OidcProvider,
    /// IAM role
    IamRole,
    /// Customer-managed IAM policy
    IamPolicy,
    /// Attachment of a managed policy to a role
    PolicyAttachment,
    /// ECR image repository
    EcrRepository,
    /// Secrets Manager secret container
    Secret,
    /// Value stored in a secret container
    SecretVersion,
    /// App Runner service
    AppRunnerService,
}

impl ResourceKind {
    /// All kinds, in declaration order
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::OidcProvider,
        ResourceKind::IamRole,
        ResourceKind::IamPolicy,
        ResourceKind::PolicyAttachment,
        ResourceKind::EcrRepository,
        ResourceKind::Secret,
        ResourceKind::SecretVersion,
        ResourceKind::AppRunnerService,
    ];

    /// Stable string form (used in resource addresses and the state database)
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::OidcProvider => "oidc_provider",
            ResourceKind::IamRole => "iam_role",
            ResourceKind::IamPolicy => "iam_policy",
            ResourceKind::PolicyAttachment => "policy_attachment",
            ResourceKind::EcrRepository => "ecr_repository",
            ResourceKind::Secret => "secret",
            ResourceKind::SecretVersion => "secret_version",
            ResourceKind::AppRunnerService => "apprunner_service",
        }
    }

    /// Parse the string form produced by [`ResourceKind::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Get destroy priority for resources removed from the model (lower number = destroy first)
    ///
    /// Orphans no longer have graph edges, so they are destroyed by kind:
    /// - 0: App Runner services (hold references to roles, images and secrets)
    /// - 1: Policy attachments (must go before their roles and policies)
    /// - 2: Secret versions (removed together with their container)
    /// - 3: IAM policies
    /// - 4: IAM roles
    /// - 5: Secrets and ECR repositories
    /// - 6: OIDC provider (trusted by roles)
    pub fn destroy_priority(self) -> u8 {
        match self {
            ResourceKind::AppRunnerService => 0,
            ResourceKind::PolicyAttachment => 1,
            ResourceKind::SecretVersion => 2,
            ResourceKind::IamPolicy => 3,
            ResourceKind::IamRole => 4,
            ResourceKind::Secret => 5,
            ResourceKind::EcrRepository => 5,
            ResourceKind::OidcProvider => 6,
        }
    }

    /// Whether a change to `attribute` forces delete-then-create instead of an update
    pub fn is_identity_attribute(self, attribute: &str) -> bool {
        match self {
            ResourceKind::OidcProvider => attribute == "url",
            ResourceKind::PolicyAttachment => matches!(attribute, "role" | "policy_arn"),
            ResourceKind::SecretVersion => attribute == "secret_id",
            _ => attribute == "name",
        }
    }

    /// Whether the provider supports tags on this kind
    pub fn is_taggable(self) -> bool {
        !matches!(
            self,
            ResourceKind::PolicyAttachment | ResourceKind::SecretVersion
        )
    }

    /// Whether an absent instance of this kind is left in place rather than deleted
    ///
    /// Secret versions cannot be removed individually: they disappear with
    /// their container, and a blank declared value must never clobber a
    /// value rotated out of band.
    pub fn is_retained_when_absent(self) -> bool {
        self == ResourceKind::SecretVersion
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::parse("ec2_instance"), None);
    }

    #[test]
    fn test_services_before_roles() {
        assert!(
            ResourceKind::AppRunnerService.destroy_priority()
                < ResourceKind::IamRole.destroy_priority(),
            "Services must be destroyed before the roles they run as"
        );
    }

    #[test]
    fn test_attachments_before_policies_and_roles() {
        let attachment = ResourceKind::PolicyAttachment.destroy_priority();
        assert!(attachment < ResourceKind::IamPolicy.destroy_priority());
        assert!(attachment < ResourceKind::IamRole.destroy_priority());
    }

    #[test]
    fn test_oidc_provider_last() {
        for kind in ResourceKind::ALL {
            assert!(kind.destroy_priority() <= ResourceKind::OidcProvider.destroy_priority());
        }
    }

    #[test]
    fn test_identity_attributes() {
        assert!(ResourceKind::IamRole.is_identity_attribute("name"));
        assert!(!ResourceKind::IamRole.is_identity_attribute("assume_role_policy"));
        assert!(ResourceKind::OidcProvider.is_identity_attribute("url"));
        assert!(ResourceKind::PolicyAttachment.is_identity_attribute("policy_arn"));
        assert!(!ResourceKind::AppRunnerService.is_identity_attribute("cpu"));
    }

    #[test]
    fn test_only_secret_versions_are_retained() {
        for kind in ResourceKind::ALL {
            assert_eq!(
                kind.is_retained_when_absent(),
                kind == ResourceKind::SecretVersion
            );
        }
    }
}
