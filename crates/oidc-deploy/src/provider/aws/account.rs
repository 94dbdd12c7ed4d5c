//! The account a deploy runs against
//!
//! Resolved once from the caller's credentials. IAM identities that are not
//! looked up by name (the GitHub OIDC provider, the deploy policy) are
//! addressed by ARNs built from it, and each run row stores it.

use anyhow::{Context, Result, ensure};
use tracing::info;

/// Twelve-digit AWS account id
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Result<Self> {
        ensure!(
            raw.len() == 12 && raw.bytes().all(|b| b.is_ascii_digit()),
            "'{raw}' is not a 12-digit AWS account id"
        );
        Ok(AccountId(raw.to_string()))
    }

    /// ARN IAM assigns to an OIDC provider registered for `url`
    pub fn oidc_provider_arn(&self, url: &str) -> String {
        format!(
            "arn:aws:iam::{}:oidc-provider/{}",
            self.0,
            url.trim_start_matches("https://")
        )
    }

    /// ARN of a customer-managed policy named `name`
    pub fn policy_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:policy/{}", self.0, name)
    }
}

/// Account behind the active credentials, via STS GetCallerIdentity
///
/// Needs no IAM permission, so a failure here means the credentials
/// themselves are unusable and nothing else is attempted.
pub async fn caller_account(config: &aws_config::SdkConfig) -> Result<AccountId> {
    let identity = aws_sdk_sts::Client::new(config)
        .get_caller_identity()
        .send()
        .await
        .context("Failed to get AWS caller identity - check credentials")?;

    let account = identity
        .account()
        .context("STS GetCallerIdentity returned no account")?;
    let account_id = AccountId::parse(account)?;
    info!(account_id = %account_id, "Deploying into account");
    Ok(account_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(AccountId::parse("123456789012").unwrap().as_str(), "123456789012");
        assert!(AccountId::parse("12345").is_err());
        assert!(AccountId::parse("12345678901a").is_err());
    }

    #[test]
    fn test_iam_arns() {
        let account = AccountId::parse("123456789012").unwrap();
        assert_eq!(
            account.oidc_provider_arn("https://token.actions.githubusercontent.com"),
            "arn:aws:iam::123456789012:oidc-provider/token.actions.githubusercontent.com"
        );
        assert_eq!(
            account.policy_arn("app-github-deploy"),
            "arn:aws:iam::123456789012:policy/app-github-deploy"
        );
    }
}
