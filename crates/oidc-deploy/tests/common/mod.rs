//! Shared fixtures for scenario tests
//!
//! Every scenario drives the real reconciler and state database against an
//! in-memory provider with a call log and fault injection.

#![allow(dead_code)]

use oidc_deploy::DeployError;
use oidc_deploy::config::{ConfigFile, ConfigOverrides, StackConfig};
use oidc_deploy::model::catalog;
use oidc_deploy::provider::MemoryProvider;
use oidc_deploy::reconcile::{Reconciler, Report, RetryPolicy};
use oidc_deploy::state::{DbPool, open_memory_db};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ORG: &str = "acme";
pub const REPO: &str = "widget";

/// Stack configuration as the CLI would compose it
pub fn config(manage: bool, api_key: Option<&str>) -> StackConfig {
    StackConfig::compose(
        ConfigFile::default(),
        ConfigOverrides {
            org: Some(ORG.into()),
            repo: Some(REPO.into()),
            manage_service: Some(manage),
            api_key: api_key.map(String::from),
            ..Default::default()
        },
    )
}

/// Stack configuration with a given secret recovery window
pub fn config_with_window(manage: bool, api_key: Option<&str>, days: u32) -> StackConfig {
    let mut config = config(manage, api_key);
    config.secret.recovery_window_days = days;
    config
}

/// One account and one state database, shared across runs
pub struct Harness {
    pub provider: Arc<MemoryProvider>,
    pub pool: DbPool,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            provider: Arc::new(MemoryProvider::new()),
            pool: open_memory_db().await.expect("in-memory state database"),
        }
    }

    pub fn reconciler(&self, config: &StackConfig) -> Reconciler<MemoryProvider> {
        Reconciler::new(self.provider.clone(), self.pool.clone(), config.stack_name())
            .with_target("123456789012", "us-east-1")
            .with_retry(RetryPolicy::fast(5))
    }

    pub async fn apply(&self, config: &StackConfig) -> Result<Report, DeployError> {
        let model = catalog::build_stack(config);
        self.reconciler(config)
            .apply(&model, &catalog::flags(config))
            .await
    }

    pub async fn plan(&self, config: &StackConfig) -> Result<Report, DeployError> {
        let model = catalog::build_stack(config);
        self.reconciler(config)
            .plan(&model, &catalog::flags(config))
            .await
    }

    pub async fn destroy(&self, config: &StackConfig) -> Result<Report, DeployError> {
        let model = catalog::build_stack(config);
        self.reconciler(config).destroy(&model).await
    }

    pub async fn apply_cancelled(
        &self,
        config: &StackConfig,
        cancel: CancellationToken,
    ) -> Result<Report, DeployError> {
        let model = catalog::build_stack(config);
        self.reconciler(config)
            .with_cancellation(cancel)
            .apply(&model, &catalog::flags(config))
            .await
    }
}
