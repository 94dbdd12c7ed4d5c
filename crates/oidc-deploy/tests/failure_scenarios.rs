//! Partial failure, retry and cancellation
//!
//! Faults are injected into the in-memory provider; each test checks that
//! the run reports what it applied and that a re-run converges.

mod common;

use common::{Harness, config};
use oidc_deploy::DeployError;
use oidc_deploy::lock::ApplyLock;
use oidc_deploy::model::{Attributes, ResourceRef, Sensitive, catalog};
use oidc_deploy::provider::memory::Operation;
use oidc_deploy::provider::{
    CloudProvider, MemoryProvider, ProviderError, RemoteResource, SecretVersionInfo,
};
use oidc_deploy::reconcile::{AttributeChange, Reconciler, RetryPolicy};
use oidc_deploy::state::{RunStatus, get_resource, list_runs, open_memory_db};
use oidc_deploy_common::ResourceKind;
use oidc_deploy_test_utils::temp_state_dir;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sends the ECR create, then cancels the run and stops waiting for it
struct CancelDuringCreate {
    inner: MemoryProvider,
    cancel: CancellationToken,
}

impl CloudProvider for CancelDuringCreate {
    async fn read(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        self.inner.read(kind, declared).await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let created = self.inner.create(kind, declared).await?;
        if kind != ResourceKind::EcrRepository {
            return Ok(created);
        }
        self.cancel.cancel();
        Err(ProviderError::Timeout("wait for repository cancelled".into()))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<RemoteResource, ProviderError> {
        self.inner.update(kind, remote, declared, changes).await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<(), ProviderError> {
        self.inner.delete(kind, remote, declared).await
    }

    async fn current_secret_version(
        &self,
        secret_id: &str,
    ) -> Result<Option<SecretVersionInfo>, ProviderError> {
        self.inner.current_secret_version(secret_id).await
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        value: &Sensitive,
    ) -> Result<String, ProviderError> {
        self.inner.put_secret_value(secret_id, value).await
    }
}

#[tokio::test]
async fn test_throttling_is_retried() {
    let h = Harness::new().await;
    h.provider
        .fail(Operation::Create, ResourceKind::IamRole, ProviderError::Throttled, 2);

    h.apply(&config(true, None)).await.unwrap();

    let role_creates = h
        .provider
        .calls()
        .iter()
        .filter(|c| c.op == Operation::Create && c.kind == ResourceKind::IamRole)
        .count();
    assert_eq!(role_creates, 5, "3 roles plus 2 throttled attempts");
    assert_eq!(h.provider.count(ResourceKind::IamRole), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let h = Harness::new().await;
    h.provider.fail_always(
        Operation::Create,
        ResourceKind::EcrRepository,
        ProviderError::Throttled,
    );

    let err = h.apply(&config(false, None)).await.unwrap_err();

    let DeployError::ApplyFailed { resource, source, .. } = &err else {
        panic!("expected ApplyFailed, got {err}");
    };
    assert_eq!(resource.kind, ResourceKind::EcrRepository);
    assert!(matches!(source, ProviderError::Throttled));
    let attempts = h
        .provider
        .calls()
        .iter()
        .filter(|c| c.op == Operation::Create && c.kind == ResourceKind::EcrRepository)
        .count();
    assert_eq!(attempts, 5);
}

#[tokio::test]
async fn test_permanent_failure_then_rerun_converges() {
    let h = Harness::new().await;
    let cfg = config(true, Some("sk"));
    h.provider.fail_always(
        Operation::Create,
        ResourceKind::IamPolicy,
        ProviderError::AccessDenied("not authorized to perform iam:CreatePolicy".into()),
    );

    let err = h.apply(&cfg).await.unwrap_err();

    let DeployError::ApplyFailed {
        resource,
        source,
        applied,
    } = &err
    else {
        panic!("expected ApplyFailed, got {err}");
    };
    assert_eq!(resource.kind, ResourceKind::IamPolicy);
    assert!(matches!(source, ProviderError::AccessDenied(_)));
    assert!(source.suggestion().is_some());
    assert!(!applied.is_empty());
    assert!(applied.iter().all(|r| r.kind != ResourceKind::IamPolicy));
    assert_eq!(err.applied().map(<[_]>::len), Some(applied.len()));
    // Nothing downstream of a policy was attempted
    assert_eq!(h.provider.count(ResourceKind::AppRunnerService), 0);
    let policy_creates = h
        .provider
        .calls()
        .iter()
        .filter(|c| c.op == Operation::Create && c.kind == ResourceKind::IamPolicy)
        .count();
    assert!(policy_creates <= 2, "permanent errors are not retried");

    h.provider.clear_faults();
    h.apply(&cfg).await.unwrap();
    assert_eq!(h.provider.count(ResourceKind::IamPolicy), 2);
    assert_eq!(h.provider.count(ResourceKind::AppRunnerService), 1);

    h.provider.clear_calls();
    h.apply(&cfg).await.unwrap();
    assert!(h.provider.mutating_calls().is_empty());

    let runs = list_runs(&h.pool, cfg.stack_name(), 10).await.unwrap();
    assert_eq!(runs.iter().filter(|r| r.status == RunStatus::Failed).count(), 1);
    assert_eq!(runs.iter().filter(|r| r.status == RunStatus::Succeeded).count(), 2);
}

#[tokio::test]
async fn test_failed_delete_keeps_tracking() {
    let h = Harness::new().await;
    let cfg = config(true, None);
    h.apply(&cfg).await.unwrap();
    h.provider.fail_always(
        Operation::Delete,
        ResourceKind::AppRunnerService,
        ProviderError::AccessDenied("denied".into()),
    );

    let err = h.apply(&config(false, None)).await.unwrap_err();
    assert!(matches!(err, DeployError::ApplyFailed { .. }));
    assert_eq!(h.provider.count(ResourceKind::AppRunnerService), 1);

    h.provider.clear_faults();
    h.apply(&config(false, None)).await.unwrap();
    assert_eq!(h.provider.count(ResourceKind::AppRunnerService), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new().await;
    let cfg = config(true, Some("sk"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.apply_cancelled(&cfg, cancel).await.unwrap_err();

    let DeployError::Cancelled { applied } = &err else {
        panic!("expected Cancelled, got {err}");
    };
    assert!(applied.is_empty());
    assert!(h.provider.calls().is_empty());

    let runs = list_runs(&h.pool, cfg.stack_name(), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_second_apply_lock_rejected() {
    let dir = temp_state_dir();
    let _held = ApplyLock::try_acquire(dir.path()).await.unwrap();

    let err = ApplyLock::try_acquire(dir.path()).await.unwrap_err();

    match err.downcast_ref::<DeployError>() {
        Some(DeployError::ApplyLockHeld { path }) => assert!(path.starts_with(dir.path())),
        other => panic!("expected ApplyLockHeld, got {other:?}"),
    }
}

#[tokio::test]
async fn test_lost_create_response_adopts_instance() {
    let h = Harness::new().await;
    let cfg = config(false, None);
    h.provider.fail_after_effect(
        Operation::Create,
        ResourceKind::EcrRepository,
        ProviderError::Transport("operation timed out".into()),
        1,
    );

    let report = h.apply(&cfg).await.unwrap();

    let repository = ResourceRef::new(ResourceKind::EcrRepository, "app");
    assert!(report.instances[&repository].is_present());
    assert_eq!(h.provider.count(ResourceKind::EcrRepository), 1);
    let record = get_resource(&h.pool, cfg.stack_name(), &repository)
        .await
        .unwrap()
        .expect("repository tracked");
    assert_eq!(
        record.provider_id,
        h.provider.get(ResourceKind::EcrRepository, "mommy-rag").unwrap().id
    );

    h.provider.clear_calls();
    h.apply(&cfg).await.unwrap();
    assert!(h.provider.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_failed_create_not_adopted_without_ambiguity() {
    let h = Harness::new().await;
    h.provider.fail_always(
        Operation::Create,
        ResourceKind::EcrRepository,
        ProviderError::AccessDenied("denied".into()),
    );

    let err = h.apply(&config(false, None)).await.unwrap_err();

    assert!(matches!(err, DeployError::ApplyFailed { .. }));
    assert_eq!(h.provider.count(ResourceKind::EcrRepository), 0);
}

#[tokio::test]
async fn test_create_in_flight_at_cancellation_is_recorded() {
    let pool = open_memory_db().await.unwrap();
    let cancel = CancellationToken::new();
    let provider = Arc::new(CancelDuringCreate {
        inner: MemoryProvider::new(),
        cancel: cancel.clone(),
    });
    let cfg = config(false, None);
    let model = catalog::build_stack(&cfg);
    let flags = catalog::flags(&cfg);

    let err = Reconciler::new(provider.clone(), pool.clone(), cfg.stack_name())
        .with_target("123456789012", "us-east-1")
        .with_retry(RetryPolicy::fast(5))
        .with_cancellation(cancel)
        .apply(&model, &flags)
        .await
        .unwrap_err();

    let repository = ResourceRef::new(ResourceKind::EcrRepository, "app");
    let DeployError::Cancelled { applied } = &err else {
        panic!("expected Cancelled, got {err}");
    };
    assert!(applied.contains(&repository), "{applied:?}");
    assert!(
        get_resource(&pool, cfg.stack_name(), &repository)
            .await
            .unwrap()
            .is_some()
    );
    let runs = list_runs(&pool, cfg.stack_name(), 10).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Cancelled);

    // A fresh run picks up where the cancelled one stopped
    let report = Reconciler::new(provider.clone(), pool.clone(), cfg.stack_name())
        .with_target("123456789012", "us-east-1")
        .with_retry(RetryPolicy::fast(5))
        .apply(&model, &flags)
        .await
        .unwrap();
    assert!(
        report
            .steps
            .iter()
            .all(|s| s.resource != repository || !s.action.is_mutating())
    );
    assert_eq!(provider.inner.count(ResourceKind::EcrRepository), 1);
}
