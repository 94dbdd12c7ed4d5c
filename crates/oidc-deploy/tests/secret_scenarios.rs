//! API key injection across runs

mod common;

use common::{Harness, config, config_with_window};
use oidc_deploy::model::ResourceRef;
use oidc_deploy::provider::ProviderError;
use oidc_deploy::provider::memory::Operation;
use oidc_deploy::reconcile::{Action, Report};
use oidc_deploy_common::ResourceKind;

const SECRET: &str = "mommy-rag/openai-api-key";

fn secret_value_action(report: &Report) -> Option<&Action> {
    let id = ResourceRef::new(ResourceKind::SecretVersion, "api_key");
    report.steps.iter().find(|s| s.resource == id).map(|s| &s.action)
}

fn puts(h: &Harness) -> usize {
    h.provider
        .calls()
        .iter()
        .filter(|c| c.op == Operation::PutSecretValue)
        .count()
}

#[tokio::test]
async fn test_empty_key_never_written() {
    let h = Harness::new().await;

    h.apply(&config(true, Some(""))).await.unwrap();
    h.apply(&config(true, None)).await.unwrap();

    assert_eq!(puts(&h), 0);
    assert_eq!(h.provider.count(ResourceKind::Secret), 1);
    assert_eq!(h.provider.secret_value(SECRET), None);
}

#[tokio::test]
async fn test_same_key_written_once() {
    let h = Harness::new().await;
    let cfg = config(false, Some("sk-one"));

    let first = h.apply(&cfg).await.unwrap();
    let second = h.apply(&cfg).await.unwrap();

    assert_eq!(secret_value_action(&first), Some(&Action::Create));
    assert_eq!(secret_value_action(&second), Some(&Action::NoOp));
    assert_eq!(puts(&h), 1);
    assert_eq!(h.provider.secret_version_count(SECRET), 1);
}

#[tokio::test]
async fn test_changed_key_written_as_update() {
    let h = Harness::new().await;
    h.apply(&config(false, Some("sk-one"))).await.unwrap();

    let plan = h.plan(&config(false, Some("sk-two"))).await.unwrap();
    assert!(matches!(secret_value_action(&plan), Some(Action::Update(_))));
    assert_eq!(puts(&h), 1, "plan must not write");

    let report = h.apply(&config(false, Some("sk-two"))).await.unwrap();
    let Some(Action::Update(changes)) = secret_value_action(&report) else {
        panic!("expected an update:\n{report}");
    };
    assert_eq!(changes[0].key, "value");
    assert!(!report.to_string().contains("sk-two"), "value leaked into the report");
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-two"));
    assert_eq!(h.provider.secret_version_count(SECRET), 2);
}

#[tokio::test]
async fn test_out_of_band_rotation_preserved() {
    let h = Harness::new().await;
    h.apply(&config(false, Some("sk-one"))).await.unwrap();
    h.provider.rotate_secret(SECRET, "sk-rotated-by-ops");

    h.provider.clear_calls();
    h.apply(&config(false, Some("sk-one"))).await.unwrap();
    assert_eq!(puts(&h), 0);
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-rotated-by-ops"));

    // Omitting the key keeps whatever is there
    h.apply(&config(false, None)).await.unwrap();
    assert_eq!(puts(&h), 0);
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-rotated-by-ops"));

    h.apply(&config(false, Some("sk-two"))).await.unwrap();
    assert_eq!(puts(&h), 1);
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-two"));
}

#[tokio::test]
async fn test_existing_value_adopted_without_state() {
    let h = Harness::new().await;
    h.apply(&config(false, None)).await.unwrap();
    h.provider.rotate_secret(SECRET, "sk-one");

    // No write recorded for this stack; the remote value already matches
    let report = h.apply(&config(false, Some("sk-one"))).await.unwrap();

    assert_eq!(secret_value_action(&report), Some(&Action::NoOp));
    assert_eq!(puts(&h), 0);
    assert_eq!(h.provider.secret_version_count(SECRET), 1);
}

#[tokio::test]
async fn test_dropping_key_retains_value() {
    let h = Harness::new().await;
    h.apply(&config(false, Some("sk-one"))).await.unwrap();

    let report = h.apply(&config(false, None)).await.unwrap();

    assert_eq!(secret_value_action(&report), Some(&Action::Retain));
    assert!(!report.has_changes());
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-one"));
    assert!(h.provider.mutating_calls().iter().all(|c| c.op != Operation::Delete));
}

#[tokio::test]
async fn test_value_written_again_after_purge() {
    let h = Harness::new().await;
    let cfg = config_with_window(false, Some("sk-one"), 0);
    h.apply(&cfg).await.unwrap();
    h.destroy(&cfg).await.unwrap();
    assert_eq!(h.provider.count(ResourceKind::Secret), 0);
    assert!(!h.provider.is_pending_deletion(SECRET));

    let report = h.apply(&cfg).await.unwrap();

    assert_eq!(secret_value_action(&report), Some(&Action::Create));
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-one"));
    assert_eq!(puts(&h), 2);
}

#[tokio::test]
async fn test_destroy_with_window_then_restore() {
    let h = Harness::new().await;
    let cfg = config_with_window(false, Some("sk-one"), 7);
    h.apply(&cfg).await.unwrap();
    let arn = h.provider.get(ResourceKind::Secret, SECRET).unwrap().id;

    h.destroy(&cfg).await.unwrap();
    assert!(h.provider.is_pending_deletion(SECRET));
    assert_eq!(h.provider.count(ResourceKind::Secret), 0);

    // A scheduled secret reads as absent, so the plan creates it
    let plan = h.plan(&cfg).await.unwrap();
    let secret = ResourceRef::new(ResourceKind::Secret, "api_key");
    assert!(
        plan.steps
            .iter()
            .any(|s| s.resource == secret && s.action == Action::Create)
    );

    let report = h.apply(&cfg).await.unwrap();

    assert_eq!(h.provider.get(ResourceKind::Secret, SECRET).unwrap().id, arn);
    assert!(!h.provider.is_pending_deletion(SECRET));
    assert_eq!(secret_value_action(&report), Some(&Action::NoOp));
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-one"));
    assert_eq!(puts(&h), 1);
}

#[tokio::test]
async fn test_destroy_without_window_purges() {
    let h = Harness::new().await;
    let cfg = config_with_window(false, Some("sk-one"), 0);
    h.apply(&cfg).await.unwrap();
    let arn = h.provider.get(ResourceKind::Secret, SECRET).unwrap().id;

    h.destroy(&cfg).await.unwrap();
    assert!(!h.provider.is_pending_deletion(SECRET));

    h.apply(&config_with_window(false, None, 0)).await.unwrap();
    assert_ne!(h.provider.get(ResourceKind::Secret, SECRET).unwrap().id, arn);
    assert_eq!(h.provider.secret_value(SECRET), None);
}

#[tokio::test]
async fn test_lost_write_response_not_repeated() {
    let h = Harness::new().await;
    h.provider.fail_after_effect(
        Operation::PutSecretValue,
        ResourceKind::SecretVersion,
        ProviderError::Transport("operation timed out".into()),
        1,
    );

    let report = h.apply(&config(false, Some("sk-one"))).await.unwrap();

    assert_eq!(secret_value_action(&report), Some(&Action::Create));
    assert_eq!(puts(&h), 1);
    assert_eq!(h.provider.secret_version_count(SECRET), 1);
    assert_eq!(h.provider.secret_value(SECRET).as_deref(), Some("sk-one"));

    h.provider.clear_calls();
    h.apply(&config(false, Some("sk-one"))).await.unwrap();
    assert!(h.provider.mutating_calls().is_empty());
}
