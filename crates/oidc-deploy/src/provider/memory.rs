//! In-process provider
//!
//! Keeps resources in a map, assigns AWS-shaped ARNs and URLs, logs every
//! call and can inject faults. Scenario tests drive the reconciler against
//! it, and `plan --offline` uses an empty one to show a from-scratch plan.
//!
//! Secrets follow Secrets Manager: deleting one with a recovery window
//! schedules it for deletion. A scheduled secret reads as absent, keeps its
//! values, and creating it again restores it.

use super::{CloudProvider, ProviderError, RemoteResource, SecretVersionInfo, attr_str};
use crate::model::{Attributes, Sensitive, fingerprint};
use crate::reconcile::AttributeChange;
use oidc_deploy_common::ResourceKind;
use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

const ACCOUNT_ID: &str = "123456789012";
const REGION: &str = "us-east-1";

/// Provider operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    ReadSecretValue,
    PutSecretValue,
}

impl Operation {
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Delete | Operation::PutSecretValue
        )
    }
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Operation,
    pub kind: ResourceKind,
    /// Identity the call was made for
    pub id: String,
}

#[derive(Debug)]
struct Fault {
    op: Operation,
    kind: ResourceKind,
    error: ProviderError,
    /// `None` fails forever
    remaining: Option<u32>,
    /// The call takes effect before failing, like a response lost in transit
    after_effect: bool,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<(ResourceKind, String), RemoteResource>,
    /// Secrets scheduled for deletion, by name
    pending_deletion: BTreeMap<String, RemoteResource>,
    /// Secret ARN -> (version id, value), oldest first
    secret_values: BTreeMap<String, Vec<(String, String)>>,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    serial: u64,
}

impl Inner {
    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    /// Record a call and return the injected fault for it, if any
    fn record(&mut self, op: Operation, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        self.calls.push(Call {
            op,
            kind,
            id: id.to_string(),
        });
        self.take_fault(op, kind, false)
    }

    /// Fault for a call that already took effect
    fn lost_response(&mut self, op: Operation, kind: ResourceKind) -> Result<(), ProviderError> {
        self.take_fault(op, kind, true)
    }

    fn take_fault(
        &mut self,
        op: Operation,
        kind: ResourceKind,
        after_effect: bool,
    ) -> Result<(), ProviderError> {
        let Some(pos) = self
            .faults
            .iter()
            .position(|f| f.op == op && f.kind == kind && f.after_effect == after_effect)
        else {
            return Ok(());
        };
        let fault = &mut self.faults[pos];
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(pos);
            }
        }
        Err(error)
    }

    fn secret_arn(&self, secret_id: &str) -> Option<String> {
        self.resources
            .iter()
            .filter(|((kind, _), _)| *kind == ResourceKind::Secret)
            .find(|((_, name), remote)| name == secret_id || remote.id == secret_id)
            .map(|(_, remote)| remote.id.clone())
    }
}

/// In-memory [`CloudProvider`]
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the log from the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `times` calls of `op` on `kind` with `error`
    pub fn fail(&self, op: Operation, kind: ResourceKind, error: ProviderError, times: u32) {
        if times == 0 {
            return;
        }
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: Some(times),
            after_effect: false,
        });
    }

    /// Let the next `times` calls of `op` on `kind` take effect, then
    /// fail them with `error`
    pub fn fail_after_effect(
        &self,
        op: Operation,
        kind: ResourceKind,
        error: ProviderError,
        times: u32,
    ) {
        if times == 0 {
            return;
        }
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: Some(times),
            after_effect: true,
        });
    }

    /// Fail every call of `op` on `kind` until [`MemoryProvider::clear_faults`]
    pub fn fail_always(&self, op: Operation, kind: ResourceKind, error: ProviderError) {
        self.lock().faults.push(Fault {
            op,
            kind,
            error,
            remaining: None,
            after_effect: false,
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of live resources of `kind`
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.lock()
            .resources
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Live resource by kind and identity
    pub fn get(&self, kind: ResourceKind, identity: &str) -> Option<RemoteResource> {
        self.lock()
            .resources
            .get(&(kind, identity.to_string()))
            .cloned()
    }

    /// Whether the secret called `name` is scheduled for deletion
    pub fn is_pending_deletion(&self, name: &str) -> bool {
        self.lock().pending_deletion.contains_key(name)
    }

    /// Current value of a secret (by name or ARN)
    pub fn secret_value(&self, secret_id: &str) -> Option<String> {
        let inner = self.lock();
        let arn = inner.secret_arn(secret_id)?;
        inner
            .secret_values
            .get(&arn)
            .and_then(|versions| versions.last())
            .map(|(_, value)| value.clone())
    }

    /// Number of values ever written to a secret (by name or ARN)
    pub fn secret_version_count(&self, secret_id: &str) -> usize {
        let inner = self.lock();
        inner
            .secret_arn(secret_id)
            .and_then(|arn| inner.secret_values.get(&arn).map(Vec::len))
            .unwrap_or(0)
    }

    /// Write a secret value out of band, without logging a call
    pub fn rotate_secret(&self, secret_id: &str, value: &str) {
        let mut inner = self.lock();
        let Some(arn) = inner.secret_arn(secret_id) else {
            return;
        };
        let version = format!("v-{}", inner.next_serial());
        inner
            .secret_values
            .entry(arn)
            .or_default()
            .push((version, value.to_string()));
    }

    /// Change an observed attribute out of band to simulate drift
    pub fn set_observed(&self, kind: ResourceKind, identity: &str, key: &str, value: Json) {
        if let Some(remote) = self.lock().resources.get_mut(&(kind, identity.to_string())) {
            remote.observed.insert(key.to_string(), value);
        }
    }

    fn computed(
        &self,
        inner: &mut Inner,
        kind: ResourceKind,
        identity: &str,
        declared: &Attributes,
    ) -> Attributes {
        let serial = inner.next_serial();
        let mut computed = Attributes::new();
        match kind {
            ResourceKind::OidcProvider => {
                let host = identity.trim_start_matches("https://");
                computed.insert(
                    "arn".into(),
                    json!(format!("arn:aws:iam::{ACCOUNT_ID}:oidc-provider/{host}")),
                );
                computed.insert("url".into(), json!(identity));
            }
            ResourceKind::IamRole => {
                computed.insert(
                    "arn".into(),
                    json!(format!("arn:aws:iam::{ACCOUNT_ID}:role/{identity}")),
                );
                computed.insert("name".into(), json!(identity));
                computed.insert("unique_id".into(), json!(format!("AROA{serial:016}")));
            }
            ResourceKind::IamPolicy => {
                computed.insert(
                    "arn".into(),
                    json!(format!("arn:aws:iam::{ACCOUNT_ID}:policy/{identity}")),
                );
                computed.insert("name".into(), json!(identity));
            }
            ResourceKind::PolicyAttachment => {
                computed.insert("id".into(), json!(identity));
                for key in ["role", "policy_arn"] {
                    if let Some(v) = declared.get(key) {
                        computed.insert(key.into(), v.clone());
                    }
                }
            }
            ResourceKind::EcrRepository => {
                computed.insert(
                    "arn".into(),
                    json!(format!("arn:aws:ecr:{REGION}:{ACCOUNT_ID}:repository/{identity}")),
                );
                computed.insert("name".into(), json!(identity));
                computed.insert(
                    "repository_url".into(),
                    json!(format!("{ACCOUNT_ID}.dkr.ecr.{REGION}.amazonaws.com/{identity}")),
                );
            }
            ResourceKind::Secret => {
                computed.insert(
                    "arn".into(),
                    json!(format!(
                        "arn:aws:secretsmanager:{REGION}:{ACCOUNT_ID}:secret:{identity}-{serial:06x}"
                    )),
                );
                computed.insert("name".into(), json!(identity));
            }
            ResourceKind::AppRunnerService => {
                let service_id = format!("{serial:032x}");
                computed.insert(
                    "arn".into(),
                    json!(format!(
                        "arn:aws:apprunner:{REGION}:{ACCOUNT_ID}:service/{identity}/{service_id}"
                    )),
                );
                computed.insert("name".into(), json!(identity));
                computed.insert(
                    "service_url".into(),
                    json!(format!("{}.{REGION}.awsapprunner.com", &service_id[22..])),
                );
                computed.insert("service_id".into(), json!(service_id));
                computed.insert("status".into(), json!("RUNNING"));
            }
            ResourceKind::SecretVersion => {}
        }
        computed
    }
}

/// Identity of a resource within its kind
fn identity(kind: ResourceKind, declared: &Attributes) -> Result<String, ProviderError> {
    Ok(match kind {
        ResourceKind::OidcProvider => attr_str(declared, "url")?.to_string(),
        ResourceKind::PolicyAttachment => format!(
            "{}|{}",
            attr_str(declared, "role")?,
            attr_str(declared, "policy_arn")?
        ),
        ResourceKind::SecretVersion => attr_str(declared, "secret_id")?.to_string(),
        _ => attr_str(declared, "name")?.to_string(),
    })
}

/// Settings AWS accepts on write but never reports back
fn is_write_only(kind: ResourceKind, key: &str) -> bool {
    matches!(
        (kind, key),
        (ResourceKind::Secret, "recovery_window_days")
            | (ResourceKind::EcrRepository, "force_delete")
    )
}

fn observed(kind: ResourceKind, declared: &Attributes) -> Attributes {
    declared
        .iter()
        .filter(|(key, _)| !is_write_only(kind, key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl CloudProvider for MemoryProvider {
    async fn read(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let id = identity(kind, declared)?;
        let mut inner = self.lock();
        inner.record(Operation::Read, kind, &id)?;

        if kind == ResourceKind::SecretVersion {
            let current = inner
                .secret_arn(&id)
                .and_then(|arn| inner.secret_values.get(&arn))
                .and_then(|versions| versions.last().cloned());
            return Ok(current.map(|(version_id, value)| RemoteResource {
                id: version_id,
                observed: Attributes::from([("value".to_string(), json!(fingerprint(&value)))]),
                computed: Attributes::new(),
            }));
        }

        Ok(inner.resources.get(&(kind, id)).cloned())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let id = identity(kind, declared)?;
        let mut inner = self.lock();
        inner.record(Operation::Create, kind, &id)?;

        if kind == ResourceKind::SecretVersion {
            return Err(ProviderError::Unsupported(
                "secret values are written with put_secret_value".into(),
            ));
        }
        if inner.resources.contains_key(&(kind, id.clone())) {
            return Err(ProviderError::AlreadyExists(id));
        }
        if kind == ResourceKind::Secret {
            if let Some(mut restored) = inner.pending_deletion.remove(&id) {
                restored.observed = observed(kind, declared);
                inner.resources.insert((kind, id), restored.clone());
                inner.lost_response(Operation::Create, kind)?;
                return Ok(restored);
            }
        }

        let computed = self.computed(&mut inner, kind, &id, declared);
        let remote = RemoteResource {
            id: computed
                .get("arn")
                .and_then(Json::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| id.clone()),
            observed: observed(kind, declared),
            computed,
        };
        inner.resources.insert((kind, id), remote.clone());
        inner.lost_response(Operation::Create, kind)?;
        Ok(remote)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        _remote: &RemoteResource,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<RemoteResource, ProviderError> {
        let id = identity(kind, declared)?;
        let mut inner = self.lock();
        inner.record(Operation::Update, kind, &id)?;

        let resource = inner
            .resources
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| ProviderError::not_found(kind.as_str(), id.clone()))?;
        for change in changes {
            resource.observed.insert(change.key.clone(), change.after.clone());
        }
        let updated = resource.clone();
        inner.lost_response(Operation::Update, kind)?;
        Ok(updated)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        _remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<(), ProviderError> {
        let id = identity(kind, declared)?;
        let mut inner = self.lock();
        inner.record(Operation::Delete, kind, &id)?;

        if let Some(removed) = inner.resources.remove(&(kind, id.clone())) {
            if kind == ResourceKind::Secret {
                // Without a window the secret is purged at once
                let window = declared
                    .get("recovery_window_days")
                    .and_then(Json::as_u64)
                    .unwrap_or(0);
                if window == 0 {
                    inner.secret_values.remove(&removed.id);
                } else {
                    inner.pending_deletion.insert(id, removed);
                }
            }
        }
        inner.lost_response(Operation::Delete, kind)?;
        Ok(())
    }

    async fn current_secret_version(
        &self,
        secret_id: &str,
    ) -> Result<Option<SecretVersionInfo>, ProviderError> {
        let mut inner = self.lock();
        inner.record(Operation::ReadSecretValue, ResourceKind::SecretVersion, secret_id)?;

        let arn = inner
            .secret_arn(secret_id)
            .ok_or_else(|| ProviderError::not_found("secret", secret_id))?;
        Ok(inner
            .secret_values
            .get(&arn)
            .and_then(|versions| versions.last())
            .map(|(version_id, value)| SecretVersionInfo {
                version_id: version_id.clone(),
                fingerprint: fingerprint(value),
            }))
    }

    async fn put_secret_value(
        &self,
        secret_id: &str,
        value: &Sensitive,
    ) -> Result<String, ProviderError> {
        let mut inner = self.lock();
        inner.record(Operation::PutSecretValue, ResourceKind::SecretVersion, secret_id)?;

        let arn = inner
            .secret_arn(secret_id)
            .ok_or_else(|| ProviderError::not_found("secret", secret_id))?;
        let version = format!("v-{}", inner.next_serial());
        inner
            .secret_values
            .entry(arn)
            .or_default()
            .push((version.clone(), value.expose().to_string()));
        inner.lost_response(Operation::PutSecretValue, ResourceKind::SecretVersion)?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> Attributes {
        Attributes::from([
            ("name".to_string(), json!(name)),
            ("description".to_string(), json!("d")),
        ])
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let provider = MemoryProvider::new();
        assert!(provider.read(ResourceKind::IamRole, &role("r")).await.unwrap().is_none());

        let created = provider.create(ResourceKind::IamRole, &role("r")).await.unwrap();
        assert_eq!(created.id, "arn:aws:iam::123456789012:role/r");
        assert_eq!(created.computed["name"], json!("r"));

        let read = provider.read(ResourceKind::IamRole, &role("r")).await.unwrap();
        assert_eq!(read, Some(created.clone()));

        provider.delete(ResourceKind::IamRole, &created, &role("r")).await.unwrap();
        assert_eq!(provider.count(ResourceKind::IamRole), 0);
        // Deleting again is fine
        provider.delete(ResourceKind::IamRole, &created, &role("r")).await.unwrap();

        let ops: Vec<Operation> = provider.calls().iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                Operation::Read,
                Operation::Create,
                Operation::Read,
                Operation::Delete,
                Operation::Delete
            ]
        );
        assert_eq!(provider.mutating_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let provider = MemoryProvider::new();
        provider.create(ResourceKind::IamRole, &role("r")).await.unwrap();
        let err = provider.create(ResourceKind::IamRole, &role("r")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_faults_expire() {
        let provider = MemoryProvider::new();
        provider.fail(Operation::Create, ResourceKind::IamRole, ProviderError::Throttled, 2);

        assert!(provider.create(ResourceKind::IamRole, &role("r")).await.is_err());
        assert!(provider.create(ResourceKind::IamRole, &role("r")).await.is_err());
        assert!(provider.create(ResourceKind::IamRole, &role("r")).await.is_ok());
    }

    #[tokio::test]
    async fn test_secret_values() {
        let provider = MemoryProvider::new();
        let secret = provider
            .create(
                ResourceKind::Secret,
                &Attributes::from([
                    ("name".to_string(), json!("app/key")),
                    ("recovery_window_days".to_string(), json!(7)),
                ]),
            )
            .await
            .unwrap();
        assert!(!secret.observed.contains_key("recovery_window_days"));
        assert!(provider.current_secret_version(&secret.id).await.unwrap().is_none());

        provider.put_secret_value(&secret.id, &Sensitive::new("one")).await.unwrap();
        let current = provider.current_secret_version(&secret.id).await.unwrap().unwrap();
        assert_eq!(current.fingerprint, Sensitive::new("one").fingerprint());

        provider.rotate_secret("app/key", "rotated");
        assert_eq!(provider.secret_value(&secret.id).as_deref(), Some("rotated"));
        assert_eq!(provider.secret_version_count("app/key"), 2);
    }

    fn secret_attrs(window: Option<u32>) -> Attributes {
        let mut attrs = Attributes::from([
            ("name".to_string(), json!("app/key")),
            ("description".to_string(), json!("key")),
        ]);
        if let Some(days) = window {
            attrs.insert("recovery_window_days".to_string(), json!(days));
        }
        attrs
    }

    #[tokio::test]
    async fn test_secret_with_window_is_scheduled_then_restored() {
        let provider = MemoryProvider::new();
        let attrs = secret_attrs(Some(7));
        let secret = provider.create(ResourceKind::Secret, &attrs).await.unwrap();
        provider
            .put_secret_value(&secret.id, &Sensitive::new("one"))
            .await
            .unwrap();

        provider.delete(ResourceKind::Secret, &secret, &attrs).await.unwrap();
        assert!(provider.is_pending_deletion("app/key"));
        assert_eq!(provider.count(ResourceKind::Secret), 0);
        assert!(provider.read(ResourceKind::Secret, &attrs).await.unwrap().is_none());

        let restored = provider.create(ResourceKind::Secret, &attrs).await.unwrap();
        assert_eq!(restored.id, secret.id);
        assert!(!provider.is_pending_deletion("app/key"));
        assert_eq!(provider.secret_value("app/key").as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_secret_without_window_is_purged() {
        let provider = MemoryProvider::new();
        for window in [Some(0), None] {
            let attrs = secret_attrs(window);
            let secret = provider.create(ResourceKind::Secret, &attrs).await.unwrap();
            provider
                .put_secret_value(&secret.id, &Sensitive::new("one"))
                .await
                .unwrap();

            provider.delete(ResourceKind::Secret, &secret, &attrs).await.unwrap();
            assert!(!provider.is_pending_deletion("app/key"), "window {window:?}");

            let recreated = provider.create(ResourceKind::Secret, &attrs).await.unwrap();
            assert_ne!(recreated.id, secret.id);
            assert_eq!(provider.secret_value("app/key"), None);
            provider.delete(ResourceKind::Secret, &recreated, &attrs).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fault_after_effect() {
        let provider = MemoryProvider::new();
        provider.fail_after_effect(
            Operation::Create,
            ResourceKind::IamRole,
            ProviderError::Transport("operation timed out".into()),
            1,
        );

        let err = provider.create(ResourceKind::IamRole, &role("r")).await.unwrap_err();
        assert!(err.is_ambiguous());
        assert_eq!(provider.count(ResourceKind::IamRole), 1);
        let err = provider.create(ResourceKind::IamRole, &role("r")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_applies_changes() {
        let provider = MemoryProvider::new();
        let created = provider.create(ResourceKind::IamRole, &role("r")).await.unwrap();
        let updated = provider
            .update(
                ResourceKind::IamRole,
                &created,
                &role("r"),
                &[AttributeChange {
                    key: "description".into(),
                    before: Some(json!("d")),
                    after: json!("new"),
                }],
            )
            .await
            .unwrap();
        assert_eq!(updated.observed["description"], json!("new"));
        assert_eq!(updated.computed, created.computed);
    }
}
