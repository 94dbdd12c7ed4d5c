//! Cloud provider seam
//!
//! The reconciler only talks to the cloud through [`CloudProvider`]. The AWS
//! implementation lives in [`aws`]; [`memory`] keeps everything in process
//! for tests and offline plans.

pub mod aws;
mod error;
pub mod memory;

use crate::model::{Attributes, Sensitive};
use crate::reconcile::AttributeChange;
use oidc_deploy_common::ResourceKind;
use std::future::Future;

pub use error::{ProviderError, classify_aws_error, from_sdk_error};
pub use memory::MemoryProvider;

/// A live resource as seen by the provider
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteResource {
    /// Provider-side identity (ARN, name or composite id)
    pub id: String,
    /// Declared attributes as the provider reports them
    ///
    /// Only keys present here are diffed; write-only settings are omitted.
    pub observed: Attributes,
    /// Provider-assigned attributes (ARNs, URLs) exposed to dependents
    pub computed: Attributes,
}

/// The current value of a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersionInfo {
    pub version_id: String,
    /// `sha256:<hex>` of the stored value
    pub fingerprint: String,
}

/// Create/read/update/delete for the resource kinds of the catalog
///
/// `declared` is the resource's resolved attribute bag: references are
/// already replaced by upstream computed values and sensitive values by
/// their fingerprint. Raw secret values only reach the provider through
/// [`CloudProvider::put_secret_value`].
pub trait CloudProvider: Send + Sync + 'static {
    /// Look up the live instance matching the identity attributes in `declared`
    fn read(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> impl Future<Output = Result<Option<RemoteResource>, ProviderError>> + Send;

    fn create(
        &self,
        kind: ResourceKind,
        declared: &Attributes,
    ) -> impl Future<Output = Result<RemoteResource, ProviderError>> + Send;

    /// Apply `changes` (never identity attributes) to an existing resource
    fn update(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> impl Future<Output = Result<RemoteResource, ProviderError>> + Send;

    /// Delete a resource; an already deleted resource is not an error
    fn delete(
        &self,
        kind: ResourceKind,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Fingerprint of the secret's current value, if it has one
    fn current_secret_version(
        &self,
        secret_id: &str,
    ) -> impl Future<Output = Result<Option<SecretVersionInfo>, ProviderError>> + Send;

    /// Store a new current value, returning its version id
    fn put_secret_value(
        &self,
        secret_id: &str,
        value: &Sensitive,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

/// String attribute from a resolved bag
pub(crate) fn attr_str<'a>(attrs: &'a Attributes, key: &str) -> Result<&'a str, ProviderError> {
    attrs
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::InvalidDocument(format!("missing string attribute '{key}'")))
}

/// Optional string attribute from a resolved bag
pub(crate) fn attr_opt_str<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(|v| v.as_str())
}

/// List of strings from a resolved bag; missing means empty
pub(crate) fn attr_str_list(attrs: &Attributes, key: &str) -> Vec<String> {
    attrs
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
