//! Reconciler
//!
//! Makes remote state match the stack model. A run has two phases:
//!
//! 1. Deletes, one at a time: resources recorded in the state store that
//!    left the model (by destroy priority), then model resources whose
//!    condition is false (reverse dependency order).
//! 2. Creates and updates in dependency order, independent branches in
//!    parallel up to the configured limit.
//!
//! Plan mode runs the same walk with reads only. Every finished step of an
//! apply is written to the state store as soon as it completes, so a failed
//! or cancelled run can simply be re-run.

mod diff;
mod retry;
mod scheduler;

pub use diff::{AttributeChange, diff, requires_replacement};
pub use retry::{RetryPolicy, with_retry};

use crate::conditions::{self, ExistenceSet, Flags};
use crate::error::DeployError;
use crate::graph::DependencyGraph;
use crate::model::{
    Attributes, Lookup, Resolved, Resource, ResourceRef, StackModel, resolve_attributes,
};
use crate::provider::{CloudProvider, ProviderError, RemoteResource, attr_str};
use crate::secret::{Injection, SecretInjector};
use crate::state::{
    DbPool, ResourceRecord, RunStatus, finish_run, get_live_resources, insert_run,
    mark_resource_deleted, upsert_resource,
};
use oidc_deploy_common::ResourceKind;
use oidc_deploy_common::defaults::DEFAULT_PARALLELISM;
use serde::Serialize;
use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shown instead of a sensitive value in plans
const REDACTED: &str = "(sensitive)";

/// What a run does (or would do) to one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "changes", rename_all = "snake_case")]
pub enum Action {
    Create,
    Update(Vec<AttributeChange>),
    /// Delete the live instance, then create a new one
    Replace,
    Delete,
    NoOp,
    /// Left in place although no longer declared
    Retain,
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::Create | Action::Update(_) | Action::Replace | Action::Delete
        )
    }

    fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update(_) => "~",
            Action::Replace => "-/+",
            Action::Delete => "-",
            Action::NoOp => " ",
            Action::Retain => "=",
        }
    }
}

/// One resource's action within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub resource: ResourceRef,
    #[serde(flatten)]
    pub action: Action,
}

/// A resource after a run: absent, or present with its computed attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    Absent,
    Present(Attributes),
}

impl Instance {
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Instance::Present(attrs) => Some(attrs),
            Instance::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Instance::Present(_))
    }
}

/// Number of steps per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub retain: usize,
    pub unchanged: usize,
}

/// Result of a plan or an apply
#[derive(Debug, Clone)]
pub struct Report {
    /// Set for applies, `None` for plans
    pub run_id: Option<String>,
    /// Phase one steps first, then phase two in dependency order
    pub steps: Vec<Step>,
    /// Every model resource after the run; resources still to be created
    /// in a plan are absent
    pub instances: BTreeMap<ResourceRef, Instance>,
}

impl Report {
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for step in &self.steps {
            match step.action {
                Action::Create => counts.create += 1,
                Action::Update(_) => counts.update += 1,
                Action::Replace => counts.replace += 1,
                Action::Delete => counts.delete += 1,
                Action::Retain => counts.retain += 1,
                Action::NoOp => counts.unchanged += 1,
            }
        }
        counts
    }

    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_mutating())
    }

    pub fn instance(&self, r: &ResourceRef) -> Option<&Instance> {
        self.instances.get(r)
    }

    pub fn summary(&self) -> String {
        let c = self.counts();
        if self.run_id.is_none() {
            format!(
                "{} to create, {} to update, {} to replace, {} to delete",
                c.create, c.update, c.replace, c.delete
            )
        } else {
            format!(
                "{} created, {} updated, {} replaced, {} deleted, {} unchanged",
                c.create, c.update, c.replace, c.delete, c.unchanged
            )
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() && self.counts().retain == 0 {
            return writeln!(f, "No changes. Remote state matches the stack.");
        }
        for step in &self.steps {
            match &step.action {
                Action::NoOp => {}
                Action::Update(changes) => {
                    writeln!(f, "  {} {}", step.action.symbol(), step.resource)?;
                    for change in changes {
                        let before = change
                            .before
                            .as_ref()
                            .map(Json::to_string)
                            .unwrap_or_else(|| "(none)".to_string());
                        writeln!(f, "      {}: {} -> {}", change.key, before, change.after)?;
                    }
                }
                Action::Retain => {
                    writeln!(f, "  {} {} (retained)", step.action.symbol(), step.resource)?;
                }
                action => writeln!(f, "  {} {}", action.symbol(), step.resource)?,
            }
        }
        match &self.run_id {
            Some(run_id) => writeln!(f, "Run {run_id}: {}", self.summary()),
            None => writeln!(f, "Plan: {}", self.summary()),
        }
    }
}

/// A validated model with its graph and per-resource existence
#[derive(Debug)]
pub struct Desired<'m> {
    pub model: &'m StackModel,
    pub graph: DependencyGraph,
    pub existence: ExistenceSet,
}

impl<'m> Desired<'m> {
    pub fn new(model: &'m StackModel, flags: &Flags) -> Result<Self, DeployError> {
        let graph = DependencyGraph::build(model)?;
        let existence = conditions::evaluate(model, graph.order(), flags)?;
        Ok(Self {
            model,
            graph,
            existence,
        })
    }

    /// Every resource absent
    pub fn teardown(model: &'m StackModel) -> Result<Self, DeployError> {
        let graph = DependencyGraph::build(model)?;
        Ok(Self {
            model,
            graph,
            existence: ExistenceSet::all_absent(model),
        })
    }
}

/// Failure of one step
#[derive(Debug)]
pub(crate) enum StepError {
    Provider(ProviderError),
    Deploy(DeployError),
}

impl StepError {
    fn into_deploy(self, resource: ResourceRef, applied: Vec<ResourceRef>) -> DeployError {
        match self {
            StepError::Provider(source) => DeployError::ApplyFailed {
                resource,
                source,
                applied,
            },
            StepError::Deploy(e) => e,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Provider(e) => e.fmt(f),
            StepError::Deploy(e) => e.fmt(f),
        }
    }
}

impl From<ProviderError> for StepError {
    fn from(e: ProviderError) -> Self {
        StepError::Provider(e)
    }
}

impl From<DeployError> for StepError {
    fn from(e: DeployError) -> Self {
        StepError::Deploy(e)
    }
}

/// Result of one step
#[derive(Debug)]
struct Outcome {
    action: Action,
    /// `None` while the resource only exists in a plan
    computed: Option<Attributes>,
}

impl Outcome {
    fn done(action: Action, computed: Attributes) -> Self {
        Self {
            action,
            computed: Some(computed),
        }
    }

    fn pending(action: Action) -> Self {
        Self {
            action,
            computed: None,
        }
    }
}

/// Everything a step needs, owned so steps can run on their own task
struct StepContext<P> {
    provider: Arc<P>,
    pool: DbPool,
    stack: String,
    retry: RetryPolicy,
    /// `None` in plan mode
    run_id: Option<String>,
    cancel: CancellationToken,
}

impl<P> Clone for StepContext<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            pool: self.pool.clone(),
            stack: self.stack.clone(),
            retry: self.retry,
            run_id: self.run_id.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<P: CloudProvider> StepContext<P> {
    fn is_plan(&self) -> bool {
        self.run_id.is_none()
    }

    async fn read(
        &self,
        id: &ResourceRef,
        declared: &Attributes,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        with_retry(self.retry, id, "read", || {
            self.provider.read(id.kind, declared)
        })
        .await
    }

    /// Create a resource, adopting it when a failed attempt took effect
    ///
    /// After an ambiguous failure a retry can hit the instance the lost
    /// attempt created; a provider that stops waiting on cancellation can
    /// fail a create it already sent. Either way the instance is read back
    /// and, when it exists, treated as created.
    async fn create(
        &self,
        id: &ResourceRef,
        declared: &Attributes,
    ) -> Result<RemoteResource, ProviderError> {
        let ambiguous = AtomicBool::new(false);
        let result = with_retry(self.retry, id, "create", || async {
            let result = self.provider.create(id.kind, declared).await;
            if result.as_ref().is_err_and(ProviderError::is_ambiguous) {
                ambiguous.store(true, Ordering::SeqCst);
            }
            result
        })
        .await;

        let error = match result {
            Ok(created) => return Ok(created),
            Err(e) => e,
        };
        if !ambiguous.load(Ordering::SeqCst) && !self.cancel.is_cancelled() {
            return Err(error);
        }
        match self.read(id, declared).await {
            Ok(Some(created)) => {
                warn!(
                    resource = %id,
                    provider_id = %created.id,
                    error = %error,
                    "Create reported a failure but took effect, adopting"
                );
                Ok(created)
            }
            _ => Err(error),
        }
    }

    async fn update(
        &self,
        id: &ResourceRef,
        remote: &RemoteResource,
        declared: &Attributes,
        changes: &[AttributeChange],
    ) -> Result<RemoteResource, ProviderError> {
        with_retry(self.retry, id, "update", || {
            self.provider.update(id.kind, remote, declared, changes)
        })
        .await
    }

    async fn delete(
        &self,
        id: &ResourceRef,
        remote: &RemoteResource,
        declared: &Attributes,
    ) -> Result<(), ProviderError> {
        let result = with_retry(self.retry, id, "delete", || {
            self.provider.delete(id.kind, remote, declared)
        })
        .await;
        match result {
            Err(e) if e.is_not_found() => {
                debug!(resource = %id, "Already deleted");
                Ok(())
            }
            other => other,
        }
    }

    async fn record(
        &self,
        id: &ResourceRef,
        provider_id: &str,
        declared: &Attributes,
        computed: &Attributes,
    ) -> Result<(), DeployError> {
        let Some(run_id) = &self.run_id else {
            return Ok(());
        };
        upsert_resource(
            &self.pool,
            &self.stack,
            run_id,
            id,
            provider_id,
            declared,
            computed,
        )
        .await
        .map_err(DeployError::state)
    }

    async fn forget(&self, id: &ResourceRef) -> Result<(), DeployError> {
        if self.is_plan() {
            return Ok(());
        }
        mark_resource_deleted(&self.pool, &self.stack, id)
            .await
            .map_err(DeployError::state)
    }
}

/// Drives a [`CloudProvider`] towards a [`StackModel`]
pub struct Reconciler<P> {
    provider: Arc<P>,
    pool: DbPool,
    stack: String,
    account_id: String,
    region: String,
    retry: RetryPolicy,
    parallelism: usize,
    cancel: CancellationToken,
}

impl<P: CloudProvider> Reconciler<P> {
    pub fn new(provider: Arc<P>, pool: DbPool, stack: impl Into<String>) -> Self {
        Self {
            provider,
            pool,
            stack: stack.into(),
            account_id: "-".to_string(),
            region: "-".to_string(),
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            cancel: CancellationToken::new(),
        }
    }

    /// Account and region recorded with each run
    pub fn with_target(mut self, account_id: impl Into<String>, region: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self.region = region.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Compute the actions an apply would take, without mutating anything
    pub async fn plan(&self, model: &StackModel, flags: &Flags) -> Result<Report, DeployError> {
        let desired = Desired::new(model, flags)?;
        self.walk(&desired, None).await
    }

    /// Compute the actions a destroy would take
    pub async fn plan_destroy(&self, model: &StackModel) -> Result<Report, DeployError> {
        let desired = Desired::teardown(model)?;
        self.walk(&desired, None).await
    }

    pub async fn apply(&self, model: &StackModel, flags: &Flags) -> Result<Report, DeployError> {
        let desired = Desired::new(model, flags)?;
        self.execute("apply", &desired).await
    }

    /// Delete every resource of the stack
    ///
    /// Secret versions are not deleted on their own; they go with their
    /// secret, under its recovery window.
    pub async fn destroy(&self, model: &StackModel) -> Result<Report, DeployError> {
        let desired = Desired::teardown(model)?;
        self.execute("destroy", &desired).await
    }

    async fn execute(&self, command: &str, desired: &Desired<'_>) -> Result<Report, DeployError> {
        let run_id = Uuid::new_v4().to_string();
        insert_run(&self.pool, &run_id, &self.stack, command, &self.account_id, &self.region)
            .await
            .map_err(DeployError::state)?;
        info!(run_id = %run_id, command, stack = %self.stack, "Starting run");

        let result = self.walk(desired, Some(run_id.clone())).await;

        let (status, summary) = match &result {
            Ok(report) => (RunStatus::Succeeded, report.summary()),
            Err(e @ DeployError::Cancelled { .. }) => (RunStatus::Cancelled, e.to_string()),
            Err(e) => (RunStatus::Failed, e.to_string()),
        };
        if let Err(e) = finish_run(&self.pool, &run_id, status, &summary).await {
            warn!(run_id = %run_id, error = ?e, "Failed to record run outcome");
        }
        match &result {
            Ok(_) => info!(run_id = %run_id, summary = %summary, "Run complete"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Run stopped"),
        }
        result
    }

    fn context(&self, run_id: Option<String>) -> StepContext<P> {
        StepContext {
            provider: self.provider.clone(),
            pool: self.pool.clone(),
            stack: self.stack.clone(),
            retry: self.retry,
            run_id,
            cancel: self.cancel.clone(),
        }
    }

    async fn walk(
        &self,
        desired: &Desired<'_>,
        run_id: Option<String>,
    ) -> Result<Report, DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled {
                applied: Vec::new(),
            });
        }
        let ctx = self.context(run_id.clone());
        let records: BTreeMap<ResourceRef, ResourceRecord> =
            get_live_resources(&self.pool, &self.stack)
                .await
                .map_err(DeployError::state)?
                .into_iter()
                .map(|rec| (rec.id(), rec))
                .collect();

        let mut steps = Vec::new();
        let mut applied = Vec::new();

        for (id, declared) in deletions(desired, &records) {
            if self.cancel.is_cancelled() {
                return Err(DeployError::Cancelled { applied });
            }
            match remove(&ctx, &id, &declared, records.contains_key(&id)).await {
                Ok(Some(action)) => {
                    if action.is_mutating() {
                        applied.push(id.clone());
                    }
                    steps.push(Step {
                        resource: id,
                        action,
                    });
                }
                Ok(None) => {}
                Err(e) => return Err(e.into_deploy(id, applied)),
            }
        }

        let nodes = desired
            .graph
            .order()
            .iter()
            .filter(|id| desired.existence.is_present(id))
            .map(|id| (id.clone(), desired.graph.dependencies(id)))
            .collect();
        let allow_unknown = ctx.is_plan();

        let walk: scheduler::Walk<Outcome, StepError> = scheduler::run(
            nodes,
            self.parallelism,
            &self.cancel,
            |id, done: &BTreeMap<ResourceRef, Outcome>| {
                let Some(resource) = desired.model.get(id) else {
                    return Err(StepError::Deploy(DeployError::validation(format!(
                        "{id} is not declared"
                    ))));
                };
                let lookup = |r: &ResourceRef| match done.get(r) {
                    Some(Outcome {
                        computed: Some(c),
                        ..
                    }) => Lookup::Known(c),
                    Some(_) => Lookup::Unknown,
                    None => Lookup::Absent,
                };
                let resolved = match resolve_attributes(resource, lookup, allow_unknown) {
                    Ok(resolved) => resolved,
                    Err(source) => {
                        return Err(StepError::Deploy(DeployError::Resolve {
                            resource: id.clone(),
                            source,
                        }));
                    }
                };
                Ok(converge(ctx.clone(), resource.clone(), resolved, records.get(id).cloned()))
            },
        )
        .await;

        let mut outcomes = BTreeMap::new();
        for (id, outcome) in walk.completed {
            if outcome.action.is_mutating() {
                applied.push(id.clone());
            }
            outcomes.insert(id, outcome);
        }
        if let Some((id, e)) = walk.failure {
            return Err(e.into_deploy(id, applied));
        }
        if walk.cancelled {
            return Err(DeployError::Cancelled { applied });
        }

        for id in desired.graph.order() {
            if let Some(outcome) = outcomes.get(id) {
                steps.push(Step {
                    resource: id.clone(),
                    action: outcome.action.clone(),
                });
            }
        }
        let instances = desired
            .model
            .resources
            .iter()
            .map(|resource| {
                let id = resource.id();
                let instance = match outcomes.remove(&id) {
                    Some(Outcome {
                        computed: Some(computed),
                        ..
                    }) => Instance::Present(computed),
                    _ => Instance::Absent,
                };
                (id, instance)
            })
            .collect();

        Ok(Report {
            run_id,
            steps,
            instances,
        })
    }
}

/// Resources to look up for deletion, in deletion order, with the
/// attributes that identify them
fn deletions(
    desired: &Desired<'_>,
    records: &BTreeMap<ResourceRef, ResourceRecord>,
) -> Vec<(ResourceRef, Attributes)> {
    let mut out = Vec::new();

    let mut orphans: Vec<&ResourceRecord> = records
        .values()
        .filter(|rec| desired.model.get(&rec.id()).is_none())
        .collect();
    orphans.sort_by_key(|rec| (rec.kind.destroy_priority(), rec.name.clone()));
    for rec in orphans {
        out.push((rec.id(), rec.attributes.clone()));
    }

    let lookup = |r: &ResourceRef| match records.get(r) {
        Some(rec) => Lookup::Known(&rec.computed),
        None => Lookup::Unknown,
    };
    for id in desired.graph.order().iter().rev() {
        if desired.existence.is_present(id) {
            continue;
        }
        if let Some(rec) = records.get(id) {
            out.push((id.clone(), rec.attributes.clone()));
            continue;
        }
        let Some(resource) = desired.model.get(id) else {
            continue;
        };
        match resolve_attributes(resource, lookup, true) {
            Ok(resolved) if !resolved.has_unknown_identity(resource) => {
                out.push((id.clone(), resolved.attributes));
            }
            Ok(_) => debug!(resource = %id, "Identity not known, nothing to look up"),
            Err(e) => {
                debug!(resource = %id, error = %e, "Cannot resolve identity, nothing to look up")
            }
        }
    }
    out
}

/// Phase one step: delete (or retain) a resource that should not exist
async fn remove<P: CloudProvider>(
    ctx: &StepContext<P>,
    id: &ResourceRef,
    declared: &Attributes,
    tracked: bool,
) -> Result<Option<Action>, StepError> {
    let Some(remote) = ctx.read(id, declared).await? else {
        if tracked {
            debug!(resource = %id, "Already gone");
            ctx.forget(id).await?;
        }
        return Ok(None);
    };

    if id.kind.is_retained_when_absent() {
        if !tracked {
            return Ok(None);
        }
        info!(resource = %id, "No longer declared, leaving the current value in place");
        ctx.forget(id).await?;
        return Ok(Some(Action::Retain));
    }

    if !ctx.is_plan() {
        info!(resource = %id, provider_id = %remote.id, "Deleting");
        ctx.delete(id, &remote, declared).await?;
        ctx.forget(id).await?;
    }
    Ok(Some(Action::Delete))
}

/// Phase two step: create or update a present resource
async fn converge<P: CloudProvider>(
    ctx: StepContext<P>,
    resource: Resource,
    resolved: Resolved,
    record: Option<ResourceRecord>,
) -> Result<Outcome, StepError> {
    if resource.kind == ResourceKind::SecretVersion {
        return inject_secret(&ctx, &resource, &resolved).await;
    }

    let id = resource.id();
    let kind = resource.kind;
    let declared = &resolved.attributes;

    if resolved.has_unknown_identity(&resource) {
        return Ok(Outcome::pending(Action::Create));
    }

    // The live instance was created under an identity that no longer matches
    let mut replaced = false;
    if let Some(stale) = record
        .as_ref()
        .filter(|rec| requires_replacement(kind, &diff(declared, &rec.attributes)))
    {
        if let Some(old) = ctx.read(&id, &stale.attributes).await? {
            if ctx.is_plan() {
                return Ok(Outcome::pending(Action::Replace));
            }
            info!(
                resource = %id,
                provider_id = %old.id,
                "Identity changed, deleting previous instance"
            );
            ctx.delete(&id, &old, &stale.attributes).await?;
            replaced = true;
        }
    }

    let Some(remote) = ctx.read(&id, declared).await? else {
        let action = if replaced { Action::Replace } else { Action::Create };
        if ctx.is_plan() {
            return Ok(Outcome::pending(action));
        }
        info!(resource = %id, "Creating");
        let created = ctx.create(&id, declared).await?;
        ctx.record(&id, &created.id, declared, &created.computed).await?;
        return Ok(Outcome::done(action, created.computed));
    };

    let changes = redact(&resource, diff(declared, &remote.observed));

    if changes.is_empty() {
        debug!(resource = %id, "Up to date");
        ctx.record(&id, &remote.id, declared, &remote.computed).await?;
        return Ok(Outcome::done(Action::NoOp, remote.computed));
    }

    if requires_replacement(kind, &changes) {
        if ctx.is_plan() {
            return Ok(Outcome::pending(Action::Replace));
        }
        info!(resource = %id, "Replacing");
        ctx.delete(&id, &remote, declared).await?;
        let created = ctx.create(&id, declared).await?;
        ctx.record(&id, &created.id, declared, &created.computed).await?;
        return Ok(Outcome::done(Action::Replace, created.computed));
    }

    if ctx.is_plan() {
        return Ok(Outcome::done(Action::Update(changes), remote.computed));
    }
    info!(
        resource = %id,
        changed = ?changes.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
        "Updating"
    );
    let updated = ctx.update(&id, &remote, declared, &changes).await?;
    ctx.record(&id, &updated.id, declared, &updated.computed).await?;
    Ok(Outcome::done(Action::Update(changes), updated.computed))
}

/// Phase two step for a secret value
async fn inject_secret<P: CloudProvider>(
    ctx: &StepContext<P>,
    resource: &Resource,
    resolved: &Resolved,
) -> Result<Outcome, StepError> {
    let id = resource.id();
    let value = resource.sensitive("value");

    if resolved.has_unknown_identity(resource) {
        let action = if value.is_some_and(|v| !v.is_empty()) {
            Action::Create
        } else {
            Action::NoOp
        };
        return Ok(Outcome::pending(action));
    }

    let secret_id = attr_str(&resolved.attributes, "secret_id")?;
    let injector = SecretInjector::new(ctx.provider.as_ref(), &ctx.pool, &ctx.stack, ctx.retry);
    let injection = injector
        .inject(&id, secret_id, value, ctx.run_id.as_deref())
        .await?;

    let mut computed = Attributes::from([("secret_id".to_string(), json!(secret_id))]);
    let action = match &injection {
        Injection::Skipped | Injection::Unchanged => Action::NoOp,
        Injection::Written { first: true, .. } => Action::Create,
        Injection::Written { first: false, .. } => Action::Update(vec![AttributeChange {
            key: "value".to_string(),
            before: Some(json!(REDACTED)),
            after: json!(REDACTED),
        }]),
    };
    let mut provider_id = secret_id.to_string();
    if let Injection::Written {
        version_id: Some(version_id),
        ..
    } = &injection
    {
        computed.insert("version_id".to_string(), json!(version_id));
        provider_id = version_id.clone();
    }

    ctx.record(&id, &provider_id, &resolved.attributes, &computed)
        .await?;
    Ok(Outcome::done(action, computed))
}

/// Hide sensitive attribute values in reported changes
fn redact(resource: &Resource, changes: Vec<AttributeChange>) -> Vec<AttributeChange> {
    changes
        .into_iter()
        .map(|change| {
            if resource.is_sensitive(&change.key) {
                AttributeChange {
                    key: change.key,
                    before: change.before.map(|_| json!(REDACTED)),
                    after: json!(REDACTED),
                }
            } else {
                change
            }
        })
        .collect()
}
