//! CRUD operations for state database

use super::db::DbPool;
use super::types::RunStatus;
use crate::model::{Attributes, ResourceRef};
use anyhow::Result;
use chrono::Utc;

/// Insert a new run
pub async fn insert_run(
    pool: &DbPool,
    run_id: &str,
    stack: &str,
    command: &str,
    account_id: &str,
    region: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO runs (run_id, stack, command, account_id, region, started_at, status)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(stack)
    .bind(command)
    .bind(account_id)
    .bind(region)
    .bind(&now)
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the outcome of a run
pub async fn finish_run(
    pool: &DbPool,
    run_id: &str,
    status: RunStatus,
    summary: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query("UPDATE runs SET status = ?, finished_at = ?, summary = ? WHERE run_id = ?")
        .bind(status.as_str())
        .bind(&now)
        .bind(summary)
        .bind(run_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record a created or updated resource, reviving a previously deleted row
pub async fn upsert_resource(
    pool: &DbPool,
    stack: &str,
    run_id: &str,
    resource: &ResourceRef,
    provider_id: &str,
    attributes: &Attributes,
    computed: &Attributes,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let attributes = serde_json::to_string(attributes)?;
    let computed = serde_json::to_string(computed)?;

    sqlx::query(
        "INSERT INTO resources (stack, kind, name, provider_id, attributes, computed, run_id, applied_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (stack, kind, name) DO UPDATE SET
             provider_id = excluded.provider_id,
             attributes = excluded.attributes,
             computed = excluded.computed,
             run_id = excluded.run_id,
             applied_at = excluded.applied_at,
             deleted_at = NULL",
    )
    .bind(stack)
    .bind(resource.kind.as_str())
    .bind(&resource.name)
    .bind(provider_id)
    .bind(&attributes)
    .bind(&computed)
    .bind(run_id)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a resource as deleted
pub async fn mark_resource_deleted(
    pool: &DbPool,
    stack: &str,
    resource: &ResourceRef,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE resources SET deleted_at = ?
         WHERE stack = ? AND kind = ? AND name = ? AND deleted_at IS NULL",
    )
    .bind(&now)
    .bind(stack)
    .bind(resource.kind.as_str())
    .bind(&resource.name)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remember the fingerprint of a secret value the engine wrote
pub async fn record_secret_version(
    pool: &DbPool,
    stack: &str,
    run_id: &str,
    resource: &ResourceRef,
    fingerprint: &str,
    version_id: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO secret_versions (stack, kind, name, fingerprint, version_id, run_id, written_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(stack)
    .bind(resource.kind.as_str())
    .bind(&resource.name)
    .bind(fingerprint)
    .bind(version_id)
    .bind(run_id)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}
