//! Query operations for state database

use super::db::DbPool;
use super::types::{ResourceRecord, RunRecord, RunStatus};
use crate::model::{Attributes, ResourceRef};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oidc_deploy_common::ResourceKind;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

fn parse_attributes(s: &str) -> Result<Attributes> {
    serde_json::from_str(s).context("Invalid attribute JSON")
}

fn resource_from_row(row: &SqliteRow) -> Result<Option<ResourceRecord>> {
    let kind: String = row.get("kind");
    let Some(kind) = ResourceKind::parse(&kind) else {
        warn!(kind = %kind, "Skipping state record of unknown resource kind");
        return Ok(None);
    };
    let applied_at: String = row.get("applied_at");
    let deleted_at: Option<String> = row.get("deleted_at");
    let attributes: String = row.get("attributes");
    let computed: String = row.get("computed");

    Ok(Some(ResourceRecord {
        kind,
        name: row.get("name"),
        provider_id: row.get("provider_id"),
        attributes: parse_attributes(&attributes)?,
        computed: parse_attributes(&computed)?,
        run_id: row.get("run_id"),
        applied_at: parse_time(&applied_at)?,
        deleted_at: deleted_at.as_deref().map(parse_time).transpose()?,
    }))
}

/// Get every live resource of a stack
pub async fn get_live_resources(pool: &DbPool, stack: &str) -> Result<Vec<ResourceRecord>> {
    let rows = sqlx::query(
        "SELECT kind, name, provider_id, attributes, computed, run_id, applied_at, deleted_at
         FROM resources WHERE stack = ? AND deleted_at IS NULL
         ORDER BY kind, name",
    )
    .bind(stack)
    .fetch_all(pool)
    .await?;

    let mut resources = Vec::new();
    for row in &rows {
        if let Some(record) = resource_from_row(row)? {
            resources.push(record);
        }
    }

    Ok(resources)
}

/// Get the live record of one resource
pub async fn get_resource(
    pool: &DbPool,
    stack: &str,
    resource: &ResourceRef,
) -> Result<Option<ResourceRecord>> {
    let row = sqlx::query(
        "SELECT kind, name, provider_id, attributes, computed, run_id, applied_at, deleted_at
         FROM resources WHERE stack = ? AND kind = ? AND name = ? AND deleted_at IS NULL",
    )
    .bind(stack)
    .bind(resource.kind.as_str())
    .bind(&resource.name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => resource_from_row(&row),
        None => Ok(None),
    }
}

/// Fingerprint of the last secret value the engine wrote for `resource`
pub async fn last_secret_fingerprint(
    pool: &DbPool,
    stack: &str,
    resource: &ResourceRef,
) -> Result<Option<String>> {
    let fingerprint: Option<String> = sqlx::query_scalar(
        "SELECT fingerprint FROM secret_versions
         WHERE stack = ? AND kind = ? AND name = ?
         ORDER BY id DESC LIMIT 1",
    )
    .bind(stack)
    .bind(resource.kind.as_str())
    .bind(&resource.name)
    .fetch_optional(pool)
    .await?;

    Ok(fingerprint)
}

/// Most recent runs of a stack, newest first
pub async fn list_runs(pool: &DbPool, stack: &str, limit: u32) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        "SELECT run_id, command, account_id, region, started_at, finished_at, status, summary
         FROM runs WHERE stack = ?
         ORDER BY started_at DESC LIMIT ?",
    )
    .bind(stack)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut runs = Vec::new();
    for row in rows {
        let started_at: String = row.get("started_at");
        let finished_at: Option<String> = row.get("finished_at");
        let status: String = row.get("status");

        runs.push(RunRecord {
            run_id: row.get("run_id"),
            command: row.get("command"),
            account_id: row.get("account_id"),
            region: row.get("region"),
            started_at: parse_time(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_time).transpose()?,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
            summary: row.get("summary"),
        });
    }

    Ok(runs)
}
