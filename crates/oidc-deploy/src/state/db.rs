//! Database setup and schema management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias
pub type DbPool = SqlitePool;

const DB_FILE: &str = "state.db";

/// Platform data directory used when no state directory is configured
pub fn default_state_dir() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "oidc-deploy").context("Failed to get project directories")?;
    Ok(proj_dirs.data_local_dir().to_path_buf())
}

/// Open the state database in `state_dir`, creating it if needed
pub async fn open_db(state_dir: &Path) -> Result<DbPool> {
    fs::create_dir_all(state_dir).with_context(|| {
        format!("Failed to create state directory {}", state_dir.display())
    })?;
    let path = state_dir.join(DB_FILE);
    let db_url = format!("sqlite://{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open state database")?;

    setup_schema(&pool).await?;

    Ok(pool)
}

/// Open a fresh in-memory database (tests and offline plans)
///
/// A single connection keeps every query on the same in-memory database.
pub async fn open_memory_db() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory state database")?;

    setup_schema(&pool).await?;

    Ok(pool)
}

/// Setup database schema
async fn setup_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            stack TEXT NOT NULL,
            command TEXT NOT NULL,
            account_id TEXT NOT NULL,
            region TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            stack TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            attributes TEXT NOT NULL,
            computed TEXT NOT NULL,
            run_id TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY (stack, kind, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS secret_versions (
            id INTEGER PRIMARY KEY,
            stack TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            version_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            written_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_stack ON runs(stack)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_secret_versions_resource ON secret_versions(stack, kind, name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
