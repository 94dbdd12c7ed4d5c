//! SQLite state for apply runs and the resources they manage
//!
//! Uses sqlx for async database access with a connection pool. The state
//! database remembers what the engine created so resources dropped from the
//! model can still be found and deleted, and keeps the fingerprint of the
//! last secret value written.

mod cli;
mod crud;
mod db;
mod queries;
mod types;

// Re-export types
pub use db::{DbPool, default_state_dir, open_db, open_memory_db};
pub use types::{ResourceRecord, RunRecord, RunStatus};

// Re-export CRUD operations
pub use crud::{
    finish_run, insert_run, mark_resource_deleted, record_secret_version, upsert_resource,
};

// Re-export query operations
pub use queries::{get_live_resources, get_resource, last_secret_fingerprint, list_runs};

// Re-export CLI operations
pub use cli::{print_history, print_resources};
