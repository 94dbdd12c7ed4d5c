//! Apply lock
//!
//! One apply (or destroy) per state directory at a time. The lock is an
//! exclusive OS file lock on `apply.lock`, taken without waiting and held
//! until the guard is dropped.

use crate::error::DeployError;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "apply.lock";

/// Held apply lock; released on drop
#[derive(Debug)]
pub struct ApplyLock {
    _file: File,
    path: PathBuf,
}

impl Drop for ApplyLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Apply lock released");
    }
}

impl ApplyLock {
    /// Take the lock or fail with [`DeployError::ApplyLockHeld`]
    pub async fn try_acquire(state_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        let path = state_dir.join(LOCK_FILE);
        let open_path = path.clone();
        let (file, acquired) = tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&open_path)?;
            let acquired = FileExt::try_lock_exclusive(&file)?;
            Ok::<_, std::io::Error>((file, acquired))
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to lock {}", path.display()))?;

        if !acquired {
            return Err(DeployError::ApplyLockHeld { path }.into());
        }

        debug!(path = %path.display(), "Apply lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
