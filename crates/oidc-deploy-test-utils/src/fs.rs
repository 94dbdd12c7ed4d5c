//! Filesystem helpers

use tempfile::TempDir;

/// Create a temporary directory to hold a state database and apply lock.
///
/// The directory is removed when the returned guard is dropped.
pub fn temp_state_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("oidc-deploy-state-")
        .tempdir()
        .expect("Failed to create temporary state directory")
}
