//! Shared test utilities for oidc-deploy
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique stack names for integration tests
//! - [`fs`]: Temporary state directories

pub mod aws;
pub mod fs;

// Re-export commonly used items
pub use aws::{get_test_region, test_stack_name};
pub use fs::temp_state_dir;
