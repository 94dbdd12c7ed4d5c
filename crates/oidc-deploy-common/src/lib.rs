//! oidc-deploy-common - Shared types and defaults
//!
//! This crate holds the pieces shared by the engine and its test helpers,
//! without any AWS SDK dependencies to keep it lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`resource_kind`]: The fixed catalog of resource kinds and their ordering rules
//! - [`tags`]: AWS resource tag constants for discovery and ownership

pub mod defaults;
pub mod resource_kind;
pub mod tags;

pub use resource_kind::ResourceKind;
