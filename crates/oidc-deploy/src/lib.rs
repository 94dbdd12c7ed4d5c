//! oidc-deploy - provisioning engine for a GitHub OIDC deploy stack
//!
//! Declares the AWS topology a containerized service needs to be deployed
//! from GitHub Actions (OIDC trust, deploy role, ECR repository, API key
//! secret and an optional App Runner service) and reconciles live AWS
//! state towards it.
//!
//! Data flows from the [`model`] through the [`graph`] and the
//! [`conditions`] into the [`reconcile`] walk, which drives a
//! [`provider::CloudProvider`] and hands secret values to the [`secret`]
//! injector. [`outputs`] computes the values the CI workflow consumes.

pub mod conditions;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod model;
pub mod outputs;
pub mod provider;
pub mod reconcile;
pub mod secret;
pub mod state;
pub mod wait;

pub use error::DeployError;
