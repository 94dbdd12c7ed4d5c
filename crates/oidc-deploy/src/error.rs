//! Engine error taxonomy
//!
//! Everything that can stop a plan or an apply. Validation, graph and
//! condition errors are raised before the first provider call; apply errors
//! carry the resources that were successfully applied before the failure so
//! the operator knows what state the partial run left behind.

use crate::model::{ResolveError, ResourceRef};
use crate::provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {}", problems.join("; "))]
    Validation { problems: Vec<String> },

    #[error("dependency cycle: {}", format_cycle(cycle))]
    GraphCycle { cycle: Vec<ResourceRef> },

    #[error("cannot resolve {resource}: {reason}")]
    ConditionalResolution {
        resource: ResourceRef,
        reason: String,
    },

    #[error("cannot resolve attributes of {resource}")]
    Resolve {
        resource: ResourceRef,
        #[source]
        source: ResolveError,
    },

    #[error("output '{output}' is required but {source_ref} does not exist")]
    UnresolvedOutput {
        output: String,
        source_ref: ResourceRef,
    },

    #[error("apply failed at {resource} after {} applied resource(s)", applied.len())]
    ApplyFailed {
        resource: ResourceRef,
        #[source]
        source: ProviderError,
        applied: Vec<ResourceRef>,
    },

    #[error("apply cancelled after {} applied resource(s)", applied.len())]
    Cancelled { applied: Vec<ResourceRef> },

    #[error("another apply holds the lock at {}", path.display())]
    ApplyLockHeld { path: PathBuf },

    #[error("state database error")]
    State(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DeployError {
    pub fn state(error: anyhow::Error) -> Self {
        DeployError::State(error.into())
    }

    pub fn validation(problem: impl Into<String>) -> Self {
        DeployError::Validation {
            problems: vec![problem.into()],
        }
    }

    /// Resources applied before the run stopped, if it stopped mid-walk
    pub fn applied(&self) -> Option<&[ResourceRef]> {
        match self {
            DeployError::ApplyFailed { applied, .. } | DeployError::Cancelled { applied } => {
                Some(applied)
            }
            _ => None,
        }
    }

    /// Whether the error was raised before any provider call
    pub fn is_pre_apply(&self) -> bool {
        matches!(
            self,
            DeployError::Validation { .. }
                | DeployError::GraphCycle { .. }
                | DeployError::ConditionalResolution { .. }
        )
    }
}

fn format_cycle(cycle: &[ResourceRef]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use oidc_deploy_common::ResourceKind;

    #[test]
    fn test_cycle_message_closes_the_loop() {
        let err = DeployError::GraphCycle {
            cycle: vec![
                ResourceRef::new(ResourceKind::IamRole, "a"),
                ResourceRef::new(ResourceKind::IamPolicy, "b"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: iam_role.a -> iam_policy.b -> iam_role.a"
        );
    }

    #[test]
    fn test_applied_list_exposed() {
        let applied = vec![ResourceRef::new(ResourceKind::EcrRepository, "app")];
        let err = DeployError::Cancelled {
            applied: applied.clone(),
        };
        assert_eq!(err.applied(), Some(applied.as_slice()));
        assert!(!err.is_pre_apply());
        assert!(DeployError::validation("x").is_pre_apply());
    }
}
