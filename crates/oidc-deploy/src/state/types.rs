//! State types

use crate::model::{Attributes, ResourceRef};
use chrono::{DateTime, Utc};
use oidc_deploy_common::ResourceKind;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// A resource the engine has applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub name: String,
    /// Provider-side identity (ARN or name)
    pub provider_id: String,
    /// Declared attributes at apply time, sensitive values fingerprinted
    pub attributes: Attributes,
    pub computed: Attributes,
    pub run_id: String,
    pub applied_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    pub fn id(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.name.clone())
    }
}

/// One plan/apply/destroy invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub command: String,
    pub account_id: String,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub summary: Option<String>,
}
