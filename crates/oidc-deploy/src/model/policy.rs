//! IAM policy documents
//!
//! Documents are declared with [`Value`]s so statement resources and
//! principals can reference ARNs that only exist after apply. They are
//! rendered to JSON by the resolver once the referenced attributes are known.

use super::{ResourceRef, Value};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

pub const POLICY_VERSION: &str = "2012-10-17";

/// Claim GitHub puts the repository and ref into
pub const GITHUB_SUB_CLAIM: &str = "token.actions.githubusercontent.com:sub";

/// Branch the deploy role can be assumed from
pub fn github_subject(org: &str, repo: &str) -> String {
    format!(
        "repo:{org}/{repo}:ref:refs/heads/{}",
        oidc_deploy_common::defaults::DEPLOY_BRANCH
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// Identity provider ARN
    Federated(Value),
    /// AWS service principal, e.g. `build.apprunner.amazonaws.com`
    Service(String),
    /// Account or role ARN
    Aws(Value),
}

impl Principal {
    pub fn json_key(&self) -> &'static str {
        match self {
            Principal::Federated(_) => "Federated",
            Principal::Service(_) => "Service",
            Principal::Aws(_) => "AWS",
        }
    }
}

/// Exact-match condition on a single string claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCondition {
    pub claim: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: BTreeSet<String>,
    /// `"*"` or references to resource ARNs
    pub resources: Vec<Value>,
    pub principal: Option<Principal>,
    pub condition: Option<ClaimCondition>,
}

impl Statement {
    pub fn allow<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: Vec::new(),
            principal: None,
            condition: None,
        }
    }

    pub fn sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    pub fn on(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn on_any(self) -> Self {
        self.on("*")
    }
}

/// Ordered list of statements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyDocument {
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn collect_references(&self, out: &mut BTreeSet<ResourceRef>) {
        for statement in &self.statements {
            for resource in &statement.resources {
                resource.collect_references(out);
            }
            match &statement.principal {
                Some(Principal::Federated(v)) | Some(Principal::Aws(v)) => {
                    v.collect_references(out)
                }
                Some(Principal::Service(_)) | None => {}
            }
        }
    }
}

/// Role trust policy: one assume-role statement for one principal
#[derive(Debug, Clone, PartialEq)]
pub struct TrustPolicy {
    pub principal: Principal,
    pub condition: Option<ClaimCondition>,
}

impl TrustPolicy {
    /// Trust GitHub Actions runs on the deploy branch of `org/repo`
    ///
    /// `org` and `repo` are substituted verbatim.
    pub fn github_oidc(provider_arn: Value, org: &str, repo: &str) -> Self {
        Self {
            principal: Principal::Federated(provider_arn),
            condition: Some(ClaimCondition {
                claim: GITHUB_SUB_CLAIM.to_string(),
                value: github_subject(org, repo),
            }),
        }
    }

    /// Trust an AWS service principal
    pub fn service(service: &str) -> Self {
        Self {
            principal: Principal::Service(service.to_string()),
            condition: None,
        }
    }

    fn action(&self) -> &'static str {
        match self.principal {
            Principal::Federated(_) => "sts:AssumeRoleWithWebIdentity",
            Principal::Service(_) | Principal::Aws(_) => "sts:AssumeRole",
        }
    }

    pub fn into_document(self) -> PolicyDocument {
        let action = self.action();
        PolicyDocument::new(vec![Statement {
            sid: None,
            effect: Effect::Allow,
            actions: BTreeSet::from([action.to_string()]),
            resources: Vec::new(),
            principal: Some(self.principal),
            condition: self.condition,
        }])
    }
}

impl From<TrustPolicy> for Value {
    fn from(trust: TrustPolicy) -> Self {
        Value::Policy(trust.into_document())
    }
}

/// Render one statement once its values are resolved
pub(crate) fn render_statement(
    statement: &Statement,
    resources: Vec<Json>,
    principal: Option<Json>,
) -> Json {
    let mut out = Map::new();
    if let Some(sid) = &statement.sid {
        out.insert("Sid".into(), Json::String(sid.clone()));
    }
    out.insert("Effect".into(), Json::String(statement.effect.as_str().into()));
    if let (Some(p), Some(value)) = (&statement.principal, principal) {
        let mut principal = Map::new();
        principal.insert(p.json_key().into(), value);
        out.insert("Principal".into(), Json::Object(principal));
    }
    out.insert("Action".into(), string_or_list(statement.actions.iter().cloned().collect()));
    if !resources.is_empty() {
        out.insert(
            "Resource".into(),
            if resources.len() == 1 {
                resources.into_iter().next().unwrap_or(Json::Null)
            } else {
                Json::Array(resources)
            },
        );
    }
    if let Some(condition) = &statement.condition {
        let mut claims = Map::new();
        claims.insert(condition.claim.clone(), Json::String(condition.value.clone()));
        let mut operator = Map::new();
        operator.insert("StringEquals".into(), Json::Object(claims));
        out.insert("Condition".into(), Json::Object(operator));
    }
    Json::Object(out)
}

pub(crate) fn render_document(statements: Vec<Json>) -> Json {
    let mut out = Map::new();
    out.insert("Version".into(), Json::String(POLICY_VERSION.into()));
    out.insert("Statement".into(), Json::Array(statements));
    Json::Object(out)
}

fn string_or_list(mut items: Vec<String>) -> Json {
    if items.len() == 1 {
        Json::String(items.remove(0))
    } else {
        Json::Array(items.into_iter().map(Json::String).collect())
    }
}

/// Keys whose values IAM accepts either as a string or a list of strings
const LIST_KEYS: &[&str] = &[
    "Action",
    "NotAction",
    "Resource",
    "NotResource",
    "Federated",
    "Service",
    "AWS",
];

/// Normalize a policy document for comparison
///
/// IAM echoes documents back with single-element lists collapsed (or not)
/// and keys in arbitrary order. Lists of strings are sorted, single strings
/// under list keys become one-element lists and condition values are
/// treated the same way.
pub fn canonicalize(doc: &Json) -> Json {
    canonicalize_inner(doc, None)
}

fn canonicalize_inner(value: &Json, key: Option<&str>) -> Json {
    match value {
        Json::Object(map) => {
            let in_condition = key == Some("Condition");
            let mut out = BTreeMap::new();
            for (k, v) in map {
                let normalized = if in_condition {
                    canonicalize_condition_operator(v)
                } else {
                    canonicalize_inner(v, Some(k))
                };
                out.insert(k.clone(), normalized);
            }
            Json::Object(out.into_iter().collect())
        }
        Json::String(s) if key.is_some_and(|k| LIST_KEYS.contains(&k)) => {
            Json::Array(vec![Json::String(s.clone())])
        }
        Json::Array(items) => {
            sorted_list(items.iter().map(|v| canonicalize_inner(v, None)).collect())
        }
        other => other.clone(),
    }
}

fn canonicalize_condition_operator(value: &Json) -> Json {
    match value {
        Json::Object(claims) => Json::Object(
            claims
                .iter()
                .map(|(claim, v)| {
                    let v = match v {
                        Json::String(s) => Json::Array(vec![Json::String(s.clone())]),
                        Json::Array(items) => sorted_list(items.clone()),
                        other => other.clone(),
                    };
                    (claim.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sorted_list(mut items: Vec<Json>) -> Json {
    if items.iter().all(Json::is_string) {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        items.dedup();
    }
    Json::Array(items)
}

/// Whether a JSON value looks like an IAM policy document
pub fn is_policy_document(value: &Json) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("Statement"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_github_subject_is_verbatim() {
        assert_eq!(
            github_subject("acme", "widget"),
            "repo:acme/widget:ref:refs/heads/main"
        );
        // No case folding
        assert_eq!(
            github_subject("Acme", "Widget"),
            "repo:Acme/Widget:ref:refs/heads/main"
        );
    }

    #[test]
    fn test_github_trust_has_single_condition() {
        let doc =
            TrustPolicy::github_oidc(Value::from("arn:provider"), "acme", "widget").into_document();
        assert_eq!(doc.statements.len(), 1);
        let statement = &doc.statements[0];
        assert!(statement.actions.contains("sts:AssumeRoleWithWebIdentity"));
        let condition = statement.condition.as_ref().unwrap();
        assert_eq!(condition.claim, GITHUB_SUB_CLAIM);
        assert!(!condition.value.contains('*'));
    }

    #[test]
    fn test_service_trust_uses_assume_role() {
        let doc = TrustPolicy::service("tasks.apprunner.amazonaws.com").into_document();
        assert!(doc.statements[0].actions.contains("sts:AssumeRole"));
        assert!(doc.statements[0].condition.is_none());
    }

    #[test]
    fn test_canonicalize_collapsed_and_expanded_forms_match() {
        let ours = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": ["ecr:PutImage", "ecr:BatchGetImage"],
                "Resource": "arn:aws:ecr:us-east-1:1:repository/app",
                "Condition": {"StringEquals": {"k": "v"}}
            }]
        });
        let theirs = json!({
            "Statement": [{
                "Resource": ["arn:aws:ecr:us-east-1:1:repository/app"],
                "Condition": {"StringEquals": {"k": ["v"]}},
                "Action": ["ecr:BatchGetImage", "ecr:PutImage"],
                "Effect": "Allow"
            }],
            "Version": "2012-10-17"
        });
        assert_eq!(canonicalize(&ours), canonicalize(&theirs));
    }

    #[test]
    fn test_canonicalize_keeps_statement_order() {
        let a = json!({"Statement": [{"Sid": "A"}, {"Sid": "B"}]});
        let b = json!({"Statement": [{"Sid": "B"}, {"Sid": "A"}]});
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn test_canonicalize_detects_real_change() {
        let a = json!({"Statement": [{"Action": "s3:GetObject"}]});
        let b = json!({"Statement": [{"Action": "s3:PutObject"}]});
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }
}
