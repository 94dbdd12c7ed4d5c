//! AWS resource tag constants for oidc-deploy
//!
//! Every taggable resource the engine creates carries these tags so that
//! ownership can be checked from the AWS console or the CLI.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `oidc-deploy:tool` | Static identifier ("oidc-deploy") |
//! | `oidc-deploy:stack` | Stack name (the application name) |
//! | `oidc-deploy:created-at` | RFC 3339 creation timestamp |

/// Tag key for tool identification
pub const TAG_TOOL: &str = "oidc-deploy:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "oidc-deploy";

/// Tag key for the owning stack
pub const TAG_STACK: &str = "oidc-deploy:stack";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "oidc-deploy:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Standard tag set for a stack, as key/value pairs.
pub fn standard_tags(stack: &str) -> Vec<(&'static str, String)> {
    vec![
        (TAG_TOOL, TAG_TOOL_VALUE.to_string()),
        (TAG_STACK, stack.to_string()),
        (TAG_CREATED_AT, format_created_at(chrono::Utc::now())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_at_round_trips() {
        let now = chrono::Utc::now();
        let parsed = parse_created_at(&format_created_at(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn standard_tags_carry_stack_name() {
        let tags = standard_tags("mommy-rag");
        assert!(tags.contains(&(TAG_TOOL, TAG_TOOL_VALUE.to_string())));
        assert!(tags.contains(&(TAG_STACK, "mommy-rag".to_string())));
        assert!(tags.iter().any(|(k, _)| *k == TAG_CREATED_AT));
    }
}
