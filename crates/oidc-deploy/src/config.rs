//! Configuration types for a deploy stack
//!
//! Values are layered: an optional TOML file, then environment variables and
//! command-line flags (clap merges those two into [`ConfigOverrides`]), then
//! the defaults from `oidc_deploy_common::defaults`.

use crate::error::DeployError;
use crate::model::Sensitive;
use anyhow::Context;
use oidc_deploy_common::defaults;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// App Runner vCPU settings (in CPU units)
pub const SUPPORTED_CPU: &[&str] = &["256", "512", "1024", "2048", "4096"];

/// App Runner memory settings (in MB)
pub const SUPPORTED_MEMORY: &[&str] = &[
    "512", "1024", "2048", "3072", "4096", "6144", "8192", "10240", "12288",
];

/// GitHub repository allowed to assume the deploy role
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub org: String,
    pub repo: String,
}

/// AWS connection settings
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub profile: Option<String>,
}

/// Managed compute service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Application name; prefixes every resource name
    pub app_name: String,
    /// Whether the App Runner service is provisioned
    pub manage: bool,
    pub port: u16,
    pub cpu: String,
    pub memory: String,
    pub image_tag: String,
}

/// API key secret settings
#[derive(Debug, Clone)]
pub struct SecretConfig {
    /// Value to store; `None` leaves any existing value untouched
    pub api_key: Option<Sensitive>,
    /// 0 purges immediately on destroy, otherwise 7..=30 days of recovery
    pub recovery_window_days: u32,
}

/// Apply run behavior
#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Maximum concurrent resource operations
    pub parallelism: usize,
    /// Attempts per provider call, including the first
    pub max_attempts: u32,
    /// Whole-run timeout in seconds
    pub timeout: u64,
    /// Where the state database and apply lock live
    pub state_dir: Option<PathBuf>,
}

/// Configuration for a deploy stack
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub github: GithubConfig,
    pub aws: AwsConfig,
    pub service: ServiceConfig,
    pub secret: SecretConfig,
    pub apply: ApplyConfig,
}

impl StackConfig {
    /// Stack name used for tags and state records
    pub fn stack_name(&self) -> &str {
        &self.service.app_name
    }

    pub fn region(&self) -> &str {
        &self.aws.region
    }

    pub fn aws_profile(&self) -> Option<&str> {
        self.aws.profile.as_deref()
    }

    /// Whether a non-empty API key was supplied
    pub fn secret_value_provided(&self) -> bool {
        self.secret.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// Compose the configuration from an optional file and CLI/env overrides
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::compose(file, overrides))
    }

    pub fn compose(file: ConfigFile, o: ConfigOverrides) -> Self {
        Self {
            github: GithubConfig {
                org: o.org.or(file.github.org).unwrap_or_default(),
                repo: o.repo.or(file.github.repo).unwrap_or_default(),
            },
            aws: AwsConfig {
                region: o
                    .region
                    .or(file.aws.region)
                    .unwrap_or_else(defaults::default_region),
                profile: o.profile.or(file.aws.profile),
            },
            service: ServiceConfig {
                app_name: o
                    .app_name
                    .or(file.service.name)
                    .unwrap_or_else(defaults::default_app_name),
                manage: o.manage_service.or(file.service.manage).unwrap_or(false),
                port: file.service.port.unwrap_or_else(defaults::default_service_port),
                cpu: file.service.cpu.unwrap_or_else(defaults::default_service_cpu),
                memory: file
                    .service
                    .memory
                    .unwrap_or_else(defaults::default_service_memory),
                image_tag: o
                    .image_tag
                    .or(file.service.image_tag)
                    .unwrap_or_else(defaults::default_image_tag),
            },
            secret: SecretConfig {
                api_key: o.api_key.map(Sensitive::new),
                recovery_window_days: o
                    .recovery_window_days
                    .or(file.secret.recovery_window_days)
                    .unwrap_or_else(defaults::default_recovery_window_days),
            },
            apply: ApplyConfig {
                parallelism: o
                    .parallelism
                    .or(file.apply.parallelism)
                    .unwrap_or_else(defaults::default_parallelism),
                max_attempts: file.apply.max_attempts.unwrap_or(defaults::DEFAULT_MAX_ATTEMPTS),
                timeout: o
                    .timeout
                    .or(file.apply.timeout)
                    .unwrap_or(defaults::DEFAULT_APPLY_TIMEOUT),
                state_dir: o.state_dir.or(file.apply.state_dir),
            },
        }
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<(), DeployError> {
        let mut problems = Vec::new();

        check_github_name("org", &self.github.org, &mut problems);
        check_github_name("repo", &self.github.repo, &mut problems);

        let app = &self.service.app_name;
        let valid_app = (4..=40).contains(&app.len())
            && app.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
            && app
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid_app {
            problems.push(format!(
                "app name '{app}' must be 4-40 lowercase letters, digits, '-' or '_'"
            ));
        }

        if self.secret.api_key.as_ref().is_some_and(Sensitive::is_empty) {
            problems.push("API key must not be empty when provided".to_string());
        }

        let window = self.secret.recovery_window_days;
        if window != 0 && !(7..=30).contains(&window) {
            problems.push(format!(
                "recovery window must be 0 or between 7 and 30 days, got {window}"
            ));
        }

        if !SUPPORTED_CPU.contains(&self.service.cpu.as_str()) {
            problems.push(format!(
                "unsupported cpu '{}' (expected one of {})",
                self.service.cpu,
                SUPPORTED_CPU.join(", ")
            ));
        }
        if !SUPPORTED_MEMORY.contains(&self.service.memory.as_str()) {
            problems.push(format!(
                "unsupported memory '{}' (expected one of {})",
                self.service.memory,
                SUPPORTED_MEMORY.join(", ")
            ));
        }
        if self.service.port == 0 {
            problems.push("service port must be between 1 and 65535".to_string());
        }
        if self.service.image_tag.trim().is_empty() {
            problems.push("image tag must not be empty".to_string());
        }

        if self.apply.parallelism == 0 {
            problems.push("parallelism must be at least 1".to_string());
        }
        if self.apply.max_attempts == 0 {
            problems.push("max attempts must be at least 1".to_string());
        }
        if self.aws.region.trim().is_empty() {
            problems.push("AWS region must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Validation { problems })
        }
    }
}

fn check_github_name(field: &str, value: &str, problems: &mut Vec<String>) {
    if value.is_empty() {
        problems.push(format!("GitHub {field} is required"));
    } else if value.contains(['/', '*']) || value.chars().any(char::is_whitespace) {
        problems.push(format!(
            "GitHub {field} '{value}' must not contain '/', '*' or whitespace"
        ));
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub org: Option<String>,
    pub repo: Option<String>,
    pub api_key: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub app_name: Option<String>,
    pub manage_service: Option<bool>,
    pub image_tag: Option<String>,
    pub recovery_window_days: Option<u32>,
    pub parallelism: Option<usize>,
    pub timeout: Option<u64>,
    pub state_dir: Option<PathBuf>,
}

/// On-disk configuration (`oidc-deploy.toml`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub github: GithubSection,
    pub aws: AwsSection,
    pub service: ServiceSection,
    pub secret: SecretSection,
    pub apply: ApplySection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GithubSection {
    pub org: Option<String>,
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AwsSection {
    pub region: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSection {
    pub name: Option<String>,
    pub manage: Option<bool>,
    pub port: Option<u16>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub image_tag: Option<String>,
}

/// The API key itself is never read from the file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretSection {
    pub recovery_window_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplySection {
    pub parallelism: Option<usize>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<u64>,
    pub state_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
