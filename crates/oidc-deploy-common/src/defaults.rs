//! Default configuration values
//!
//! These constants keep the CLI, config file loader and stack catalog in
//! agreement about what an unset option means.

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default application name, used as the base for resource names
pub const DEFAULT_APP_NAME: &str = "mommy-rag";

/// Branch whose workflows may assume the deploy role
pub const DEPLOY_BRANCH: &str = "main";

/// GitHub Actions OIDC issuer
pub const GITHUB_OIDC_URL: &str = "https://token.actions.githubusercontent.com";

/// Audience GitHub Actions requests when exchanging its token with STS
pub const GITHUB_OIDC_AUDIENCE: &str = "sts.amazonaws.com";

/// Thumbprint of the GitHub Actions OIDC issuer certificate chain
pub const GITHUB_OIDC_THUMBPRINT: &str = "6938fd4d98bab03faadb97b34396831e3780aea1";

/// Port the application container listens on
pub const DEFAULT_SERVICE_PORT: u16 = 8000;

/// App Runner vCPU setting (1 vCPU)
pub const DEFAULT_SERVICE_CPU: &str = "1024";

/// App Runner memory setting (2 GB)
pub const DEFAULT_SERVICE_MEMORY: &str = "2048";

/// Image tag the service runs
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Environment variable the container reads the API key from
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Days Secrets Manager keeps a deleted secret before purging it
pub const DEFAULT_RECOVERY_WINDOW_DAYS: u32 = 7;

/// Maximum attempts for a single provider call (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of resources reconciled concurrently
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default apply timeout in seconds
pub const DEFAULT_APPLY_TIMEOUT: u64 = 1800;

// Serde default functions for struct field defaults

/// Returns the default region
pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Returns the default application name
pub fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

/// Returns the default service port
pub fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

/// Returns the default App Runner cpu setting
pub fn default_service_cpu() -> String {
    DEFAULT_SERVICE_CPU.to_string()
}

/// Returns the default App Runner memory setting
pub fn default_service_memory() -> String {
    DEFAULT_SERVICE_MEMORY.to_string()
}

/// Returns the default image tag
pub fn default_image_tag() -> String {
    DEFAULT_IMAGE_TAG.to_string()
}

/// Returns the default recovery window
pub fn default_recovery_window_days() -> u32 {
    DEFAULT_RECOVERY_WINDOW_DAYS
}

/// Returns the default parallelism
pub fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}
