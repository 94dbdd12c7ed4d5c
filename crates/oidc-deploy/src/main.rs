//! oidc-deploy: provisions the GitHub OIDC deploy stack on AWS
//!
//! Plans and applies the OIDC provider, deploy role, ECR repository, API key
//! secret and optional App Runner service for one application, and prints
//! the outputs the CI workflow consumes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use oidc_deploy::config::{ConfigOverrides, StackConfig};
use oidc_deploy::lock::ApplyLock;
use oidc_deploy::model::catalog;
use oidc_deploy::outputs::{render_json, render_table, resolve_outputs};
use oidc_deploy::provider::aws::AwsProvider;
use oidc_deploy::provider::{CloudProvider, MemoryProvider};
use oidc_deploy::reconcile::{Reconciler, Report, RetryPolicy};
use oidc_deploy::state::{self, DbPool};
use oidc_deploy::DeployError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SDK crates whose logs are capped at warn
const AWS_LOG_TARGETS: &[&str] = &[
    "aws_config",
    "aws_runtime",
    "aws_sdk_apprunner",
    "aws_sdk_ecr",
    "aws_sdk_iam",
    "aws_sdk_secretsmanager",
    "aws_sdk_sts",
    "aws_smithy_runtime",
    "aws_smithy_runtime_api",
];

#[derive(Parser, Debug)]
#[command(name = "oidc-deploy")]
#[command(about = "Provision the GitHub OIDC / ECR / App Runner deploy stack on AWS")]
#[command(version)]
struct Args {
    #[command(flatten)]
    stack: StackArgs,

    #[command(subcommand)]
    command: Command,
}

/// Stack configuration shared by every subcommand
#[derive(clap::Args, Debug)]
struct StackArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GitHub organization allowed to assume the deploy role
    #[arg(long, env = "OIDC_DEPLOY_ORG", global = true)]
    org: Option<String>,

    /// GitHub repository allowed to assume the deploy role
    #[arg(long, env = "OIDC_DEPLOY_REPO", global = true)]
    repo: Option<String>,

    /// API key stored in Secrets Manager (left untouched when empty)
    #[arg(long, env = "OIDC_DEPLOY_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long, env = "AWS_PROFILE", global = true)]
    aws_profile: Option<String>,

    /// Application name, used as the base of every resource name
    #[arg(long, global = true)]
    app_name: Option<String>,

    /// Provision the App Runner service
    #[arg(long, value_name = "BOOL", global = true)]
    manage_service: Option<bool>,

    /// Image tag the App Runner service runs
    #[arg(long, global = true)]
    image_tag: Option<String>,

    /// Days a deleted secret can be restored (0 deletes immediately)
    #[arg(long, global = true)]
    recovery_window_days: Option<u32>,

    /// Maximum concurrent resource operations
    #[arg(long, global = true)]
    parallelism: Option<usize>,

    /// Overall run timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Directory holding the state database and apply lock
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl StackArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            org: self.org.clone(),
            repo: self.repo.clone(),
            api_key: self.api_key.clone(),
            region: self.region.clone(),
            profile: self.aws_profile.clone(),
            app_name: self.app_name.clone(),
            manage_service: self.manage_service,
            image_tag: self.image_tag.clone(),
            recovery_window_days: self.recovery_window_days,
            parallelism: self.parallelism,
            timeout: self.timeout,
            state_dir: self.state_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what an apply would change
    Plan {
        /// Plan against an empty in-memory account instead of AWS
        #[arg(long)]
        offline: bool,

        /// Plan a destroy instead of an apply
        #[arg(long)]
        destroy: bool,

        /// Print the steps as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or update the stack
    Apply,

    /// Delete every resource of the stack
    Destroy,

    /// Print the stack outputs from live state
    Outputs {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Show recorded runs
    History {
        /// Number of runs to show
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Also list the resources the state database tracks
        #[arg(long)]
        resources: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    let Some(deploy) = e.downcast_ref::<DeployError>() else {
        return;
    };
    if let Some(applied) = deploy.applied() {
        if applied.is_empty() {
            let _ = writeln!(stderr, "\nNo resources were changed.");
        } else {
            let _ = writeln!(stderr, "\nApplied before stopping:");
            for r in applied {
                let _ = writeln!(stderr, "  {r}");
            }
        }
    }
    if let DeployError::ApplyFailed { source, .. } = deploy {
        if let Some(hint) = source.suggestion() {
            let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {hint}");
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for target in AWS_LOG_TARGETS {
        if let Ok(directive) = format!("{target}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so that stdout carries only plans and outputs
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `token` on Ctrl-C or once `timeout` elapses
fn spawn_cancellation(token: CancellationToken, timeout: Duration) {
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight operations");
            on_signal.cancel();
        }
    });
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Run timed out, finishing in-flight operations"
                );
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.stack.verbose);

    let config = StackConfig::load(args.stack.config.as_deref(), args.stack.overrides())?;
    config.validate()?;

    let model = catalog::build_stack(&config);
    let flags = catalog::flags(&config);
    let state_dir = match &config.apply.state_dir {
        Some(dir) => dir.clone(),
        None => state::default_state_dir()?,
    };

    let cancel = CancellationToken::new();
    spawn_cancellation(cancel.clone(), Duration::from_secs(config.apply.timeout));

    match args.command {
        Command::Plan {
            offline: true,
            destroy,
            json,
        } => {
            info!(stack = %config.stack_name(), "Planning against an empty account");
            let pool = state::open_memory_db().await?;
            let reconciler = reconciler(Arc::new(MemoryProvider::new()), pool, &config, &cancel);
            let report = if destroy {
                reconciler.plan_destroy(&model).await?
            } else {
                reconciler.plan(&model, &flags).await?
            };
            print_report(&report, json)?;
        }

        Command::Plan {
            offline: false,
            destroy,
            json,
        } => {
            let reconciler = connect(&config, &state_dir, &cancel).await?;
            let report = if destroy {
                reconciler.plan_destroy(&model).await?
            } else {
                reconciler.plan(&model, &flags).await?
            };
            print_report(&report, json)?;
        }

        Command::Apply => {
            let lock = ApplyLock::try_acquire(&state_dir).await?;
            let reconciler = connect(&config, &state_dir, &cancel).await?;
            info!(lock = %lock.path().display(), stack = %config.stack_name(), "Applying stack");

            let report = reconciler.apply(&model, &flags).await?;
            print!("{report}");

            let values = resolve_outputs(&model, &report.instances)?;
            println!("{}", render_table(&values));
        }

        Command::Destroy => {
            let lock = ApplyLock::try_acquire(&state_dir).await?;
            let reconciler = connect(&config, &state_dir, &cancel).await?;
            info!(lock = %lock.path().display(), stack = %config.stack_name(), "Destroying stack");

            let report = reconciler.destroy(&model).await?;
            print!("{report}");
        }

        Command::Outputs { format } => {
            let reconciler = connect(&config, &state_dir, &cancel).await?;
            let report = reconciler.plan(&model, &flags).await?;
            if report.has_changes() {
                warn!(
                    pending = %report.summary(),
                    "Stack has pending changes, outputs reflect live state"
                );
            }

            let values = resolve_outputs(&model, &report.instances)?;
            match format {
                OutputFormat::Json => println!("{}", render_json(&values)?),
                OutputFormat::Table => println!("{}", render_table(&values)),
            }
        }

        Command::History { limit, resources } => {
            let pool = state::open_db(&state_dir).await?;
            state::print_history(&pool, config.stack_name(), limit).await?;
            if resources {
                println!();
                state::print_resources(&pool, config.stack_name()).await?;
            }
        }
    }

    Ok(())
}

fn reconciler<P: CloudProvider>(
    provider: Arc<P>,
    pool: DbPool,
    config: &StackConfig,
    cancel: &CancellationToken,
) -> Reconciler<P> {
    Reconciler::new(provider, pool, config.stack_name())
        .with_retry(RetryPolicy::default().with_max_attempts(config.apply.max_attempts))
        .with_parallelism(config.apply.parallelism)
        .with_cancellation(cancel.clone())
}

/// Open the state database and an AWS-backed reconciler
async fn connect(
    config: &StackConfig,
    state_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Reconciler<AwsProvider>> {
    let pool = state::open_db(state_dir).await?;
    let provider = AwsProvider::connect(config.region(), config.aws_profile(), config.stack_name())
        .await
        .context("Failed to connect to AWS")?;

    let account_id = provider.account_id().to_string();
    let region = provider.region().to_string();
    Ok(reconciler(Arc::new(provider), pool, config, cancel).with_target(account_id, region))
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.steps)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
