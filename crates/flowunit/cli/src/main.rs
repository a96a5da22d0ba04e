//! flowunitctl - operate function unit versions
//!
//! Deploys workflow definitions as new versions of a function unit, shows
//! version history, starts process instances and performs destructive
//! rollbacks against the configured store and workflow engine.

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowunit_deployment::{FunctionUnitService, RetryPolicy};
use flowunit_registry::{InMemoryWorkflowEngine, WorkflowEngine};
use flowunit_storage::postgres::PostgresUnitStore;
use flowunit_storage::{InMemoryUnitStore, UnitStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod engine;
mod error;
mod output;

use commands::{instance, rollback, unit};
use config::{EngineConfig, FlowunitConfig, StorageConfig};
use engine::HttpWorkflowEngine;
use error::CliError;

#[derive(Parser)]
#[command(name = "flowunitctl")]
#[command(about = "Flowunit - function unit versioning, deployment and rollback", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLOWUNIT_CONFIG")]
    config: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Log level, overrides the configuration file
    #[arg(long, env = "FLOWUNIT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    /// Actor recorded on lifecycle events
    #[arg(long, env = "FLOWUNIT_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a definition as a new version
    Deploy(unit::DeployArgs),

    /// Show the version history of a unit
    History { name: String },

    /// Show the active version of a unit
    Active { name: String },

    /// List units with their active version
    List,

    /// Roll a unit back to an older version, deleting everything newer
    Rollback {
        name: String,

        /// Target version, e.g. 1.2.0
        version: String,

        /// Execute instead of previewing the impact
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Start a process instance on the active version
    Start(instance::StartArgs),

    /// Verify that a unit has exactly one active version
    Check { name: String },

    /// Show effective configuration
    Config,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn build_store(config: &StorageConfig) -> Result<Arc<dyn UnitStore>, CliError> {
    match config {
        StorageConfig::Memory => {
            debug!("Using in-memory store");
            Ok(Arc::new(InMemoryUnitStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store =
                PostgresUnitStore::connect_with_options(url, *max_connections, *connect_timeout_secs)
                    .await
                    .map_err(CliError::Storage)?;
            info!(max_connections, "Connected to PostgreSQL store");
            Ok(Arc::new(store))
        }
    }
}

fn build_engine(config: &EngineConfig) -> Result<Arc<dyn WorkflowEngine>, CliError> {
    match config {
        EngineConfig::Memory => Ok(Arc::new(InMemoryWorkflowEngine::new())),
        EngineConfig::Http {
            base_url,
            timeout_secs,
        } => Ok(Arc::new(HttpWorkflowEngine::new(
            base_url,
            Duration::from_secs(*timeout_secs),
        )?)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = FlowunitConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    // Override with CLI args
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json {
        config.logging.json = true;
    }
    init_tracing(&config.logging.level, config.logging.json);

    if let Commands::Config = cli.command {
        return output::print_single(&config).map_err(Into::into);
    }

    let store = build_store(&config.storage).await?;
    let engine = build_engine(&config.engine)?;
    let retry = RetryPolicy::linear(
        config.deployment.max_attempts,
        Duration::from_millis(config.deployment.backoff_ms),
    );
    let mut service = FunctionUnitService::new(store, engine).with_retry_policy(retry);
    if let Some(actor) = &cli.actor {
        service = service.with_actor(actor.clone());
    }

    let format = cli.output;
    match cli.command {
        Commands::Deploy(args) => unit::deploy(&service, args, format).await?,
        Commands::History { name } => unit::history(&service, &name, format).await?,
        Commands::Active { name } => unit::active(&service, &name, format).await?,
        Commands::List => unit::list(&service, format).await?,
        Commands::Rollback { name, version, yes } => {
            rollback::execute(&service, &name, &version, yes, format).await?
        }
        Commands::Start(args) => instance::start(&service, args, format).await?,
        Commands::Check { name } => unit::check(&service, &name).await?,
        Commands::Config => {}
    }
    Ok(())
}
