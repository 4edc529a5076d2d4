//! CLI command definitions for milestone-flow.
//!
//! `serve` runs the HTTP ingress and all five stage pipelines in one
//! process. The remaining subcommands are one-shot operator actions against
//! the same database.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::ConfigError;
use crate::metrics::init_metrics;
use crate::milestone::{Claimant, Milestone};
use crate::pipeline::{PipelineConfig, PipelineDefinition, SimulatedWork, Stage, StageWork};
use crate::scheduler::PipelineRunner;
use crate::server::{self, AppState};
use crate::storage::{MilestoneStore, PgClient, PgMilestoneStore, PoolSettings};

/// Default address for the HTTP ingress.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Distributed milestone pipeline worker.
#[derive(Parser)]
#[command(name = "milestone-flow")]
#[command(about = "Advance milestones through ingest, transcode, metadata, assemble and publish")]
#[command(version)]
#[command(
    long_about = "milestone-flow moves milestones through a fixed five-stage pipeline.\n\nWorkers coordinate only through the milestones table: polling reads go to read replicas, claims and results go to the primary.\n\nExample usage:\n  milestone-flow serve --primary-db-url postgres://primary/media --replica-db-urls postgres://r1/media,postgres://r2/media"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP ingress and every stage poller and scheduler.
    Serve(ServeArgs),

    /// Create the milestones table and indexes.
    Migrate(DatabaseArgs),

    /// Create one milestone and print its id.
    Create(DatabaseArgs),

    /// Print one milestone as JSON.
    Show(ShowArgs),

    /// Mark a stage as overridden by an operator.
    Override(OverrideArgs),

    /// Return a failed stage to pending with its retries reset.
    Requeue(RequeueArgs),
}

/// Connection settings shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Primary database connection string.
    #[arg(long, env = "PRIMARY_DB_URL", hide_env_values = true)]
    pub primary_db_url: String,

    /// Comma-separated read replica connection strings.
    #[arg(
        long,
        env = "REPLICA_DB_URLS",
        value_delimiter = ',',
        required = true,
        hide_env_values = true
    )]
    pub replica_db_urls: Vec<String>,

    /// Maximum connections per pool.
    #[arg(long, default_value = "60")]
    pub max_connections: u32,
}

impl DatabaseArgs {
    fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            min_connections: PoolSettings::default()
                .min_connections
                .min(self.max_connections),
            ..PoolSettings::default()
        }
    }

    async fn connect(&self) -> anyhow::Result<PgClient> {
        let replicas: Vec<String> = self
            .replica_db_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if replicas.is_empty() {
            return Err(ConfigError::Missing("REPLICA_DB_URLS".to_string()).into());
        }

        PgClient::connect(&self.primary_db_url, &replicas, &self.pool_settings())
            .await
            .context("Failed to connect to the database")
    }
}

/// Arguments for `milestone-flow serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Address for the HTTP ingress.
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Seconds between poll cycles.
    #[arg(long, default_value = "5")]
    pub poll_interval_secs: u64,

    /// Failed executions allowed before a stage is dead-lettered.
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Concurrent executions per stage (0 for unbounded).
    #[arg(long, default_value = "64")]
    pub max_in_flight: usize,

    /// Probability that a simulated stage execution fails.
    #[arg(long, default_value = "0.2")]
    pub failure_rate: f64,

    /// Apply the schema before starting.
    #[arg(long)]
    pub migrate: bool,
}

impl ServeArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        let interval = Duration::from_secs(self.poll_interval_secs);
        PipelineConfig::new()
            .with_poll_interval(interval)
            .with_max_retries(self.max_retries)
            .with_max_in_flight((self.max_in_flight > 0).then_some(self.max_in_flight))
    }
}

/// Arguments for `milestone-flow show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Milestone id.
    pub id: String,
}

/// Arguments for `milestone-flow override`.
#[derive(Parser, Debug)]
pub struct OverrideArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Stage to override (ingest, transcode, metadata_gen, assemble, publish).
    pub stage: Stage,

    /// Milestone id.
    pub id: String,

    /// Operator recorded in `overridden_by`.
    #[arg(long, env = "USER")]
    pub operator: String,
}

/// Arguments for `milestone-flow requeue`.
#[derive(Parser, Debug)]
pub struct RequeueArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Stage to requeue.
    pub stage: Stage,

    /// Milestone id.
    pub id: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Migrate(args) => run_migrate_command(args).await,
        Commands::Create(args) => run_create_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::Override(args) => run_override_command(args).await,
        Commands::Requeue(args) => run_requeue_command(args).await,
    }
}

// ============================================================================
// Serve
// ============================================================================

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.pipeline_config();
    config.validate().context("Invalid pipeline configuration")?;
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!("--failure-rate must be between 0 and 1, got {}", args.failure_rate);
    }

    init_metrics().context("Failed to initialize metrics")?;

    let client = Arc::new(args.db.connect().await?);
    if args.migrate {
        let applied = client
            .run_migrations()
            .await
            .context("Failed to apply migrations")?;
        info!(applied = applied, "Schema migrations applied");
    }

    let store: Arc<dyn MilestoneStore> = Arc::new(PgMilestoneStore::new(Arc::clone(&client)));
    let claimant = Claimant::current();
    let failure_rate = args.failure_rate;

    let mut runner = PipelineRunner::new(
        &PipelineDefinition::standard(),
        Arc::clone(&store),
        config,
        claimant.clone(),
        |stage| {
            let latency = SimulatedWork::for_stage(stage).max_latency();
            Arc::new(SimulatedWork::new(latency, failure_rate)) as Arc<dyn StageWork>
        },
    )?;
    let cancel = runner.cancellation_token();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    runner.start()?;
    info!(
        host = %claimant.host,
        pid = claimant.process_id,
        replicas = client.replica_count(),
        "Worker started"
    );

    let mut server = tokio::spawn(server::serve(
        listener,
        AppState::new(store, claimant),
        cancel.clone(),
    ));

    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            cancel.cancel();
            (&mut server).await
        }
        result = &mut server => {
            error!("HTTP server exited unexpectedly");
            result
        }
    };

    runner.shutdown().await?;
    for stats in runner.stats() {
        info!(
            stage = %stats.stage,
            completed = stats.completed,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            claim_lost = stats.claim_lost,
            errors = stats.errors,
            "Stage summary"
        );
    }
    client.close().await;

    server_result
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;
    Ok(())
}

// ============================================================================
// Operator commands
// ============================================================================

async fn run_migrate_command(args: DatabaseArgs) -> anyhow::Result<()> {
    let client = args.connect().await?;
    let applied = client
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    client.close().await;

    println!("Applied {} schema statements", applied);
    Ok(())
}

async fn run_create_command(args: DatabaseArgs) -> anyhow::Result<()> {
    let client = Arc::new(args.connect().await?);
    let store = PgMilestoneStore::new(Arc::clone(&client));

    let milestone = Milestone::new(Claimant::current());
    store
        .insert(&milestone)
        .await
        .context("Failed to create milestone")?;
    client.close().await;

    println!("{}", milestone.id);
    Ok(())
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let client = Arc::new(args.db.connect().await?);
    let store = PgMilestoneStore::new(Arc::clone(&client));

    let milestone = store
        .fetch(&args.id)
        .await
        .with_context(|| format!("Failed to read milestone {}", args.id))?;
    client.close().await;

    let Some(milestone) = milestone else {
        bail!("Milestone {} not found", args.id);
    };
    println!("{}", serde_json::to_string_pretty(&milestone)?);
    Ok(())
}

async fn run_override_command(args: OverrideArgs) -> anyhow::Result<()> {
    if args.operator.trim().is_empty() {
        bail!("--operator must not be empty");
    }

    let client = Arc::new(args.db.connect().await?);
    let store = PgMilestoneStore::new(Arc::clone(&client));

    store
        .override_stage(args.stage, &args.id, &args.operator)
        .await
        .with_context(|| format!("Failed to override {} of {}", args.stage, args.id))?;
    client.close().await;

    info!(stage = %args.stage, milestone_id = %args.id, operator = %args.operator, "Stage overridden");
    println!("{} {} overridden by {}", args.id, args.stage, args.operator);
    Ok(())
}

async fn run_requeue_command(args: RequeueArgs) -> anyhow::Result<()> {
    let client = Arc::new(args.db.connect().await?);
    let store = PgMilestoneStore::new(Arc::clone(&client));

    store
        .requeue_stage(args.stage, &args.id)
        .await
        .with_context(|| format!("Failed to requeue {} of {}", args.stage, args.id))?;
    client.close().await;

    info!(stage = %args.stage, milestone_id = %args.id, "Stage requeued");
    println!("{} {} requeued", args.id, args.stage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const DB_FLAGS: [&str; 4] = [
        "--primary-db-url",
        "postgres://primary/media",
        "--replica-db-urls",
        "postgres://r1/media,postgres://r2/media",
    ];

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["milestone-flow"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&DB_FLAGS);
        Cli::try_parse_from(argv).expect("should parse")
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = parse(&["serve"]);
        assert_eq!(cli.log_level, "info");

        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.db.primary_db_url, "postgres://primary/media");
                assert_eq!(
                    args.db.replica_db_urls,
                    vec!["postgres://r1/media", "postgres://r2/media"]
                );
                assert_eq!(args.poll_interval_secs, 5);
                assert_eq!(args.max_retries, 3);
                assert!(!args.migrate);

                let config = args.pipeline_config();
                assert_eq!(config.poll_interval, Duration::from_secs(5));
                assert_eq!(config.max_retries, 3);
                assert_eq!(config.max_in_flight, Some(64));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_unbounded_fan_out() {
        let cli = parse(&["serve", "--max-in-flight", "0", "--migrate"]);
        match cli.command {
            Commands::Serve(args) => {
                assert!(args.migrate);
                assert_eq!(args.pipeline_config().max_in_flight, None);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_override_parses_stage() {
        let cli = parse(&["override", "metadata_gen", "m-1", "--operator", "ops"]);
        match cli.command {
            Commands::Override(args) => {
                assert_eq!(args.stage, Stage::MetadataGen);
                assert_eq!(args.id, "m-1");
                assert_eq!(args.operator, "ops");
            }
            _ => panic!("Expected Override command"),
        }
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let mut argv = vec!["milestone-flow", "requeue", "encode", "m-1"];
        argv.extend_from_slice(&DB_FLAGS);
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_pool_settings_follow_max_connections() {
        let cli = parse(&["migrate", "--max-connections", "4"]);
        match cli.command {
            Commands::Migrate(db) => {
                let settings = db.pool_settings();
                assert_eq!(settings.max_connections, 4);
                assert_eq!(settings.min_connections, 4);
            }
            _ => panic!("Expected Migrate command"),
        }
    }
}
