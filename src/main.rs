//! # Plansync Entry Point
//!
//! `plansync serve` (default) runs the HTTP API, `plansync migrate` applies
//! pending migrations and `plansync sweep` syncs every active connection once.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use plansync::{
    config::ConfigLoader,
    db::init_pool,
    migration::{Migrator, MigratorTrait},
    server::run_server,
    sync::{ExecutionDeadline, PlanSyncCoordinator, SyncServices, TenantSweeper},
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "plansync", version, about = "Upstream planning data sync service")]
struct Cli {
    /// Apply pending migrations before running the command
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Run a resumable plan sync for every active connection and exit
    Sweep {
        /// Override the incremental lookback window, in days
        #[arg(long)]
        lookback_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    let command = cli.command.unwrap_or(Commands::Serve);

    if cli.migrate || matches!(command, Commands::Migrate) {
        Migrator::up(&db, None).await?;
        tracing::info!("Migrations applied");
    }

    match command {
        Commands::Migrate => Ok(()),
        Commands::Serve => run_server(config, db, CancellationToken::new()).await,
        Commands::Sweep { lookback_days } => {
            let budget = config.sync.run_budget();
            let services = SyncServices::from_config(&config, Arc::new(db))?;
            let sweeper = TenantSweeper::new(PlanSyncCoordinator::new(services));

            let results = sweeper
                .run(lookback_days, Arc::new(ExecutionDeadline::start(budget)))
                .await?;

            println!("{}", serde_json::to_string_pretty(&results)?);
            if results.failed > 0 {
                anyhow::bail!("{} of {} tenants failed", results.failed, results.connections);
            }
            Ok(())
        }
    }
}
