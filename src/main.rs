use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use statusflow::config::{config, init_config, StatusFlowConfig};
use statusflow::observability::{engine_metrics, OperationTimer};
use statusflow::repository::WorkflowRepository;
use statusflow::telemetry::init_telemetry;
use statusflow::workflows::actions::redacted_config;
use statusflow::workflows::{ChainReport, StepOutcome};

#[derive(Parser)]
#[command(name = "statusflow")]
#[command(about = "Status-transition workflow engine for event applications")]
#[command(long_about = "statusflow moves applications between statuses and runs the robots and \
                       triggers configured for the new status: chained status moves, Telegram \
                       notifications and conditional actions.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and apply pending migrations
    Migrate,
    /// Move an application to a status and run that status's chain
    Transition {
        /// Application id
        #[arg(long)]
        application: i64,
        /// Target status name
        #[arg(long)]
        status: String,
    },
    /// Print the function chain configured for a status
    Chain {
        /// Status name
        #[arg(long)]
        status: String,
        /// Restrict to one event
        #[arg(long)]
        event: Option<i64>,
    },
    /// Print the ordered statuses of an event
    Statuses {
        /// Event id
        #[arg(long)]
        event: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = config()?;
    init_telemetry(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    init_config()?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Migrate => migrate_command(settings).await,
            Commands::Transition {
                application,
                status,
            } => transition_command(settings, application, &status).await,
            Commands::Chain { status, event } => chain_command(settings, &status, event).await,
            Commands::Statuses { event } => statuses_command(settings, event).await,
        }
    });

    if settings.observability.metrics_enabled {
        engine_metrics().log_stats();
    }
    result
}

#[cfg(feature = "database")]
async fn open_database(
    settings: &StatusFlowConfig,
) -> Result<statusflow::database::DatabaseManager> {
    let Some(database) = &settings.database else {
        bail!("No [database] section configured");
    };
    if let Some(dir) = database
        .url
        .strip_prefix("sqlite://")
        .and_then(|path| std::path::Path::new(path).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir)?;
    }
    statusflow::database::DatabaseManager::from_config(database).await
}

#[cfg(feature = "database")]
async fn open_repository(
    settings: &StatusFlowConfig,
) -> Result<Arc<dyn WorkflowRepository>> {
    let manager = open_database(settings).await?;
    Ok(Arc::new(statusflow::repository::SqliteRepository::from_manager(&manager)))
}

#[cfg(not(feature = "database"))]
async fn open_repository(
    _settings: &StatusFlowConfig,
) -> Result<Arc<dyn WorkflowRepository>> {
    bail!("statusflow was built without the `database` feature")
}

#[cfg(feature = "database")]
async fn migrate_command(settings: &StatusFlowConfig) -> Result<()> {
    let manager = open_database(settings).await?;
    statusflow::database::DatabaseManager::migrate(manager.pool()).await?;
    manager.shutdown().await;
    println!("✅ Database is up to date");
    Ok(())
}

#[cfg(not(feature = "database"))]
async fn migrate_command(_settings: &StatusFlowConfig) -> Result<()> {
    bail!("statusflow was built without the `database` feature")
}

async fn transition_command(
    settings: &StatusFlowConfig,
    application: i64,
    status: &str,
) -> Result<()> {
    let timer = OperationTimer::new("transition");
    let repository = open_repository(settings).await?;
    let gateway = Arc::new(statusflow::TelegramGateway::from_config(
        &settings.notifications,
    )?);
    let engine = statusflow::StateMachine::with_settings(
        repository,
        gateway,
        settings.engine_settings(),
    );

    let outcome = engine.transition_detailed(application, status).await;
    timer.finish();

    match outcome {
        Ok(done) => {
            println!(
                "✅ Application {}: '{}' → '{}'",
                application, done.previous_status.name, done.application.status.name
            );
            println!("   correlation id: {}", done.correlation_id);
            if let Some(reason) = &done.chain.resolution_error {
                println!("   ⚠️  chain not loaded: {}", reason);
            } else if done.chain.is_empty() {
                println!("   (no chain configured)");
            } else {
                print_report(&done.chain, 1);
            }
            Ok(())
        }
        Err(e) => bail!("Transition failed: {}", e),
    }
}

fn print_report(report: &ChainReport, indent: usize) {
    let pad = "   ".repeat(indent);
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Moved { status, chain } => {
                println!("{}↪️  {} moved to '{}'", pad, step.label, status);
                print_report(chain, indent + 1);
            }
            StepOutcome::Notified { message_id } => {
                println!("{}📨 {} sent message {}", pad, step.label, message_id);
            }
            StepOutcome::ConditionMet { actions } => {
                println!("{}🟢 {} condition met", pad, step.label);
                print_report(actions, indent + 1);
            }
            StepOutcome::ConditionNotMet => {
                println!("{}⚪ {} condition not met", pad, step.label);
            }
            StepOutcome::Skipped { reason } => {
                println!("{}⏭️  {} skipped: {}", pad, step.label, reason);
            }
            StepOutcome::Failed(e) => {
                println!("{}❌ {} failed: {}", pad, step.label, e);
            }
        }
    }
}

async fn chain_command(settings: &StatusFlowConfig, status: &str, event: Option<i64>) -> Result<()> {
    let repository = open_repository(settings).await?;
    let Some(found) = repository.find_status(status).await? else {
        bail!("Status '{}' does not exist", status);
    };

    let steps = repository.resolve_chain(found.id, event).await?;
    println!("🔗 Chain for '{}' ({} step(s))", found.name, steps.len());
    for step in &steps {
        let state = if step.template.is_active() { "" } else { " (inactive)" };
        println!("   {}{} {}", step.label(), state, redacted_config(&step.config));
    }
    Ok(())
}

async fn statuses_command(settings: &StatusFlowConfig, event: i64) -> Result<()> {
    let repository = open_repository(settings).await?;
    let statuses = repository.list_statuses(event).await?;
    println!("📋 Statuses of event {}", event);
    for entry in &statuses {
        let polarity = if entry.status.is_positive { "+" } else { "-" };
        println!("   {}. {} [{}]", entry.order.position, entry.status.name, polarity);
    }
    Ok(())
}
