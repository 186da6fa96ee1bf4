//! Command-line interface for the process manager.
//!
//! Provides commands for synchronizing descriptions, starting, scheduling
//! and canceling instances, running the recurring planner and searching
//! persisted instances.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::OutboxSubstrate;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    DescriptionSynchronizer, OrchestrationInstanceManager, OrchestrationInstanceQueries,
    RecurringPlanner, SynchronizationState, SystemClock,
};
use crate::domain::{
    Actor, ActorMessageId, ActorRole, IdempotencyKey, MessageCorrelation, MeteringPointId,
    OperatingIdentity, OrchestrationDescriptionUniqueName, OrchestrationInstanceId,
    OrchestrationInstanceLifecycleState, OrchestrationInstanceTerminationState, TransactionId,
    DATAHUB_ACTOR_NUMBER,
};
use crate::persistence::{OrchestrationInstanceFilter, OrchestrationRepository, SqliteRepository};
use crate::processes;

/// processmanager - Orchestration instance lifecycle and scheduling engine
#[derive(Parser, Debug)]
#[command(name = "processmanager")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize this host's descriptions with the database
    Sync,

    /// Synchronize and report readiness (exit code 1 when not ready)
    Ready,

    /// List persisted descriptions
    Descriptions,

    /// Start a new instance immediately
    Start {
        /// Description unique name, e.g. Brs_023_027_v1
        #[arg(value_parser = parse_unique_name)]
        unique_name: OrchestrationDescriptionUniqueName,

        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        message: MessageArgs,
    },

    /// Schedule a new instance to run later
    Schedule {
        /// Description unique name, e.g. Brs_023_027_v1
        #[arg(value_parser = parse_unique_name)]
        unique_name: OrchestrationDescriptionUniqueName,

        /// RFC 3339 run time
        #[arg(long)]
        run_at: DateTime<Utc>,

        #[command(flatten)]
        input: InputArgs,
    },

    /// Cancel a scheduled instance
    Cancel {
        /// Instance ID (UUID)
        instance_id: String,

        /// User performing the cancellation
        #[arg(long)]
        user: Option<Uuid>,
    },

    /// Plan recurring instances for the look-ahead window
    Plan,

    /// Hand due scheduled instances to the execution substrate
    Activate,

    /// Search instances
    Search {
        /// Description name
        #[arg(long)]
        name: Option<String>,

        /// Description version
        #[arg(long)]
        version: Option<u32>,

        /// Lifecycle state (pending, queued, scheduled, running, terminated)
        #[arg(long, value_parser = parse_lifecycle_state)]
        state: Option<OrchestrationInstanceLifecycleState>,

        /// Termination state (succeeded, failed, user_canceled)
        #[arg(long, value_parser = parse_termination_state)]
        outcome: Option<OrchestrationInstanceTerminationState>,

        /// Started at or after (RFC 3339)
        #[arg(long)]
        started_after: Option<DateTime<Utc>>,

        /// Terminated at or before (RFC 3339)
        #[arg(long)]
        terminated_before: Option<DateTime<Utc>>,

        /// Scheduled at or after (RFC 3339)
        #[arg(long)]
        scheduled_after: Option<DateTime<Utc>>,
    },

    /// Show an instance as JSON
    Show {
        /// Instance ID (UUID)
        instance_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Instance input and creator
#[derive(clap::Args, Debug)]
pub struct InputArgs {
    /// Input as inline JSON
    #[arg(long, conflicts_with = "input_file")]
    input: Option<String>,

    /// Input JSON file
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Step sequences to skip (defaults to the process module's decision)
    #[arg(long = "skip", value_delimiter = ',')]
    skip: Option<Vec<u32>>,

    /// User creating the instance; the system identity when absent
    #[arg(long)]
    user: Option<Uuid>,
}

/// Correlation of a message-driven start
#[derive(clap::Args, Debug)]
pub struct MessageArgs {
    /// Idempotency key of the triggering message
    #[arg(long, requires_all = ["actor_message_id", "transaction_id"])]
    idempotency_key: Option<String>,

    #[arg(long)]
    actor_message_id: Option<String>,

    #[arg(long)]
    transaction_id: Option<String>,

    #[arg(long)]
    metering_point_id: Option<String>,
}

impl MessageArgs {
    fn correlation(self) -> Option<MessageCorrelation> {
        Some(MessageCorrelation {
            idempotency_key: IdempotencyKey::new(self.idempotency_key?),
            actor_message_id: ActorMessageId::new(self.actor_message_id?),
            transaction_id: TransactionId::new(self.transaction_id?),
            metering_point_id: self.metering_point_id.map(MeteringPointId::new),
        })
    }
}

fn parse_unique_name(value: &str) -> std::result::Result<OrchestrationDescriptionUniqueName, String> {
    OrchestrationDescriptionUniqueName::parse(value)
        .ok_or_else(|| format!("expected <name>_v<version>, got '{}'", value))
}

fn parse_lifecycle_state(
    value: &str,
) -> std::result::Result<OrchestrationInstanceLifecycleState, String> {
    OrchestrationInstanceLifecycleState::parse(value)
        .ok_or_else(|| format!("unknown lifecycle state '{}'", value))
}

fn parse_termination_state(
    value: &str,
) -> std::result::Result<OrchestrationInstanceTerminationState, String> {
    OrchestrationInstanceTerminationState::parse(value)
        .ok_or_else(|| format!("unknown termination state '{}'", value))
}

fn parse_instance_id(value: &str) -> Result<OrchestrationInstanceId> {
    OrchestrationInstanceId::parse(value)
        .with_context(|| format!("Invalid instance ID: {}", value))
}

fn identity(user: Option<Uuid>) -> OperatingIdentity {
    match user {
        Some(user_id) => OperatingIdentity::user(
            user_id,
            Actor::new(DATAHUB_ACTOR_NUMBER, ActorRole::DataHubAdministrator),
        ),
        None => OperatingIdentity::system(),
    }
}

impl InputArgs {
    fn value(&self) -> Result<Value> {
        if let Some(ref inline) = self.input {
            return serde_json::from_str(inline).context("Failed to parse --input as JSON");
        }
        if let Some(ref path) = self.input_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse input file: {}", path.display()));
        }
        Ok(Value::Null)
    }

    fn skip_steps(
        &self,
        unique_name: &OrchestrationDescriptionUniqueName,
        input: &Value,
    ) -> Vec<u32> {
        self.skip
            .clone()
            .unwrap_or_else(|| processes::skip_steps_for(unique_name, input))
    }
}

/// Engine components wired from the resolved configuration
struct Engine {
    config: &'static ResolvedConfig,
    repository: Arc<dyn OrchestrationRepository>,
}

impl Engine {
    fn open() -> Result<Self> {
        let config = config::config()?;
        std::fs::create_dir_all(&config.home)
            .with_context(|| format!("Failed to create home directory: {}", config.home.display()))?;
        let repository = SqliteRepository::open(&config.database)
            .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
        Ok(Self {
            config,
            repository: Arc::new(repository),
        })
    }

    fn synchronizer(&self) -> DescriptionSynchronizer {
        DescriptionSynchronizer::new(self.repository.clone(), self.config.engine.clone())
    }

    async fn manager(&self) -> Result<OrchestrationInstanceManager> {
        let outbox = OutboxSubstrate::open(self.config.outbox.clone()).await?;
        Ok(OrchestrationInstanceManager::new(
            self.repository.clone(),
            Arc::new(outbox),
            Arc::new(SystemClock),
            self.config.engine.clone(),
        ))
    }

    fn queries(&self) -> OrchestrationInstanceQueries {
        OrchestrationInstanceQueries::new(self.repository.clone())
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sync => synchronize().await,
            Commands::Ready => readiness().await,
            Commands::Descriptions => list_descriptions().await,
            Commands::Start {
                unique_name,
                input,
                message,
            } => start_instance(&unique_name, input, message).await,
            Commands::Schedule {
                unique_name,
                run_at,
                input,
            } => schedule_instance(&unique_name, run_at, input).await,
            Commands::Cancel { instance_id, user } => cancel_instance(&instance_id, user).await,
            Commands::Plan => plan_recurring().await,
            Commands::Activate => activate_due().await,
            Commands::Search {
                name,
                version,
                state,
                outcome,
                started_after,
                terminated_before,
                scheduled_after,
            } => {
                let filter = OrchestrationInstanceFilter {
                    name,
                    version,
                    lifecycle_state: state,
                    termination_state: outcome,
                    started_at_or_later: started_after,
                    terminated_at_or_earlier: terminated_before,
                    scheduled_at_or_later: scheduled_after,
                    scheduled_at_or_earlier: None,
                };
                search_instances(&filter).await
            }
            Commands::Show { instance_id } => show_instance(&instance_id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Synchronize declared descriptions
async fn synchronize() -> Result<()> {
    let engine = Engine::open()?;
    let outcome = engine
        .synchronizer()
        .synchronize(&processes::all_builders())
        .await
        .context("Synchronization failed")?;

    for name in &outcome.inserted {
        println!("inserted   {}", name);
    }
    for name in &outcome.updated {
        println!("updated    {}", name);
    }
    for report in &outcome.overwritten {
        println!("overwritten {}", report);
    }
    for name in &outcome.disabled {
        println!("disabled   {}", name);
    }
    println!("{} unchanged", outcome.unchanged.len());

    Ok(())
}

/// Synchronize and print the readiness report
async fn readiness() -> Result<()> {
    let engine = Engine::open()?;
    let state = SynchronizationState::new();
    // The outcome is recorded in `state`; the report carries any failure.
    let _ = engine
        .synchronizer()
        .synchronize_at_startup(&processes::all_builders(), &state)
        .await;

    let report = state.readiness();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.ready {
        std::process::exit(1);
    }
    Ok(())
}

/// List persisted descriptions
async fn list_descriptions() -> Result<()> {
    let engine = Engine::open()?;
    let descriptions = engine.repository.list_descriptions().await?;

    if descriptions.is_empty() {
        println!("No descriptions found (run `processmanager sync` first)");
        return Ok(());
    }

    println!(
        "{:<48} {:<8} {:<10} {:<9} {:<16}",
        "UNIQUE NAME", "STEPS", "SCHEDULE", "ENABLED", "CRON"
    );
    println!("{}", "-".repeat(95));

    for description in descriptions {
        println!(
            "{:<48} {:<8} {:<10} {:<9} {:<16}",
            description.unique_name().to_string(),
            description.steps().len(),
            description.can_be_scheduled(),
            description.is_enabled(),
            description.recurring_cron_expression().unwrap_or("-"),
        );
    }

    Ok(())
}

/// Start a new instance
async fn start_instance(
    unique_name: &OrchestrationDescriptionUniqueName,
    input: InputArgs,
    message: MessageArgs,
) -> Result<()> {
    let engine = Engine::open()?;
    let manager = engine.manager().await?;
    let value = input.value()?;
    let skip = input.skip_steps(unique_name, &value);
    let identity = identity(input.user);

    let id = match message.correlation() {
        Some(correlation) => {
            manager
                .start_new_orchestration_instance_from_message(
                    identity,
                    unique_name,
                    &value,
                    &skip,
                    correlation,
                )
                .await?
        }
        None => {
            manager
                .start_new_orchestration_instance(identity, unique_name, &value, &skip)
                .await?
        }
    };

    println!("{}", id);
    Ok(())
}

/// Schedule a new instance
async fn schedule_instance(
    unique_name: &OrchestrationDescriptionUniqueName,
    run_at: DateTime<Utc>,
    input: InputArgs,
) -> Result<()> {
    let engine = Engine::open()?;
    let manager = engine.manager().await?;
    let value = input.value()?;
    let skip = input.skip_steps(unique_name, &value);

    let id = manager
        .schedule_new_orchestration_instance(identity(input.user), unique_name, &value, run_at, &skip)
        .await?;

    println!("{}", id);
    Ok(())
}

/// Cancel a scheduled instance
async fn cancel_instance(instance_id: &str, user: Option<Uuid>) -> Result<()> {
    let instance_id = parse_instance_id(instance_id)?;
    let engine = Engine::open()?;
    engine
        .manager()
        .await?
        .cancel_scheduled_orchestration_instance(identity(user), instance_id)
        .await?;

    eprintln!("[Instance {} canceled]", instance_id);
    Ok(())
}

/// Run the recurring planner once
async fn plan_recurring() -> Result<()> {
    let engine = Engine::open()?;
    let planner = RecurringPlanner::new(engine.repository.clone(), engine.config.engine.clone());
    let outcome = planner.plan(Utc::now()).await?;

    for id in &outcome.created {
        println!("{}", id);
    }
    eprintln!(
        "[{} planned, {} already planned]",
        outcome.created.len(),
        outcome.already_planned
    );
    Ok(())
}

/// Hand due scheduled instances to the substrate
async fn activate_due() -> Result<()> {
    let engine = Engine::open()?;
    let activated = engine
        .manager()
        .await?
        .activate_due_scheduled_instances(Utc::now())
        .await?;

    for id in &activated {
        println!("{}", id);
    }
    eprintln!("[{} handed off]", activated.len());
    Ok(())
}

/// Search instances
async fn search_instances(filter: &OrchestrationInstanceFilter) -> Result<()> {
    let engine = Engine::open()?;
    let instances = engine.queries().search(filter).await?;

    if instances.is_empty() {
        println!("No instances found");
        return Ok(());
    }

    println!(
        "{:<38} {:<40} {:<12} {:<14} {:<25}",
        "INSTANCE ID", "DESCRIPTION", "STATE", "OUTCOME", "RUN AT"
    );
    println!("{}", "-".repeat(130));

    for instance in instances {
        let lifecycle = instance.lifecycle();
        println!(
            "{:<38} {:<40} {:<12} {:<14} {:<25}",
            instance.id().to_string(),
            instance.unique_name().to_string(),
            lifecycle.state().as_str(),
            lifecycle.termination_state().map(|t| t.as_str()).unwrap_or("-"),
            instance
                .run_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}

/// Show one instance
async fn show_instance(instance_id: &str) -> Result<()> {
    let instance_id = parse_instance_id(instance_id)?;
    let engine = Engine::open()?;
    let instance = engine.queries().get_by_id(instance_id).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!("  Outbox:   {}", cfg.outbox.display());
    println!();
    println!("Engine:");
    println!("  Host name:               {}", cfg.engine.host_name);
    println!("  Allow breaking changes:  {}", cfg.engine.allow_breaking_changes);
    println!("  Allow under development: {}", cfg.engine.allow_under_development);
    println!("  Look-ahead:              {}h", cfg.engine.look_ahead_hours);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_arguments_parse() {
        let cli = Cli::try_parse_from([
            "processmanager",
            "start",
            "Brs_023_027_v1",
            "--input",
            "{}",
            "--skip",
            "2,3",
        ])
        .unwrap();

        match cli.command {
            Commands::Start {
                unique_name, input, ..
            } => {
                assert_eq!(unique_name, OrchestrationDescriptionUniqueName::new("Brs_023_027", 1));
                assert_eq!(input.skip, Some(vec![2, 3]));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_unique_name_rejected() {
        assert!(Cli::try_parse_from(["processmanager", "start", "Brs_023_027"]).is_err());
    }

    #[test]
    fn test_partial_correlation_is_ignored() {
        let message = MessageArgs {
            idempotency_key: Some("k1".to_string()),
            actor_message_id: None,
            transaction_id: None,
            metering_point_id: None,
        };
        assert!(message.correlation().is_none());
    }
}
