//! flagctl: operator interface to entity processing flags.

use clap::{Args, Parser, Subcommand};
use flagctx::clock::{Clock, SystemClock};
use flagctx::config::{Config, StageConfig};
use flagctx::db::Db;
use flagctx::model::{EntityId, FlagRecord, FlagState};
use flagctx::store::FlagStore;
use flagctx::telemetry::{TelemetryConfig, init_telemetry};
use flagctx::{Check, FlagContext};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flagctl", about = "Inspect and drive entity processing flags")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Entity operations
    Entity {
        #[command(subcommand)]
        action: EntityAction,
    },
    /// Show every flag on an entity
    Show {
        entity: String,
    },
    /// Drive one stage's flag on an entity
    Flag {
        #[command(flatten)]
        stage: StageArgs,
        #[command(subcommand)]
        action: FlagAction,
    },
}

#[derive(Subcommand)]
enum EntityAction {
    /// Register an entity (random ID if none given)
    Create { id: Option<String> },
}

#[derive(Args)]
struct StageArgs {
    /// TOML file with a [stage] table
    #[arg(long, conflicts_with_all = ["key", "stage_version"])]
    stage_file: Option<PathBuf>,
    /// Stage key
    #[arg(long)]
    key: Option<String>,
    /// Stage version
    #[arg(long = "stage-version", default_value = "0.0.0")]
    stage_version: String,
}

#[derive(Subcommand)]
enum FlagAction {
    /// Mark the stage as pending pickup
    Queue { entity: String },
    /// Mark the stage as started (restarts an existing flag)
    Start { entity: String },
    /// Mark the stage as finished
    End {
        entity: String,
        /// JSON object stored as the flag's state
        #[arg(long)]
        state: Option<String>,
        /// Succeed even if the stage never started
        #[arg(long)]
        no_check: bool,
    },
    /// Mark the stage as failed
    Error {
        entity: String,
        #[arg(long)]
        no_check: bool,
    },
    /// Mark the flag for re-processing
    Reset { entity: String },
    /// Collapse duplicate flags for the stage
    Dedupe { entity: String },
    /// Report whether the stage started within its tolerance window
    Recent { entity: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "flagctl".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    match cli.command {
        Command::Migrate => {
            db.health_check().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Entity {
            action: EntityAction::Create { id },
        } => cmd_entity_create(&db, id).await,
        Command::Show { entity } => cmd_show(&db, EntityId::new(entity)).await,
        Command::Flag { stage, action } => {
            let stage = resolve_stage(stage, &config)?;
            let ctx = FlagContext::from_stage(Arc::clone(&db), &stage);
            cmd_flag(&ctx, action).await
        }
    }
}

fn resolve_stage(args: StageArgs, config: &Config) -> anyhow::Result<StageConfig> {
    if let Some(path) = args.stage_file {
        return Ok(StageConfig::load(&path)?);
    }
    let Some(key) = args.key else {
        anyhow::bail!("either --stage-file or --key is required");
    };
    let mut stage = StageConfig::new(key, args.stage_version).tolerance(config.flag_tolerance);
    if let Some(timeout) = config.store_timeout {
        stage = stage.store_timeout(timeout);
    }
    stage.validate()?;
    Ok(stage)
}

async fn cmd_entity_create(db: &Db, id: Option<String>) -> anyhow::Result<()> {
    let entity = id.map(EntityId::new).unwrap_or_else(EntityId::generate);
    if db.create_entity(&entity).await? {
        println!("Created: {entity}");
    } else {
        println!("Exists:  {entity}");
    }
    Ok(())
}

async fn cmd_show(db: &Db, entity: EntityId) -> anyhow::Result<()> {
    if !db.entity_exists(&entity).await? {
        anyhow::bail!("no entity '{entity}'");
    }
    let flags = db.list_flags(&entity).await?;
    if flags.is_empty() {
        println!("No flags on {entity}.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<10}  {:<8}  {:<6}  {:<20}  {:<20}",
        "KEY", "VERSION", "SUMMARY", "QUEUED", "STARTED", "FINISHED"
    );
    println!("{}", "-".repeat(94));
    for flag in &flags {
        println!(
            "{:<20}  {:<10}  {:<8}  {:<6}  {:<20}  {:<20}",
            flag.key,
            flag.version,
            flag.summary.map(|s| s.to_string()).unwrap_or("-".to_string()),
            flag.queued,
            fmt_time(flag.started),
            finished(flag),
        );
        if let Some(ref state) = flag.state {
            println!(
                "    state (updated {}): {}",
                state.updated.format("%Y-%m-%d %H:%M:%S"),
                serde_json::Value::Object(state.values.clone())
            );
        }
    }
    println!("\n{} flag(s)", flags.len());
    Ok(())
}

async fn cmd_flag<S: FlagStore + ?Sized>(
    ctx: &FlagContext<S>,
    action: FlagAction,
) -> anyhow::Result<()> {
    let (entity, outcome) = match action {
        FlagAction::Queue { entity } => {
            let entity = EntityId::new(entity);
            let outcome = ctx.queue(&entity).await?;
            (entity, outcome)
        }
        FlagAction::Start { entity } => {
            let entity = EntityId::new(entity);
            let outcome = ctx.start(&entity).await?;
            (entity, outcome)
        }
        FlagAction::End {
            entity,
            state,
            no_check,
        } => {
            let entity = EntityId::new(entity);
            let state = match state {
                Some(json) => Some(FlagState::from_value(
                    SystemClock.now(),
                    serde_json::from_str(&json)?,
                )?),
                None => None,
            };
            let outcome = ctx.end(&entity, state, check(no_check)).await?;
            (entity, outcome)
        }
        FlagAction::Error { entity, no_check } => {
            let entity = EntityId::new(entity);
            let outcome = ctx.error(&entity, check(no_check)).await?;
            (entity, outcome)
        }
        FlagAction::Reset { entity } => {
            let entity = EntityId::new(entity);
            let outcome = ctx.reset(&entity).await?;
            (entity, outcome)
        }
        FlagAction::Dedupe { entity } => {
            let entity = EntityId::new(entity);
            let outcome = ctx.dedupe(&entity).await?;
            (entity, outcome)
        }
        FlagAction::Recent { entity } => {
            let entity = EntityId::new(entity);
            let recent = ctx.is_run_recently(&entity).await?;
            println!(
                "{} on {entity}: {}",
                ctx.key(),
                if recent { "ran recently" } else { "not recent" }
            );
            return Ok(());
        }
    };

    println!("{} on {entity}: {outcome}", ctx.key());
    Ok(())
}

fn check(no_check: bool) -> Check {
    if no_check { Check::Skip } else { Check::Required }
}

fn fmt_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or("-".to_string())
}

fn finished(flag: &FlagRecord) -> String {
    match (flag.ended, flag.errored, flag.reset) {
        (Some(t), _, _) => format!("ended {}", t.format("%m-%d %H:%M")),
        (_, Some(t), _) => format!("errored {}", t.format("%m-%d %H:%M")),
        (_, _, Some(t)) => format!("reset {}", t.format("%m-%d %H:%M")),
        _ => "-".to_string(),
    }
}
