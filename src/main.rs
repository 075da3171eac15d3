use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use configuration::{load_config, Config};
use core_types::{NewStrategy, RiskState, StageName};
use database::{connect, run_migrations, DbRepository, KlineStore, StrategyStore};
use engine::{Backpressure, RunPlan, Supervisor};
use events::EventBus;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;
use web_server::{AppState, PipelineSnapshot, StrategyDetail};

/// The main entry point for the Gauntlet strategy pipeline.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine when the variables are exported directly.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let _log_guard = configuration::init_tracing(&config.logging).context("initialising logging")?;

    let pool = connect(&config.database).await.context("connecting to the database")?;
    let repo = Arc::new(DbRepository::new(pool.clone()));

    match cli.command {
        Commands::Migrate => {
            run_migrations(&pool).await.context("running migrations")?;
            tracing::info!("Migrations applied");
        }
        Commands::Run { no_server } => {
            let with_server = config.server.enabled && !no_server;
            run_pipeline(config, repo, RunPlan::all(), with_server).await?;
        }
        Commands::Stage { stage } => run_pipeline(config, repo, RunPlan::stage(stage.into()), false).await?,
        Commands::Rotate => run_pipeline(config, repo, RunPlan::rotator_only(), false).await?,
        Commands::Submit { file } => handle_submit(&config, repo, &file).await?,
        Commands::Status => handle_status(repo.as_ref()).await?,
        Commands::Show { id } => handle_show(repo.as_ref(), id).await?,
        Commands::Risk { action } => handle_risk(repo.as_ref(), action).await?,
        Commands::Score { id, score } => {
            repo.record_rolling_score(id, score).await.with_context(|| format!("{id} is not in the pool"))?;
            tracing::info!(%id, score, "Rolling score recorded");
        }
        Commands::Serve => {
            let shutdown = shutdown_signal();
            serve(&config, repo, EventBus::default(), shutdown).await?;
        }
    }
    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Evaluation and promotion pipeline for generated trading strategies.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration. Missing means defaults plus environment.
    #[arg(long, short, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database migrations.
    Migrate,
    /// Run every stage worker and the rotator in this process.
    Run {
        /// Do not start the HTTP server even if `server.enabled` is set.
        #[arg(long)]
        no_server: bool,
    },
    /// Run a single stage's workers in this process.
    Stage {
        #[arg(value_enum)]
        stage: StageArg,
    },
    /// Run only the pool rotator.
    Rotate,
    /// Insert strategies from a JSON file (one object or an array).
    Submit { file: PathBuf },
    /// Print queue depths, the pool and the risk flags.
    Status,
    /// Print one strategy and its status history.
    Show { id: Uuid },
    /// Set or clear the process-wide risk flags.
    Risk {
        #[command(subcommand)]
        action: RiskAction,
    },
    /// Report the rolling live score of an ACTIVE or LIVE strategy.
    Score {
        id: Uuid,
        #[arg(allow_negative_numbers = true)]
        score: f64,
    },
    /// Serve the read-only HTTP API.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Validator,
    Is,
    Oos,
    Scorer,
}

impl From<StageArg> for StageName {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Validator => StageName::Validator,
            StageArg::Is => StageName::InSample,
            StageArg::Oos => StageName::OutOfSample,
            StageArg::Scorer => StageName::Scorer,
        }
    }
}

#[derive(Subcommand)]
enum RiskAction {
    /// Engage the emergency stop. No strategy is promoted until it is cleared.
    Stop {
        #[arg(long)]
        reason: Option<String>,
        /// Also start a cooldown of this many minutes from now. A later `risk clear`
        /// replaces it.
        #[arg(long)]
        cooldown_minutes: Option<i64>,
    },
    /// Clear the emergency stop, optionally starting a cooldown.
    Clear {
        #[arg(long)]
        cooldown_minutes: Option<i64>,
    },
}

// ==============================================================================
// Long-running commands
// ==============================================================================

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested, finishing in-flight work"),
            Err(e) => tracing::error!(error = %e, "Could not listen for Ctrl-C, shutting down"),
        }
        let _ = tx.send(true);
    });
    rx
}

async fn run_pipeline(config: Config, repo: Arc<DbRepository>, plan: RunPlan, with_server: bool) -> anyhow::Result<()> {
    let events = EventBus::default();
    let _logger = events::spawn_logger(&events);
    let shutdown = shutdown_signal();

    let store: Arc<dyn StrategyStore> = repo.clone();
    let klines: Arc<dyn KlineStore> = repo.clone();

    let server = if with_server {
        let config = config.clone();
        let events = events.clone();
        let shutdown = shutdown.clone();
        let repo = repo.clone();
        Some(tokio::spawn(async move { serve(&config, repo, events, shutdown).await }))
    } else {
        None
    };

    let supervisor = Supervisor::new(config, store, klines, events);
    supervisor.run(&plan, shutdown).await.context("running the pipeline")?;

    if let Some(server) = server {
        server.await.context("joining the web server")??;
    }
    Ok(())
}

async fn serve(
    config: &Config,
    repo: Arc<DbRepository>,
    events: EventBus,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr =
        config.server.bind.parse().with_context(|| format!("server.bind '{}' is not an address", config.server.bind))?;
    let state = AppState { store: repo, events };
    web_server::run_server(addr, state, shutdown).await.context("serving HTTP")?;
    Ok(())
}

// ==============================================================================
// One-shot commands
// ==============================================================================

async fn handle_submit(config: &Config, repo: Arc<DbRepository>, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).context("parsing the submission as JSON")?;
    let submissions: Vec<NewStrategy> = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|one| vec![one])
    }
    .context("decoding strategies")?;

    for new in submissions {
        let record = repo.insert_strategy(new).await.context("inserting strategy")?;
        println!("{}  {}  {}", record.id, record.timeframe, record.status);
    }

    let backpressure = Backpressure::new(repo, EventBus::default(), config.backpressure.clone());
    if backpressure.evaluate().await.context("evaluating backpressure")? {
        println!("Generation is paused: the GENERATED queue is above its high watermark.");
    }
    Ok(())
}

async fn handle_status(store: &dyn StrategyStore) -> anyhow::Result<()> {
    let snapshot = PipelineSnapshot::collect(store).await.context("reading pipeline state")?;

    let mut queues = Table::new();
    queues.load_preset(UTF8_FULL).set_header(vec!["Status", "Strategies"]);
    for (status, depth) in &snapshot.queue_depths {
        queues.add_row(vec![status.to_string(), depth.to_string()]);
    }
    println!("{queues}");

    let mut slots = Table::new();
    slots.load_preset(UTF8_FULL).set_header(vec!["Slot", "Account", "Strategy", "Since"]);
    for slot in &snapshot.slots {
        slots.add_row(vec![
            slot.slot_id.to_string(),
            slot.account.clone(),
            slot.strategy_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            slot.assigned_at.map(|at| at.to_rfc3339()).unwrap_or_else(|| "-".into()),
        ]);
    }
    println!("{slots}");

    println!(
        "Pool: {} members, {} live, average score {:.4}",
        snapshot.pool.size, snapshot.pool.live, snapshot.pool.average_score
    );
    println!("Generation paused: {}", snapshot.generation_paused);
    let cooldown = snapshot.risk.cooldown_until.map(|at| at.to_rfc3339()).unwrap_or_else(|| "-".into());
    println!("Emergency stop: {}  cooldown until: {}", snapshot.risk.emergency_stop, cooldown);
    Ok(())
}

async fn handle_show(store: &dyn StrategyStore, id: Uuid) -> anyhow::Result<()> {
    let detail = StrategyDetail::collect(store, id).await.with_context(|| format!("loading strategy {id}"))?;
    println!("{}", serde_json::to_string_pretty(&detail.strategy)?);

    let mut history = Table::new();
    history.load_preset(UTF8_FULL).set_header(vec!["At", "From", "To", "Actor", "Reason"]);
    for transition in &detail.history {
        history.add_row(vec![
            transition.at.to_rfc3339(),
            transition.from_status.to_string(),
            transition.to_status.to_string(),
            transition.actor.clone(),
            transition.reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{history}");
    Ok(())
}

async fn handle_risk(store: &dyn StrategyStore, action: RiskAction) -> anyhow::Result<()> {
    let state = risk_state_for(action, Utc::now());
    store.set_risk_state(&state).await.context("writing risk state")?;
    tracing::warn!(emergency_stop = state.emergency_stop, cooldown_until = ?state.cooldown_until, "Risk state updated");
    println!("Emergency stop: {}", state.emergency_stop);
    Ok(())
}

/// The full risk state an operator action writes. Cooldowns run from `now`.
fn risk_state_for(action: RiskAction, now: DateTime<Utc>) -> RiskState {
    let cooldown = |minutes: Option<i64>| minutes.filter(|m| *m > 0).map(|m| now + ChronoDuration::minutes(m));
    match action {
        RiskAction::Stop { reason, cooldown_minutes } => RiskState {
            emergency_stop: true,
            cooldown_until: cooldown(cooldown_minutes),
            reason: Some(reason.unwrap_or_else(|| "operator stop".into())),
            updated_at: Some(now),
        },
        RiskAction::Clear { cooldown_minutes } => RiskState {
            emergency_stop: false,
            cooldown_until: cooldown(cooldown_minutes),
            reason: None,
            updated_at: Some(now),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stop_cooldown_runs_from_the_stop_and_clear_replaces_it() {
        let stopped_at = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let stop = risk_state_for(RiskAction::Stop { reason: None, cooldown_minutes: Some(30) }, stopped_at);
        assert!(stop.emergency_stop);
        assert_eq!(stop.cooldown_until, Some(stopped_at + ChronoDuration::minutes(30)));
        assert_eq!(stop.reason.as_deref(), Some("operator stop"));

        let cleared_at = stopped_at + ChronoDuration::minutes(10);
        let clear = risk_state_for(RiskAction::Clear { cooldown_minutes: None }, cleared_at);
        assert!(!clear.emergency_stop);
        assert_eq!(clear.cooldown_until, None);
        assert!(!clear.promotions_suppressed(cleared_at));
    }

    #[test]
    fn score_command_accepts_negative_scores() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["gauntlet", "score", &id.to_string(), "-0.25"]).unwrap();
        assert!(matches!(cli.command, Commands::Score { id: parsed, score } if parsed == id && score == -0.25));
    }
}
