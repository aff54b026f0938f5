//! SlotForge CLI
//!
//! The `slotforge` command drives staged slot-game runs.
//!
//! ## Commands
//!
//! - `run` / `recon`: start a product or legal-recon run
//! - `status`, `list`, `artifacts`: inspect runs
//! - `review approve|reject`: resolve a pending checkpoint
//! - `resume`, `cancel`: continue or stop a run
//! - `simulate`, `converge`: exercise the math engine directly

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forge_core::{
    converge_with, simulate, ConvergenceTarget, MathError, PayoutModel, PipelineConfig,
    SimulationConfig, SimulationStatistics, TargetRequest, TargetSpec,
};
use forge_pipeline::{
    standard_stages, Pipeline, PipelineMode, Providers, ReconRequest, ReviewDecision, RunReport,
    StageKind,
};
use forge_state::{ArtifactStore, FsStore, KnowledgeStore, RunId, RunRepository, SurrealStore};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "slotforge")]
#[command(author = "SlotForge Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged slot game generation pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Command output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// State directory
    #[arg(long, global = true, env = "SLOTFORGE_STORE", default_value = ".slotforge")]
    store: PathBuf,

    /// Storage backend
    #[arg(long, global = true, value_enum, env = "SLOTFORGE_BACKEND", default_value_t = Backend::Fs)]
    backend: Backend,

    /// TOML pipeline configuration (SLOTFORGE_* variables override it)
    #[arg(long, global = true, env = "SLOTFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// JSON files under the state directory
    Fs,
    /// Embedded SurrealKV database under the state directory
    Surreal,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a product run for a game idea
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Never pause at review checkpoints
        #[arg(long)]
        auto: bool,
    },

    /// Start a legal-recon run for one jurisdiction
    Recon {
        /// Jurisdiction to research, e.g. "North Carolina"
        jurisdiction: String,

        /// Game concept to frame the research around
        #[arg(long)]
        hint: Option<String>,

        /// Never pause at review checkpoints
        #[arg(long)]
        auto: bool,
    },

    /// Show one run
    Status {
        /// Run ID
        run: String,
    },

    /// List every known run
    List,

    /// Resolve the pending review checkpoint of a run
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Continue a run after a restart or review timeout
    Resume {
        /// Run ID
        run: String,
    },

    /// Stop a run
    Cancel {
        /// Run ID
        run: String,
    },

    /// Print the artifacts of a run
    Artifacts {
        /// Run ID
        run: String,

        /// Only this stage, e.g. math_model
        #[arg(long)]
        stage: Option<StageKind>,
    },

    /// Simulate the preset payout model for a target once
    Simulate {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of spins
        #[arg(long, default_value = "200000")]
        trials: u64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Converge the preset payout model on the target RTP
    Converge {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Accept the reviewed output and continue
    Approve {
        /// Run ID
        run: String,

        /// Checkpoint ID (ignored if already resolved)
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Send the reviewed stage back with feedback
    Reject {
        /// Run ID
        run: String,

        /// What the stage should change
        #[arg(short, long)]
        feedback: String,

        /// Checkpoint ID (ignored if already resolved)
        #[arg(long)]
        checkpoint: Option<String>,
    },
}

/// Game idea parameters shared by `run`, `simulate` and `converge`.
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Game theme
    #[arg(long, required_unless_present = "target_file")]
    theme: Option<String>,

    /// JSON file holding a complete target request
    #[arg(long, conflicts_with = "theme")]
    target_file: Option<PathBuf>,

    /// Target market (repeatable)
    #[arg(long = "market")]
    markets: Vec<String>,

    /// low, medium or high (finer tiers such as medium_high are accepted)
    #[arg(long)]
    volatility: Option<String>,

    /// Target RTP in percent
    #[arg(long)]
    rtp: Option<f64>,

    #[arg(long)]
    reels: Option<usize>,

    #[arg(long)]
    rows: Option<usize>,

    /// Pay style, e.g. "243 ways" or "20 lines"
    #[arg(long)]
    pay: Option<String>,

    /// Max win as a multiple of total bet
    #[arg(long)]
    max_win: Option<u32>,

    #[arg(long)]
    art_style: Option<String>,

    /// Requested feature (repeatable), e.g. free_spins
    #[arg(long = "feature")]
    features: Vec<String>,

    /// Competitor title for reference (repeatable)
    #[arg(long = "competitor")]
    competitors: Vec<String>,

    /// Free-form requirements
    #[arg(long)]
    notes: Option<String>,
}

impl TargetArgs {
    fn to_request(&self) -> Result<TargetRequest> {
        let mut req = match (&self.target_file, &self.theme) {
            (Some(path), _) => read_json_file::<TargetRequest>(path)?,
            (None, Some(theme)) => TargetRequest::new(theme.clone()),
            (None, None) => anyhow::bail!("either --theme or --target-file is required"),
        };
        if !self.markets.is_empty() {
            req.target_markets = self.markets.clone();
        }
        if let Some(v) = &self.volatility {
            req.volatility = v.clone();
        }
        if let Some(rtp) = self.rtp {
            req.target_rtp = rtp;
        }
        if let Some(reels) = self.reels {
            req.reels = reels;
        }
        if let Some(rows) = self.rows {
            req.rows = rows;
        }
        if let Some(pay) = &self.pay {
            req.ways_or_lines = pay.clone();
        }
        if let Some(max_win) = self.max_win {
            req.max_win_multiplier = max_win;
        }
        if let Some(style) = &self.art_style {
            req.art_style = style.clone();
        }
        if !self.features.is_empty() {
            req.requested_features = self.features.clone();
        }
        if !self.competitors.is_empty() {
            req.competitor_references = self.competitors.clone();
        }
        if self.notes.is_some() {
            req.special_requirements = self.notes.clone();
        }
        Ok(req)
    }

    fn to_spec(&self, strict: bool) -> Result<TargetSpec> {
        let (spec, warnings) = self
            .to_request()?
            .validate(strict)
            .context("Invalid target")?;
        for w in warnings {
            eprintln!("warning: {w}");
        }
        Ok(spec)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    forge_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let format = cli.format;

    match cli.command {
        Commands::Simulate {
            target,
            trials,
            seed,
        } => cmd_simulate(&target, trials, seed, &config, format).await,
        Commands::Converge { target } => cmd_converge(&target, &config, format).await,
        command => {
            let pipeline = open_pipeline(cli.backend, &cli.store, config).await?;
            dispatch(&pipeline, command, format).await
        }
    }
}

/// Commands that need the stores.

async fn dispatch(pipeline: &Pipeline, command: Commands, format: Format) -> Result<()> {
    match command {
        Commands::Run { target, auto } => cmd_run(pipeline, &target, mode(auto), format).await,
        Commands::Recon {
            jurisdiction,
            hint,
            auto,
        } => cmd_recon(pipeline, jurisdiction, hint, mode(auto), format).await,
        Commands::Status { run } => {
            let report = pipeline.report(&RunId::from(run.as_str())).await?;
            print_report(&report, format)
        }
        Commands::List => cmd_list(pipeline, format).await,
        Commands::Review { action } => cmd_review(pipeline, action, format).await,
        Commands::Resume { run } => {
            let report = pipeline
                .resume(&RunId::from(run.as_str()))
                .await
                .context("Failed to resume run")?;
            print_report(&report, format)
        }
        Commands::Cancel { run } => {
            let report = pipeline
                .cancel(&RunId::from(run.as_str()))
                .await
                .context("Failed to cancel run")?;
            print_report(&report, format)
        }
        Commands::Artifacts { run, stage } => cmd_artifacts(pipeline, &run, stage, format).await,
        Commands::Simulate {
            target,
            trials,
            seed,
        } => cmd_simulate(&target, trials, seed, pipeline.config(), format).await,
        Commands::Converge { target } => cmd_converge(&target, pipeline.config(), format).await,
    }
}

fn mode(auto: bool) -> PipelineMode {
    if auto {
        PipelineMode::Auto
    } else {
        PipelineMode::Interactive
    }
}

/// TOML file (if any), then the environment on top.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env(|k| std::env::var(k).ok())
        .context("Invalid SLOTFORGE_* environment")?;
    Ok(config)
}

async fn open_pipeline(backend: Backend, store: &Path, config: PipelineConfig) -> Result<Pipeline> {
    let (artifacts, runs, knowledge): (
        Arc<dyn ArtifactStore>,
        Arc<dyn RunRepository>,
        Arc<dyn KnowledgeStore>,
    ) = match backend {
        Backend::Fs => {
            let fs = Arc::new(
                FsStore::open(store)
                    .with_context(|| format!("Failed to open state directory {}", store.display()))?,
            );
            (fs.clone(), fs.clone(), fs)
        }
        Backend::Surreal => {
            let db = Arc::new(
                SurrealStore::open(store.join("db"))
                    .await
                    .context("Failed to open SlotForge database")?,
            );
            (db.clone(), db.clone(), db)
        }
    };
    info!(backend = ?backend, store = %store.display(), "state opened");

    let providers = Providers::offline(knowledge);
    let stages = standard_stages(&providers, &config);
    Ok(Pipeline::new(artifacts, runs, config).with_stages(stages))
}

async fn cmd_run(
    pipeline: &Pipeline,
    target: &TargetArgs,
    mode: PipelineMode,
    format: Format,
) -> Result<()> {
    let request = target.to_request()?;
    let report = pipeline
        .start_product(&request, mode)
        .await
        .context("Failed to start product run")?;
    print_report(&report, format)
}

async fn cmd_recon(
    pipeline: &Pipeline,
    jurisdiction: String,
    game_hint: Option<String>,
    mode: PipelineMode,
    format: Format,
) -> Result<()> {
    let report = pipeline
        .start_recon(
            ReconRequest {
                jurisdiction,
                game_hint,
            },
            mode,
        )
        .await
        .context("Failed to start recon run")?;
    print_report(&report, format)
}

async fn cmd_list(pipeline: &Pipeline, format: Format) -> Result<()> {
    let runs = pipeline.list().await?;
    if format == Format::Json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs yet.");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {:<10} {:<12} {}",
            run.run_id,
            run.status,
            run.variant.map_or("?", |v| v.name()),
            run.label.as_deref().unwrap_or("(unreadable snapshot)")
        );
    }
    Ok(())
}

async fn cmd_review(pipeline: &Pipeline, action: ReviewAction, format: Format) -> Result<()> {
    let (run, checkpoint, decision) = match action {
        ReviewAction::Approve { run, checkpoint } => (run, checkpoint, ReviewDecision::Approve),
        ReviewAction::Reject {
            run,
            feedback,
            checkpoint,
        } => (run, checkpoint, ReviewDecision::reject(feedback)),
    };
    let report = pipeline
        .submit_decision(&RunId::from(run.as_str()), checkpoint.as_deref(), decision)
        .await
        .context("Failed to submit review decision")?;
    print_report(&report, format)
}

async fn cmd_artifacts(
    pipeline: &Pipeline,
    run: &str,
    stage: Option<StageKind>,
    format: Format,
) -> Result<()> {
    let artifacts: Vec<_> = pipeline
        .artifacts(&RunId::from(run))
        .await?
        .into_iter()
        .filter(|a| stage.map_or(true, |s| a.stage == s.name()))
        .collect();
    if format == Format::Json {
        return print_json(&artifacts);
    }
    for a in &artifacts {
        let flag = if a.degraded { " (degraded)" } else { "" };
        println!("#{} {} {}{flag}", a.seq, a.stage, a.digest.short());
        println!("{}", serde_json::to_string_pretty(&a.payload)?);
    }
    Ok(())
}

async fn cmd_simulate(
    target: &TargetArgs,
    trials: u64,
    seed: u64,
    config: &PipelineConfig,
    format: Format,
) -> Result<()> {
    let spec = target.to_spec(config.strict_features)?;
    let model = PayoutModel::preset(&spec);
    let sim = SimulationConfig::new(trials, seed);
    let stats = tokio::task::spawn_blocking(move || simulate(&model, &sim))
        .await
        .context("Simulation task failed")??;
    if format == Format::Json {
        return print_json(&stats);
    }
    print_stats(&stats);
    Ok(())
}

#[derive(Serialize)]
struct ConvergeOutput {
    converged: bool,
    iterations: u32,
    residual: f64,
    reason: Option<String>,
    model: PayoutModel,
    stats: SimulationStatistics,
}

async fn cmd_converge(target: &TargetArgs, config: &PipelineConfig, format: Format) -> Result<()> {
    let spec = target.to_spec(config.strict_features)?;
    let initial = PayoutModel::preset(&spec);
    let goal = ConvergenceTarget {
        target_rtp: spec.target_rtp,
        tolerance: config.rtp_tolerance,
        volatility: spec.volatility,
        iteration_budget: config.convergence_iteration_budget,
        time_budget: config
            .convergence_time_budget_ms
            .map(std::time::Duration::from_millis),
        simulation: SimulationConfig::new(
            config.trial_count,
            config.simulation_seed.unwrap_or(SimulationConfig::default().seed),
        ),
    };
    let text = format == Format::Text;
    let result = tokio::task::spawn_blocking(move || {
        converge_with(&initial, &goal, |rec| {
            if text {
                println!(
                    "  iter {:>2}  rtp {:.5}  error {:+.5}  volatility {:.2}",
                    rec.iteration, rec.rtp, rec.error, rec.std_dev
                );
            }
        })
    })
    .await
    .context("Convergence task failed")?;

    let output = match result {
        Ok(done) => ConvergeOutput {
            converged: true,
            iterations: done.iterations,
            residual: spec.target_rtp - done.stats.rtp,
            reason: None,
            model: done.model,
            stats: done.stats,
        },
        Err(MathError::NotConverged(failure)) => ConvergeOutput {
            converged: false,
            iterations: failure.iterations,
            residual: failure.residual,
            reason: Some(failure.reason),
            model: failure.best_model,
            stats: failure.best_stats,
        },
        Err(e) => return Err(e).context("Convergence failed"),
    };

    if format == Format::Json {
        return print_json(&output);
    }
    println!();
    if output.converged {
        println!("Converged after {} iteration(s)", output.iterations);
    } else {
        println!(
            "Did not converge: {}",
            output.reason.as_deref().unwrap_or("unknown")
        );
    }
    println!("Target RTP: {:.4}  residual {:+.5}", spec.target_rtp, output.residual);
    print_stats(&output.stats);
    Ok(())
}

fn print_stats(stats: &SimulationStatistics) {
    println!("Trials:        {} (seed {})", stats.trials, stats.seed);
    println!(
        "RTP:           {:.4}  [99% CI {:.4} - {:.4}]",
        stats.rtp, stats.rtp_ci_99.low, stats.rtp_ci_99.high
    );
    println!(
        "  base {:.4}  free spins {:.4}  bonus {:.4}",
        stats.base_rtp, stats.free_spins_rtp, stats.bonus_rtp
    );
    println!("Volatility:    {:.3}", stats.std_dev);
    println!("Hit frequency: {:.4}", stats.hit_frequency);
    println!("Max win:       {:.1}x", stats.max_win);
    if let Some(spins) = stats.spins_per_free_spins_trigger {
        println!("Free spins:    1 in {spins:.0} spins");
    }
    println!("Win distribution:");
    for b in &stats.buckets {
        println!("  {:<10} {:>9.5}", b.label, b.frequency);
    }
    for w in &stats.warnings {
        println!("warning: {w}");
    }
}

fn print_report(report: &RunReport, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(report),
        Format::Text => {
            print!("{report}");
            if report.pending.is_some() {
                println!();
                println!("  slotforge review approve {}", report.run_id);
                println!("  slotforge review reject {} --feedback \"...\"", report.run_id);
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}
