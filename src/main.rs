use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use run_tracker::export::{self, SummaryStats};
use run_tracker::{
    Clock, Command, FileSnapshotStore, Goal, MemorySnapshotStore, ReplaySource, RunSummary,
    SessionRunner, SnapshotStore, SystemClock, Tracker, TrackerConfig, TrackerEvent,
};

#[derive(Parser, Debug)]
#[command(name = "run_tracker")]
#[command(about = "GPS run session tracker - replay recorded runs and inspect snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run a recorded sample log through a full session
    Replay(ReplayArgs),
    /// Show the snapshot a restart would recover
    Recover(RecoverArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Sample log (JSON array or {"samples": [...]}, optionally .gz)
    #[arg(long)]
    log: PathBuf,

    /// Tracker config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Distance goal in kilometers
    #[arg(long, conflicts_with = "goal_min")]
    goal_km: Option<f64>,

    /// Duration goal in minutes
    #[arg(long)]
    goal_min: Option<f64>,

    /// Body weight for the calorie estimate
    #[arg(long)]
    weight: Option<f64>,

    /// Accuracy ceiling override (meters)
    #[arg(long)]
    max_accuracy: Option<f64>,

    /// Path simplification tolerance override (meters)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Replay speed (1.0 = real time); omit to replay as fast as possible
    #[arg(long)]
    speedup: Option<f64>,

    /// Persist snapshots here instead of in memory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Write the summary JSON here
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the compressed path as GPX here
    #[arg(long)]
    gpx: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RecoverArgs {
    #[arg(long, default_value = "run_tracker_snapshots")]
    snapshot_dir: PathBuf,

    /// Tracker config JSON (for the staleness window)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    match path {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(TrackerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Mode::Replay(args) => replay(args).await,
        Mode::Recover(args) => recover(args),
    }
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(weight) = args.weight {
        config.calories.body_weight_kg = Some(weight);
    }
    if let Some(max_accuracy) = args.max_accuracy {
        config.filter.max_accuracy_m = max_accuracy;
    }
    if let Some(tolerance) = args.tolerance {
        config.compression.tolerance_m = tolerance;
    }

    let goal = match (args.goal_km, args.goal_min) {
        (Some(km), _) => Some(Goal::distance_km(km)),
        (None, Some(min)) => Some(Goal::duration_min(min)),
        (None, None) => None,
    };
    if goal.is_some_and(|g| !(g.target.is_finite() && g.target > 0.0)) {
        bail!("goal target must be positive");
    }

    let mut source = ReplaySource::from_path(&args.log)
        .with_context(|| format!("loading sample log {}", args.log.display()))?;
    if let Some(speedup) = args.speedup {
        source = source.with_speedup(speedup);
    }
    println!("Replaying {} samples from {}", source.len(), args.log.display());

    let store: Arc<dyn SnapshotStore> = match &args.snapshot_dir {
        Some(dir) => Arc::new(FileSnapshotStore::new(dir)?),
        None => Arc::new(MemorySnapshotStore::new()),
    };

    let mut tracker = Tracker::try_new(config)?;
    tracker.set_goal(goal);

    let clock = source.clock();
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let (command_tx, command_rx) = mpsc::channel(16);
    let runner = SessionRunner::new(tracker, store, Box::new(source), clock, event_tx);
    let handle = tokio::spawn(runner.run(command_rx));

    command_tx.send(Command::Start).await?;

    let mut summary: Option<RunSummary> = None;
    let mut progress_count = 0u64;
    while let Some(event) = event_rx.recv().await {
        match event {
            TrackerEvent::Progress(progress) => {
                progress_count += 1;
                if progress_count % 100 == 0 {
                    log::info!(
                        "{:.2} km, {:.1} min, pace {}",
                        progress.distance_m / 1000.0,
                        progress.duration_ms as f64 / 60_000.0,
                        export::format_pace(progress.average_pace)
                    );
                }
            }
            TrackerEvent::GoalAchieved(achievement) => {
                println!(
                    "Goal reached: {:.2} {} at {}",
                    achievement.value,
                    achievement.goal.unit(),
                    export::format_timestamp(achievement.timestamp_ms)
                );
            }
            TrackerEvent::SignalDegraded { silent_for_ms } => {
                log::warn!("Signal lost for {:.0}s", silent_for_ms as f64 / 1000.0);
            }
            TrackerEvent::TransitionRejected { from, action } => {
                log::warn!("Tracker rejected {} while {:?}", action, from);
            }
            TrackerEvent::SourceClosed { .. } => {
                command_tx.send(Command::Stop).await?;
            }
            TrackerEvent::SessionCompleted(completed) => {
                summary = Some(completed);
                command_tx.send(Command::Shutdown).await?;
            }
            other => log::debug!("{}", other.kind()),
        }
    }

    let tracker = handle.await??;
    let Some(summary) = summary else {
        bail!("replay ended in state {:?} without a summary", tracker.state());
    };

    print_summary(&summary, &tracker);

    if let Some(out) = &args.out {
        std::fs::write(out, export::summary_to_json(&summary)?)
            .with_context(|| format!("writing {}", out.display()))?;
        println!("Summary written to {}", out.display());
    }
    if let Some(gpx) = &args.gpx {
        let track = export::summary_to_gpx(&summary);
        std::fs::write(gpx, track.to_gpx_xml())
            .with_context(|| format!("writing {}", gpx.display()))?;
        println!("GPX written to {}", gpx.display());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, tracker: &Tracker) {
    let stats = SummaryStats::from_summary(summary);
    let filter = tracker.stats();

    println!("\n=== {} ===", summary.session_id);
    println!("  Distance:      {:.3} km", stats.distance_km);
    println!("  Duration:      {:.1} min", stats.duration_seconds / 60.0);
    println!("  Average pace:  {}", stats.average_pace);
    println!("  Best pace:     {}", stats.best_pace);
    println!("  Max speed:     {:.1} km/h", stats.max_speed_kmh);
    println!("  Calories:      {:.0} kcal", stats.calories_kcal);
    println!(
        "  Path:          {} accepted -> {} points",
        summary.accepted_samples, stats.path_points
    );
    println!(
        "  Rejected:      {} (accuracy {}, speed {}, jitter {}, order {}, invalid {})",
        summary.rejected_samples,
        filter.poor_accuracy,
        filter.implausible_speed,
        filter.jitter,
        filter.out_of_order,
        filter.invalid
    );
    if let Some(goal) = summary.goal {
        println!(
            "  Goal:          {:.2} {} ({})",
            goal.target,
            goal.unit(),
            if summary.goal_achieved { "achieved" } else { "missed" }
        );
    }
}

fn recover(args: RecoverArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let store = FileSnapshotStore::new(&args.snapshot_dir)?;
    let now = SystemClock.now_ms();

    let Some(snapshot) = store.latest()? else {
        println!("No snapshot in {}", args.snapshot_dir.display());
        return Ok(());
    };

    let session = &snapshot.session;
    let window = config.continuity.staleness_window_ms;
    let verdict = if snapshot.is_recoverable(now, window) {
        "restore"
    } else if snapshot.is_stale(now, window) {
        "discard (stale)"
    } else {
        "discard (finished)"
    };
    println!("Snapshot {}", session.id);
    println!("  State:     {:?}", session.state);
    println!("  Saved:     {}", export::format_timestamp(snapshot.saved_at_ms));
    println!("  Age:       {:.1} min", snapshot.age_ms(now) as f64 / 60_000.0);
    println!("  Distance:  {:.3} km", session.total_distance_m / 1000.0);
    println!("  Duration:  {:.1} min", session.active_duration_ms(snapshot.saved_at_ms) as f64 / 60_000.0);
    println!("  Points:    {}", session.accepted_path.len());
    println!("  Restart:   {}", verdict);
    Ok(())
}
