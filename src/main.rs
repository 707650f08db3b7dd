use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use trailtrack::config::AppConfig;
use trailtrack::database::{SqliteWorkoutStore, WorkoutStore};
use trailtrack::import::ImportManager;
use trailtrack::logging::init_logging;
use trailtrack::metrics::{format_duration, format_pace};
use trailtrack::mirror::{JsonFileMirror, LocalMirror, MemoryMirror};
use trailtrack::processor::GateCounters;
use trailtrack::session::{FinishOutcome, SaveMode, SaveOutcome};
use trailtrack::simulation::{replay_track, ReplayOptions, ReplayReport};
use trailtrack::{UserProfile, WorkoutRecord, WorkoutType};

/// trailtrack - live workout tracking engine
///
/// Replays recorded GPS tracks through the session tracker and manages
/// stored workouts.
#[derive(Parser)]
#[command(name = "trailtrack")]
#[command(version)]
#[command(about = "GPS workout tracking engine", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a tracking session from a recorded GPX or CSV track
    Replay {
        /// Track file (GPX or CSV)
        #[arg(short, long)]
        file: PathBuf,

        /// Workout type
        #[arg(short = 't', long, default_value = "Running")]
        workout_type: WorkoutType,

        /// Athlete weight in kg (config default if omitted)
        #[arg(long)]
        weight: Option<f64>,

        /// Battery level between 0 and 1
        #[arg(long, default_value = "1.0")]
        battery: f64,

        /// Count steps with a simulated pedometer instead of GPS strides
        #[arg(long)]
        pedometer: bool,

        /// Pause before this sample index
        #[arg(long, requires = "resume_before")]
        pause_before: Option<usize>,

        /// Resume before this sample index
        #[arg(long)]
        resume_before: Option<usize>,

        /// Keep a short route instead of discarding it
        #[arg(long)]
        force: bool,

        /// Save the finished workout to the database
        #[arg(long)]
        save: bool,

        /// Signed-in user id
        #[arg(short, long)]
        user: Option<String>,
    },

    /// List stored workouts
    History {
        /// Only workouts of this user
        #[arg(short, long)]
        user: Option<String>,

        /// Number of workouts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Write or print the configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Tabled)]
struct WorkoutRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Type")]
    workout_type: String,
    #[tabled(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Pace")]
    pace: String,
    #[tabled(rename = "Calories")]
    calories: String,
    #[tabled(rename = "Steps")]
    steps: u64,
    #[tabled(rename = "Id")]
    id: String,
}

impl From<&WorkoutRecord> for WorkoutRow {
    fn from(record: &WorkoutRecord) -> Self {
        let summary = record.display_summary();
        Self {
            date: summary.date,
            workout_type: summary.workout_type,
            distance: summary.distance,
            duration: summary.duration,
            pace: summary.pace,
            calories: summary.calories,
            steps: summary.steps,
            id: record.id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct GateRow {
    #[tabled(rename = "Gate")]
    gate: &'static str,
    #[tabled(rename = "Samples")]
    samples: u64,
}

fn gate_rows(counters: &GateCounters) -> Vec<GateRow> {
    vec![
        GateRow { gate: "received", samples: counters.received },
        GateRow { gate: "invalid coordinates", samples: counters.invalid },
        GateRow { gate: "low accuracy", samples: counters.low_accuracy },
        GateRow { gate: "too soon", samples: counters.too_soon },
        GateRow { gate: "reference", samples: counters.references },
        GateRow { gate: "implausible jump", samples: counters.implausible },
        GateRow { gate: "stationary", samples: counters.stationary },
        GateRow { gate: "credited", samples: counters.credited },
        GateRow { gate: "forced recompute", samples: counters.forced },
    ]
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_file(path),
        None => Ok(AppConfig::load_or_default()),
    }
}

fn open_store(config: &AppConfig) -> Result<SqliteWorkoutStore> {
    SqliteWorkoutStore::open(&config.storage.database_path).with_context(|| {
        format!(
            "Failed to open workout database: {}",
            config.storage.database_path.display()
        )
    })
}

fn print_report(report: &ReplayReport) {
    println!("{}", Table::new(gate_rows(&report.counters)).with(Style::rounded()));

    let stats = &report.stats;
    println!("{}", "Session".bold());
    println!("  State:     {}", report.final_state);
    if let Some(tracking) = &report.tracking_config {
        println!(
            "  Sampling:  {} every {} ms / {} m",
            tracking.accuracy, tracking.min_time_interval_ms, tracking.min_distance_interval_m
        );
    }
    println!("  Route:     {} points", report.route_points);
    println!("  Distance:  {:.2} km", stats.distance_km());
    println!("  Duration:  {}", format_duration(stats.duration_secs));
    println!("  Pace:      {} /km", format_pace(stats.pace_secs_per_km));
    println!("  Speed:     {:.1} km/h", stats.avg_speed_kmh);
    println!("  Steps:     {}", stats.steps);
    println!("  Calories:  {:.0} kcal", stats.calories);

    if let FinishOutcome::NeedsDecision { route_points, min_required } = report.finish {
        println!(
            "{}",
            format!(
                "Route had {} points (minimum {}); use --force to keep it",
                route_points, min_required
            )
            .yellow()
        );
    }

    match &report.save {
        Some(SaveOutcome::Saved { id }) => {
            println!("{}", format!("✓ Workout saved as {}", id).green());
        }
        Some(SaveOutcome::TooShort { duration_secs, distance_m }) => {
            println!(
                "{}",
                format!(
                    "Workout too short to save ({}, {:.0} m)",
                    format_duration(*duration_secs),
                    distance_m
                )
                .yellow()
            );
        }
        Some(SaveOutcome::Pending { local_id, reason }) => {
            println!("{}", format!("⚠ Save pending: {}", reason).yellow());
            if let Some(local_id) = local_id {
                println!("  Kept locally as {}", local_id);
            }
        }
        None => {}
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let log_config = config.logging.clone().with_verbosity(cli.verbose);
    init_logging(&log_config)?;

    match cli.command {
        Commands::Replay {
            file,
            workout_type,
            weight,
            battery,
            pedometer,
            pause_before,
            resume_before,
            force,
            save,
            user,
        } => {
            println!("{}", "Replaying track...".cyan().bold());
            println!("  File: {}", file.display());

            let samples = ImportManager::new()
                .import_file(&file)
                .with_context(|| format!("Failed to import track: {}", file.display()))?;
            println!("  Samples: {}", samples.len());

            let options = ReplayOptions {
                workout_type,
                profile: UserProfile { weight_kg: weight },
                battery_level: battery,
                use_pedometer: pedometer,
                pause_before,
                resume_before,
                force_finish: force,
                save,
                save_mode: if force { SaveMode::Anyway } else { SaveMode::Normal },
                user_id: user,
            };

            let (store, mirror): (Box<dyn WorkoutStore>, Box<dyn LocalMirror>) = if save {
                (
                    Box::new(open_store(&config)?),
                    Box::new(JsonFileMirror::new(
                        &config.storage.mirror_path,
                        config.storage.mirror_capacity,
                    )),
                )
            } else {
                (
                    Box::new(SqliteWorkoutStore::in_memory()?),
                    Box::new(MemoryMirror::new(config.storage.mirror_capacity)),
                )
            };

            let report =
                match replay_track(&samples, &options, config.tracker_settings(), store, mirror) {
                    Ok(report) => report,
                    Err(e) => {
                        eprintln!("{}", e.user_message().red());
                        return Err(anyhow::Error::new(e).context("Replay failed"));
                    }
                };
            print_report(&report);
        }

        Commands::History { user, limit } => {
            let store = open_store(&config)?;
            let mut records = match &user {
                Some(user_id) => store.fetch_by_user(user_id)?,
                None => store.fetch_recent(limit)?,
            };
            records.truncate(limit);

            if records.is_empty() {
                println!("{}", "No workouts stored yet".dimmed());
            } else {
                let rows: Vec<WorkoutRow> = records.iter().map(WorkoutRow::from).collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }

            let mirror =
                JsonFileMirror::new(&config.storage.mirror_path, config.storage.mirror_capacity);
            let pending: Vec<WorkoutRecord> = mirror
                .recent(user.as_deref())?
                .into_iter()
                .filter(|r| {
                    r.id
                        .as_deref()
                        .is_some_and(|id| id.starts_with(trailtrack::mirror::LOCAL_ID_PREFIX))
                })
                .collect();
            if !pending.is_empty() {
                println!("{}", format!("{} workout(s) not yet saved:", pending.len()).yellow());
                let rows: Vec<WorkoutRow> = pending.iter().map(WorkoutRow::from).collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }

        Commands::Config { init, show } => {
            let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
            if init {
                if path.exists() {
                    anyhow::bail!("Config file already exists: {}", path.display());
                }
                AppConfig::default().save_to_file(&path)?;
                println!("{}", format!("✓ Wrote {}", path.display()).green());
            }
            if show || !init {
                let rendered =
                    toml::to_string_pretty(&config).context("Failed to render configuration")?;
                println!("{}", format!("# {}", path.display()).dimmed());
                println!("{}", rendered);
            }
        }
    }

    Ok(())
}
