//! CLI entry point for the Mediathek pipeline.
//!
//! Parses command line arguments, loads the configuration, and dispatches
//! into the engine. All pipeline logic lives in `mediathek-engine`; this
//! binary only wires tools, config, and exit codes together.

use clap::{Parser, Subcommand, ValueEnum};
use mediathek_config::Config;
use mediathek_engine::materialize::{MaterializeOptions, MaterializeOverrides};
use mediathek_engine::orchestrate::medienserver_output_path;
use mediathek_engine::supervise::JobState;
use mediathek_engine::transcoder::{CompressorTranscoder, FinderTagger, SipsConverter};
use mediathek_engine::{
    default_lock_path, ConflictPolicy, IntegrationMode, LockGuard, Orchestrator, ProbeCache,
    RunOptions, Supervisor, SuperviseSettings, TranscodeJob,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;

/// Mediathek - personal video post-production pipeline
#[derive(Parser, Debug)]
#[command(name = "mediathek")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// Decide by the age of the existing library slot
    Auto,
    /// Replace the slot in place, preserving its identity
    Overwrite,
    /// Archive the existing slot and install a new release
    NewVersion,
}

impl From<ModeArg> for IntegrationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => IntegrationMode::Auto,
            ModeArg::Overwrite => IntegrationMode::Overwrite,
            ModeArg::NewVersion => IntegrationMode::NewVersion,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full import & compress pipeline
    Run {
        /// Additional source directories on top of the configured ones
        sources: Vec<PathBuf>,

        /// Integration mode
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,

        /// Overwrite existing files without asking
        #[arg(long)]
        no_prompt: bool,

        /// Skip the external tool preflight. For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,
    },

    /// Assemble and materialize mediasets without transcoding or integrating
    Assemble {
        /// Source directories to scan
        sources: Vec<PathBuf>,

        /// Overwrite existing files without asking
        #[arg(long)]
        no_prompt: bool,
    },

    /// Submit transcode jobs for the given master files
    Transcode {
        /// Master files to hand to the transcoder
        files: Vec<PathBuf>,

        /// Transcoder profile
        #[arg(long, default_value = "Medienserver")]
        profile: String,
    },

    /// Integrate materialized mediaset directories into the library
    Integrate {
        /// Mediaset directories to integrate
        mediasets: Vec<PathBuf>,

        /// Integration mode
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
    },

    /// Validate the library structure without modifying anything
    Validate,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, ExitCode> {
    let result = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    result.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        eprintln!("Konfiguration nicht lesbar: {}", e);
        ExitCode::FAILURE
    })
}

fn acquire_lock(config: &Config) -> Result<LockGuard, ExitCode> {
    let lock_path = config
        .paths
        .lock_path
        .clone()
        .unwrap_or_else(default_lock_path);
    LockGuard::acquire(&lock_path).map_err(|e| {
        eprintln!("{}", e);
        ExitCode::FAILURE
    })
}

fn supervise_settings(config: &Config) -> SuperviseSettings {
    SuperviseSettings {
        max_concurrent_jobs: mediathek_engine::orchestrate::derive_max_jobs(
            config.transcode.max_concurrent_jobs,
        ),
        check_interval: Duration::from_secs(config.transcode.check_interval_secs),
        max_checks: config.transcode.max_checks,
        write_skip_sidecars: config.transcode.write_skip_sidecars,
    }
}

async fn cmd_run(
    config: Config,
    sources: Vec<PathBuf>,
    mode: ModeArg,
    no_prompt: bool,
    skip_checks: bool,
) -> ExitCode {
    let mut orchestrator = Orchestrator::with_default_tools(config);
    let options = RunOptions {
        extra_sources: sources,
        mode: mode.into(),
        conflict: if no_prompt {
            ConflictPolicy::Overwrite
        } else {
            ConflictPolicy::Prompt
        },
        overrides: MaterializeOverrides::default(),
        run_preflight: !skip_checks,
    };

    match orchestrator.run(options).await {
        Ok(summary) => {
            print!("{}", summary);
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_assemble(config: Config, sources: Vec<PathBuf>, no_prompt: bool) -> ExitCode {
    let guard = match acquire_lock(&config) {
        Ok(guard) => guard,
        Err(code) => return code,
    };

    let mut cache = ProbeCache::new();
    let report = mediathek_engine::assemble(&config.paths.source_dirs, &sources, &mut cache);
    println!(
        "{} Dateien untersucht, {} Mediasets gruppiert, {} Dateien nicht lesbar",
        report.probed_count,
        report.candidates.len(),
        report.probe_failures.len()
    );

    let converter = SipsConverter;
    let options = MaterializeOptions {
        conflict: if no_prompt {
            ConflictPolicy::Overwrite
        } else {
            ConflictPolicy::Prompt
        },
        converter: Some(&converter),
        overrides: MaterializeOverrides::default(),
        today: chrono_today(),
    };

    let mut failures = 0;
    for candidate in &report.candidates {
        match mediathek_engine::materialize(candidate, &config.paths.staging_dir, &options) {
            Ok(set) => println!("Materialisiert: {}", set.dir.display()),
            Err(e) => {
                failures += 1;
                eprintln!("FEHLER {}: {}", candidate.key, e);
            }
        }
    }
    for failure in &report.probe_failures {
        eprintln!("FEHLER {}: {}", failure.path.display(), failure.error);
    }

    guard.release();
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn cmd_transcode(config: Config, files: Vec<PathBuf>, profile: String) -> ExitCode {
    let guard = match acquire_lock(&config) {
        Ok(guard) => guard,
        Err(code) => return code,
    };

    let transcoder = CompressorTranscoder::new(
        config.transcode.transcoder_bin.clone(),
        config.transcode.profile_dir.clone(),
    );
    let supervisor = Supervisor::new(transcoder, FinderTagger, supervise_settings(&config));

    let jobs: Vec<TranscodeJob> = files
        .iter()
        .map(|file| {
            let mut job =
                TranscodeJob::new(file.clone(), medienserver_output_path(file), profile.clone());
            job.expect_output_codec = Some("hevc".to_string());
            job.min_source_size_bytes = config.transcode.min_source_size_bytes;
            job.min_output_size_bytes = config.transcode.min_output_size_bytes;
            job.delete_source_on_success = config.transcode.delete_source_on_success;
            job
        })
        .collect();

    let outcomes = supervisor.supervise(jobs).await;
    let mut fatal = false;
    for outcome in &outcomes {
        println!(
            "{}: {}",
            outcome.job.source_path.display(),
            outcome.job.state.as_str()
        );
        if let Some(error) = &outcome.error {
            eprintln!("  {}", error);
        }
        fatal |= outcome.job.state == JobState::FailedFatal;
    }

    guard.release();
    if fatal {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_integrate(config: Config, mediasets: Vec<PathBuf>, mode: ModeArg) -> ExitCode {
    let guard = match acquire_lock(&config) {
        Ok(guard) => guard,
        Err(code) => return code,
    };

    let today = chrono_today();
    let mut fatal = false;
    for dir in &mediasets {
        match mediathek_engine::integrate(
            dir,
            &config.paths.library_root,
            mode.into(),
            config.library.overwrite_window_days,
            today,
        ) {
            Ok(outcome) => println!("Integriert: {}", outcome.slot_dir().display()),
            Err(e) => {
                eprintln!("FEHLER {}: {}", dir.display(), e);
                if matches!(e, mediathek_engine::IntegrateError::CorruptSlot { .. }) {
                    fatal = true;
                }
            }
        }
    }

    guard.release();
    if fatal {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_validate(config: Config) -> ExitCode {
    let report = mediathek_engine::validate_library(
        &config.paths.library_root,
        config.transcode.min_output_size_bytes,
    );
    println!("{} Ablagen geprüft", report.slots_checked);
    for finding in &report.findings {
        println!("{}: {}", finding.slot.display(), finding.kind);
    }
    ExitCode::from(report.exit_code())
}

fn chrono_today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Run {
            sources,
            mode,
            no_prompt,
            skip_checks,
        } => cmd_run(config, sources, mode, no_prompt, skip_checks).await,
        Commands::Assemble { sources, no_prompt } => cmd_assemble(config, sources, no_prompt),
        Commands::Transcode { files, profile } => cmd_transcode(config, files, profile).await,
        Commands::Integrate { mediasets, mode } => cmd_integrate(config, mediasets, mode),
        Commands::Validate => cmd_validate(config),
    }
}
