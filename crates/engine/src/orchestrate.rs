//! Orchestrator: composes assembly, supervision, materialization and
//! integration into the end-to-end "import & compress" pipeline.
//!
//! Owns the single-instance lock and the signal handling. The lock is
//! released on every exit path; cancellation is cooperative and stops new
//! job launches while already-running transcoder children continue under
//! the external transcoder.

use crate::assemble::{self, MediasetCandidate};
use crate::classify::RenditionRole;
use crate::integrate::{integrate, IntegrateError, IntegrationMode};
use crate::lock::{default_lock_path, LockError, LockGuard};
use crate::materialize::{
    canonical_rendition_name, materialize, ConflictPolicy, MaterializeOptions,
    MaterializeOverrides,
};
use crate::probe::ProbeCache;
use crate::report::RunSummary;
use crate::startup::{run_startup_checks, StartupError};
use crate::supervise::{JobState, Supervisor, SuperviseSettings, TranscodeJob};
use crate::transcoder::{
    CompressorTranscoder, FileTagger, FinderTagger, ImageConverter, SipsConverter, Transcoder,
};
use mediathek_config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Profile identifier for the media-server rendition.
pub const MEDIENSERVER_PROFILE: &str = "Medienserver";

/// Error type for orchestration. Per-unit failures stay in the summary;
/// only process-level problems surface here.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Startup(#[from] StartupError),
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Additional source directories on top of the configured ones.
    pub extra_sources: Vec<PathBuf>,
    /// Integration mode; Auto decides by slot age.
    pub mode: IntegrationMode,
    /// Conflict behavior during materialization.
    pub conflict: ConflictPolicy,
    /// Explicit metadata overrides.
    pub overrides: MaterializeOverrides,
    /// Run the external tool preflight before touching anything.
    pub run_preflight: bool,
}

/// Derives the concurrency cap when the configuration leaves it at 0.
pub fn derive_max_jobs(configured: u32) -> u32 {
    if configured > 0 {
        configured
    } else {
        (num_cpus::get() as u32 / 8).clamp(1, 3)
    }
}

/// Output path for a derived media-server rendition: next to the master,
/// `{stem}_Medienserver.mov`.
pub fn medienserver_output_path(master: &Path) -> PathBuf {
    let stem = master
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Master");
    master.with_file_name(format!("{}_Medienserver.mov", stem))
}

fn spawn_signal_listener(cancel: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        warn!("cancellation requested, no new jobs will be launched");
        cancel.store(true, Ordering::SeqCst);
    })
}

/// The pipeline composition root.
pub struct Orchestrator<T, G> {
    config: Config,
    supervisor: Supervisor<T, G>,
    cache: ProbeCache,
    converter: Option<Box<dyn ImageConverter>>,
}

impl Orchestrator<CompressorTranscoder, FinderTagger> {
    /// Orchestrator wired to the production tools.
    pub fn with_default_tools(config: Config) -> Self {
        let transcoder = CompressorTranscoder::new(
            config.transcode.transcoder_bin.clone(),
            config.transcode.profile_dir.clone(),
        );
        Self::new(
            config,
            transcoder,
            FinderTagger,
            ProbeCache::new(),
            Some(Box::new(SipsConverter)),
        )
    }
}

impl<T, G> Orchestrator<T, G>
where
    T: Transcoder + 'static,
    G: FileTagger + 'static,
{
    pub fn new(
        config: Config,
        transcoder: T,
        tagger: G,
        cache: ProbeCache,
        converter: Option<Box<dyn ImageConverter>>,
    ) -> Self {
        let settings = SuperviseSettings {
            max_concurrent_jobs: derive_max_jobs(config.transcode.max_concurrent_jobs),
            check_interval: Duration::from_secs(config.transcode.check_interval_secs),
            max_checks: config.transcode.max_checks,
            write_skip_sidecars: config.transcode.write_skip_sidecars,
        };
        Self {
            supervisor: Supervisor::new(transcoder, tagger, settings),
            config,
            cache,
            converter,
        }
    }

    /// The cooperative cancellation flag shared with the supervisor.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.supervisor.cancel_flag()
    }

    /// Builds the transcode jobs for candidates that need a derived
    /// rendition: a ProRes master without a media-server sibling.
    fn build_jobs(
        &self,
        candidates: &[MediasetCandidate],
    ) -> (Vec<TranscodeJob>, HashMap<PathBuf, usize>) {
        let mut jobs = Vec::new();
        let mut target_by_output = HashMap::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            let Some(master) = candidate.member(RenditionRole::Master) else {
                continue;
            };
            if candidate.has_role(RenditionRole::Medienserver) {
                continue;
            }

            let output = medienserver_output_path(&master.path);
            let mut job =
                TranscodeJob::new(master.path.clone(), output.clone(), MEDIENSERVER_PROFILE);
            job.source_codec = master.video.as_ref().map(|v| v.codec_name.clone());
            job.expect_source_codec = Some("prores".to_string());
            job.expect_output_codec = Some("hevc".to_string());
            job.min_source_size_bytes = self.config.transcode.min_source_size_bytes;
            job.min_output_size_bytes = self.config.transcode.min_output_size_bytes;
            job.delete_source_on_success = self.config.transcode.delete_source_on_success;

            target_by_output.insert(output, idx);
            jobs.push(job);
        }

        (jobs, target_by_output)
    }

    /// Runs the end-to-end pipeline.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunSummary, OrchestrateError> {
        let lock_path = self
            .config
            .paths
            .lock_path
            .clone()
            .unwrap_or_else(default_lock_path);
        let guard = LockGuard::acquire(&lock_path)?;

        if options.run_preflight {
            // The guard drops and releases the lock if a tool is missing.
            run_startup_checks(&self.config.transcode.transcoder_bin)?;
        }

        let cancel = self.supervisor.cancel_flag();
        let signal_task = spawn_signal_listener(Arc::clone(&cancel));

        let mut summary = RunSummary::new();
        let today = chrono::Local::now().date_naive();

        // Assemble.
        let report = assemble::assemble(
            &self.config.paths.source_dirs,
            &options.extra_sources,
            &mut self.cache,
        );
        summary.probed = report.probed_count;
        summary.probe_failures = report.probe_failures.len();
        summary.grouped = report.candidates.len();
        summary.dropped_groups = report.dropped.len();
        for failure in &report.probe_failures {
            summary.record_failure(
                failure.path.display().to_string(),
                failure.error.to_string(),
                false,
            );
        }
        for dropped in &report.dropped {
            summary.record_failure(
                dropped.key.title().to_string(),
                format!("{:?}", dropped.reason),
                false,
            );
        }

        let mut candidates = report.candidates;

        // Transcode.
        let (jobs, target_by_output) = self.build_jobs(&candidates);
        summary.jobs_submitted = jobs.len();
        info!(jobs = summary.jobs_submitted, "supervising transcode jobs");
        let outcomes = self.supervisor.supervise(jobs).await;

        for outcome in &outcomes {
            summary.record_job(outcome);
            if outcome.job.state != JobState::Succeeded {
                continue;
            }
            let Some(produced) = &outcome.produced else {
                continue;
            };
            if let Some(&idx) = target_by_output.get(produced) {
                match self.cache.probe(produced) {
                    Ok(probed) => {
                        candidates[idx].add_member(probed, RenditionRole::Medienserver);
                    }
                    Err(e) => {
                        summary.record_failure(produced.display().to_string(), e.to_string(), false);
                    }
                }
            }
        }

        if cancel.load(Ordering::SeqCst) {
            summary.cancelled = true;
            signal_task.abort();
            guard.release();
            info!("run cancelled before materialization");
            return Ok(summary);
        }

        // Materialize.
        let materialize_options = MaterializeOptions {
            conflict: options.conflict,
            converter: self.converter.as_deref(),
            overrides: options.overrides.clone(),
            today,
        };
        let mut materialized_dirs = Vec::new();
        for candidate in &candidates {
            let has_deliverable = candidate
                .members
                .iter()
                .any(|(_, role)| canonical_rendition_name(*role).is_some());
            if !has_deliverable {
                summary.record_failure(
                    candidate.key.title().to_string(),
                    "no deliverable rendition".to_string(),
                    false,
                );
                continue;
            }
            if !candidate.has_role(RenditionRole::Poster) {
                warn!(title = %candidate.key, "materializing without a poster");
            }

            match materialize(candidate, &self.config.paths.staging_dir, &materialize_options) {
                Ok(set) => {
                    summary.materialized += 1;
                    materialized_dirs.push(set.dir);
                }
                Err(e) => {
                    summary.record_failure(candidate.key.title().to_string(), e.to_string(), false);
                }
            }
        }

        // Integrate, sequentially.
        for dir in materialized_dirs {
            match integrate(
                &dir,
                &self.config.paths.library_root,
                options.mode,
                self.config.library.overwrite_window_days,
                today,
            ) {
                Ok(outcome) => {
                    summary.integrated += 1;
                    info!(slot = %outcome.slot_dir().display(), "integrated");
                }
                Err(e @ IntegrateError::CorruptSlot { .. }) => {
                    summary.corrupt_slots += 1;
                    summary.record_failure(dir.display().to_string(), e.to_string(), true);
                }
                Err(e) => {
                    summary.record_failure(dir.display().to_string(), e.to_string(), false);
                    summary.partial_artifacts.push(dir);
                }
            }
        }

        summary.cancelled = summary.cancelled || cancel.load(Ordering::SeqCst);
        signal_task.abort();
        guard.release();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{MediaProber, MediaTags, ProbeError, ProbedFile, VideoStreamInfo};
    use crate::scan::{self, MediaKind};
    use crate::transcoder::ToolError;
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, Local};
    use mediathek_config::Config;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Rule-based prober for tests: codec and tags follow naming
    /// conventions, titles come from an optional `<file>.title` sidecar.
    struct FakeProber;

    impl MediaProber for FakeProber {
        fn probe(&self, path: &Path) -> Result<ProbedFile, ProbeError> {
            let metadata = fs::metadata(path).map_err(|e| ProbeError::FileUnreadable {
                path: path.to_path_buf(),
                source: e,
            })?;
            let kind = scan::media_kind(path);
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let video = if kind == MediaKind::Video {
                Some(if stem.contains("Medienserver") {
                    VideoStreamInfo {
                        codec_name: "hevc".to_string(),
                        avg_bitrate_bps: Some(60_000_000),
                        width: 3840,
                        height: 2160,
                        duration_secs: Some(120.0),
                        framerate: Some(25.0),
                    }
                } else if stem.contains("master") {
                    VideoStreamInfo {
                        codec_name: "prores".to_string(),
                        avg_bitrate_bps: Some(220_000_000),
                        width: 3840,
                        height: 2160,
                        duration_secs: Some(120.0),
                        framerate: Some(25.0),
                    }
                } else {
                    VideoStreamInfo {
                        codec_name: "h264".to_string(),
                        avg_bitrate_bps: Some(10_000_000),
                        width: 1920,
                        height: 1080,
                        duration_secs: Some(120.0),
                        framerate: Some(25.0),
                    }
                })
            } else {
                None
            };

            let title = fs::read_to_string(format!("{}.title", path.display()))
                .ok()
                .map(|t| t.trim().to_string());

            let modified: DateTime<FixedOffset> =
                DateTime::<Local>::from(metadata.modified().unwrap()).fixed_offset();

            Ok(ProbedFile {
                path: path.to_path_buf(),
                size_bytes: metadata.len(),
                modified,
                kind,
                extension: scan::lowercase_extension(path).unwrap_or_default(),
                video,
                tags: MediaTags {
                    title,
                    ..Default::default()
                },
                created: modified,
                created_zone_assumed: false,
            })
        }
    }

    struct FakeTranscoder {
        submits: AtomicUsize,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn submit(
            &self,
            _input: &Path,
            output: &Path,
            _profile_id: &str,
        ) -> Result<(), ToolError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            fs::write(output, vec![7u8; 4096]).map_err(|e| ToolError::LaunchFailed {
                tool: "fake".to_string(),
                message: e.to_string(),
            })
        }

        async fn output_codec(&self, _path: &Path) -> Result<Option<String>, ToolError> {
            Ok(Some("hevc".to_string()))
        }
    }

    struct FakeTagger;

    #[async_trait]
    impl FileTagger for FakeTagger {
        async fn tag(&self, _path: &Path, _label: &str) -> Result<(), ToolError> {
            Ok(())
        }
    }

    struct Fixture {
        _sources: TempDir,
        _staging: TempDir,
        _library: TempDir,
        _lockdir: TempDir,
        source_dir: PathBuf,
        library_root: PathBuf,
        config: Config,
    }

    fn fixture() -> Fixture {
        let sources = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let lockdir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.paths.source_dirs = vec![sources.path().to_path_buf()];
        config.paths.staging_dir = staging.path().to_path_buf();
        config.paths.library_root = library.path().to_path_buf();
        config.paths.lock_path = Some(lockdir.path().join("mediathek.lock"));
        config.transcode.min_source_size_bytes = 1_000;
        config.transcode.min_output_size_bytes = 100;
        config.transcode.check_interval_secs = 0;
        config.transcode.max_checks = 5;

        Fixture {
            source_dir: sources.path().to_path_buf(),
            library_root: library.path().to_path_buf(),
            _sources: sources,
            _staging: staging,
            _library: library,
            _lockdir: lockdir,
            config,
        }
    }

    fn orchestrator(config: Config) -> Orchestrator<FakeTranscoder, FakeTagger> {
        Orchestrator::new(
            config,
            FakeTranscoder {
                submits: AtomicUsize::new(0),
            },
            FakeTagger,
            ProbeCache::with_prober(Box::new(FakeProber)),
            None,
        )
    }

    fn run_options() -> RunOptions {
        RunOptions {
            conflict: ConflictPolicy::Overwrite,
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_max_jobs() {
        assert_eq!(derive_max_jobs(5), 5);
        let derived = derive_max_jobs(0);
        assert!((1..=3).contains(&derived));
    }

    #[test]
    fn test_medienserver_output_path() {
        assert_eq!(
            medienserver_output_path(Path::new("/in/master.mov")),
            PathBuf::from("/in/master_Medienserver.mov")
        );
    }

    #[tokio::test]
    async fn test_fresh_import_without_master() {
        let f = fixture();

        // Plain HD clip plus a poster sharing the stem.
        let video = f.source_dir.join("a.mov");
        fs::write(&video, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("a.mov.title"), "2023-08-01 Wanderung").unwrap();
        fs::write(f.source_dir.join("a.png"), vec![2u8; 512]).unwrap();

        let mut orchestrator = orchestrator(f.config.clone());
        let summary = orchestrator.run(run_options()).await.unwrap();

        assert_eq!(summary.probed, 2);
        assert_eq!(summary.grouped, 1);
        assert_eq!(summary.jobs_submitted, 0);
        assert_eq!(summary.materialized, 1);
        assert_eq!(summary.integrated, 1);
        assert_eq!(summary.exit_code(), 0);

        let slot = f.library_root.join("2023").join("2023_Wanderung");
        assert!(slot.join("Video-Internet-HD.m4v").exists());
        assert!(slot.join("Titelbild.png").exists());

        let meta =
            crate::metadata::Metadaten::load(&slot.join(crate::metadata::METADATEN_FILE)).unwrap();
        assert_eq!(meta.titel, "Wanderung");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.aufnahmedatum, chrono::NaiveDate::from_ymd_opt(2023, 8, 1));

        // The lock is gone after the run.
        assert!(!f.config.paths.lock_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_master_triggers_transcode() {
        let f = fixture();

        let master = f.source_dir.join("master.mov");
        fs::write(&master, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("master.mov.title"), "2023-08-01 Fest").unwrap();
        fs::write(f.source_dir.join("master.png"), vec![2u8; 512]).unwrap();

        let mut orchestrator = orchestrator(f.config.clone());
        let summary = orchestrator.run(run_options()).await.unwrap();

        assert_eq!(summary.jobs_submitted, 1);
        assert_eq!(summary.jobs_succeeded, 1);
        assert_eq!(summary.materialized, 1);
        assert_eq!(summary.integrated, 1);

        let slot = f.library_root.join("2023").join("2023_Fest");
        assert!(slot.join("Video-Medienserver.mov").exists());
        assert!(slot.join("Titelbild.png").exists());
        // The master itself stays at the source.
        assert!(master.exists());
    }

    #[tokio::test]
    async fn test_rerun_overwrites_slot_and_bumps_version() {
        let f = fixture();

        let video = f.source_dir.join("a.mov");
        fs::write(&video, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("a.mov.title"), "2023-08-01 Fest").unwrap();

        let mut first = orchestrator(f.config.clone());
        let summary = first.run(run_options()).await.unwrap();
        assert_eq!(summary.integrated, 1);

        let slot = f.library_root.join("2023").join("2023_Fest");
        let meta1 =
            crate::metadata::Metadaten::load(&slot.join(crate::metadata::METADATEN_FILE)).unwrap();

        // Same source appears again (fresh file, fresh run).
        fs::write(&video, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("a.mov.title"), "2023-08-01 Fest").unwrap();

        let mut second = orchestrator(f.config.clone());
        let summary = second.run(run_options()).await.unwrap();
        assert_eq!(summary.integrated, 1);

        let meta2 =
            crate::metadata::Metadaten::load(&slot.join(crate::metadata::METADATEN_FILE)).unwrap();
        // Identity constant, version strictly increasing.
        assert_eq!(meta2.id, meta1.id);
        assert_eq!(meta2.version, meta1.version + 1);
        // No archive appears for a close-in-time overwrite.
        assert!(!f
            .library_root
            .join("2023")
            .join(crate::metadata::VORHERIGE_VERSIONEN)
            .exists());
    }

    #[tokio::test]
    async fn test_lock_held_fails_fast() {
        let f = fixture();
        let lock_path = f.config.paths.lock_path.clone().unwrap();
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        // PID 1 is always alive.
        fs::write(&lock_path, "1").unwrap();

        let mut orchestrator = orchestrator(f.config.clone());
        let err = orchestrator.run(run_options()).await.unwrap_err();
        assert!(matches!(err, OrchestrateError::Lock(LockError::Held { .. })));
        // The foreign lockfile is left alone.
        assert_eq!(fs::read_to_string(&lock_path).unwrap(), "1");
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_materialization() {
        let f = fixture();

        let master = f.source_dir.join("master.mov");
        fs::write(&master, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("master.mov.title"), "2023-08-01 Fest").unwrap();

        let mut orchestrator = orchestrator(f.config.clone());
        // Cancellation arrives before the run starts.
        orchestrator.cancel_flag().store(true, Ordering::SeqCst);
        let summary = orchestrator.run(run_options()).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.jobs_cancelled, 1);
        assert_eq!(summary.materialized, 0);
        assert_eq!(summary.exit_code(), 1);
        // Lock released despite the cancellation.
        assert!(!f.config.paths.lock_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_corrupt_slot_escalates_exit_code() {
        let f = fixture();

        let video = f.source_dir.join("a.mov");
        fs::write(&video, vec![1u8; 10_000]).unwrap();
        fs::write(f.source_dir.join("a.mov.title"), "2023-08-01 Fest").unwrap();

        // Pre-existing slot without an Id.
        let slot = f.library_root.join("2023").join("2023_Fest");
        fs::create_dir_all(&slot).unwrap();
        fs::write(
            slot.join(crate::metadata::METADATEN_FILE),
            "Titel: Fest\nMediatheksdatum: 2023-08-01\n",
        )
        .unwrap();

        let mut orchestrator = orchestrator(f.config.clone());
        let summary = orchestrator.run(run_options()).await.unwrap();

        assert_eq!(summary.corrupt_slots, 1);
        assert_eq!(summary.exit_code(), 1);
        // The corrupt slot is untouched.
        assert_eq!(
            fs::read_to_string(slot.join(crate::metadata::METADATEN_FILE)).unwrap(),
            "Titel: Fest\nMediatheksdatum: 2023-08-01\n"
        );
    }
}
