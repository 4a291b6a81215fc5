//! Transcode supervisor: drives the external transcoder under a bounded
//! concurrency cap with polling-based completion detection.
//!
//! Each job is a state value advanced in a loop. The transcoder child runs
//! detached; the supervisor only observes the filesystem: in-progress
//! sidecars (`.sb-`), output presence, output size, and the output codec
//! for the media-server profile.

use crate::transcoder::{FileTagger, ToolError, Transcoder, IN_PROGRESS_MARKER, KOMPRESSOR_LABEL};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Default minimum source size worth transcoding (25 MB).
pub const DEFAULT_MIN_SOURCE_SIZE_BYTES: u64 = 26_214_400;

/// Default minimum output size below which a result is incomplete (100 KB).
pub const DEFAULT_MIN_OUTPUT_SIZE_BYTES: u64 = 102_400;

/// Job state representing the current stage in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Job is waiting in queue.
    Pending,
    /// Transcoder child launched with exit code 0 (submission, not success).
    Submitted,
    /// Waiting on filesystem evidence of completion.
    Polling,
    /// Output verified; post-action (source deletion) still outstanding.
    SucceededPendingMove,
    /// Job completed successfully.
    Succeeded,
    /// Poll budget exhausted; output left in place for a later re-run.
    FailedTransient,
    /// Launch or tagging failed.
    FailedFatal,
    /// Job was not worth submitting.
    Skipped(SkipReason),
    /// Cancellation arrived before the job finished.
    Cancelled,
}

impl JobState {
    /// Convert state to string for the summary output.
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "pending",
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::SucceededPendingMove => "succeeded_pending_move",
            JobState::Succeeded => "succeeded",
            JobState::FailedTransient => "failed_transient",
            JobState::FailedFatal => "failed_fatal",
            JobState::Skipped(_) => "skipped",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Why a job was skipped rather than submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Source below the minimum size worth transcoding.
    TooSmall { size_bytes: u64, min_bytes: u64 },
    /// Source codec does not fit the requested profile.
    WrongCodec { codec: String },
    /// The output path exists but holds something that cannot be verified;
    /// it is not overwritten.
    OutputExists,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooSmall {
                size_bytes,
                min_bytes,
            } => write!(
                f,
                "source too small ({} bytes < {} bytes)",
                size_bytes, min_bytes
            ),
            SkipReason::WrongCodec { codec } => write!(f, "wrong source codec '{}'", codec),
            SkipReason::OutputExists => write!(f, "output exists and was not verifiable"),
        }
    }
}

/// Failure context attached to a job outcome.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("Tagging failed: {0}")]
    Tag(ToolError),

    #[error("Launch failed: {0}")]
    Launch(ToolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No completion after {checks} checks")]
    PollTimeout { checks: u32 },
}

/// An in-memory transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Path to the source file handed to the transcoder.
    pub source_path: PathBuf,
    /// Path the transcoder writes the rendition to.
    pub output_path: PathBuf,
    /// Profile identifier passed through to the transcoder.
    pub profile_id: String,
    /// Codec of the source's first video stream, when known.
    pub source_codec: Option<String>,
    /// Required source codec; mismatch skips the job.
    pub expect_source_codec: Option<String>,
    /// Required output codec for the completion check (e.g. "hevc" for the
    /// media-server profile).
    pub expect_output_codec: Option<String>,
    /// Sources below this size are skipped.
    pub min_source_size_bytes: u64,
    /// Outputs below this size are considered incomplete.
    pub min_output_size_bytes: u64,
    /// Unlink the source after verified success.
    pub delete_source_on_success: bool,
    /// Current state of the job.
    pub state: JobState,
}

impl TranscodeJob {
    /// Create a new pending job with default size gates.
    pub fn new(source_path: PathBuf, output_path: PathBuf, profile_id: impl Into<String>) -> Self {
        Self {
            source_path,
            output_path,
            profile_id: profile_id.into(),
            source_codec: None,
            expect_source_codec: None,
            expect_output_codec: None,
            min_source_size_bytes: DEFAULT_MIN_SOURCE_SIZE_BYTES,
            min_output_size_bytes: DEFAULT_MIN_OUTPUT_SIZE_BYTES,
            delete_source_on_success: false,
            state: JobState::Pending,
        }
    }
}

/// Result of supervising one job.
#[derive(Debug)]
pub struct JobOutcome {
    /// The job with its final state.
    pub job: TranscodeJob,
    /// The produced output, for successful jobs.
    pub produced: Option<PathBuf>,
    /// Failure context, for failed jobs.
    pub error: Option<JobFailure>,
}

impl JobOutcome {
    fn new(mut job: TranscodeJob, state: JobState) -> Self {
        job.state = state;
        Self {
            job,
            produced: None,
            error: None,
        }
    }

    fn with_produced(mut self, produced: PathBuf) -> Self {
        self.produced = Some(produced);
        self
    }

    fn with_error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }
}

/// Tunables for one supervise call.
#[derive(Debug, Clone)]
pub struct SuperviseSettings {
    /// Concurrency cap for transcoder children.
    pub max_concurrent_jobs: u32,
    /// Interval between completion polls.
    pub check_interval: Duration,
    /// Number of polls before a job fails transiently.
    pub max_checks: u32,
    /// Write `.why.txt` sidecars next to skipped sources.
    pub write_skip_sidecars: bool,
}

impl Default for SuperviseSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            check_interval: Duration::from_secs(30),
            max_checks: 100,
            write_skip_sidecars: false,
        }
    }
}

/// Decision of one completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// An in-progress sidecar exists; the transcoder is still working.
    InProgress,
    /// No output yet, or the output is still below the size threshold.
    Waiting,
    /// Output exists, no sidecars, size above threshold.
    Ready,
}

/// Evaluates filesystem evidence for one poll tick.
///
/// Checks, in order: (a) a sibling containing the output's base name and
/// the in-progress marker, (b) output presence, (c) output size.
pub fn evaluate_output(
    sibling_names: &[String],
    output_name: &str,
    output_size: Option<u64>,
    min_output_size: u64,
) -> PollDecision {
    let base = Path::new(output_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(output_name);

    let in_progress = sibling_names
        .iter()
        .any(|name| name.contains(base) && name.contains(IN_PROGRESS_MARKER));
    if in_progress {
        return PollDecision::InProgress;
    }

    match output_size {
        None => PollDecision::Waiting,
        Some(size) if size < min_output_size => PollDecision::Waiting,
        Some(_) => PollDecision::Ready,
    }
}

/// Constructs the skip sidecar path for a source file.
pub fn skip_sidecar_path(source_path: &Path) -> PathBuf {
    let mut sidecar = source_path.as_os_str().to_owned();
    sidecar.push(".why.txt");
    PathBuf::from(sidecar)
}

/// Writes a `.why.txt` sidecar with the skip reason, when enabled.
pub fn write_skip_sidecar(source_path: &Path, reason: &str, enabled: bool) -> io::Result<()> {
    if !enabled {
        return Ok(());
    }
    let mut file = File::create(skip_sidecar_path(source_path))?;
    writeln!(file, "{}", reason)?;
    Ok(())
}

/// Lists the names of the output directory's entries.
fn sibling_names(output_path: &Path) -> Vec<String> {
    let Some(parent) = output_path.parent() else {
        return Vec::new();
    };
    match std::fs::read_dir(parent) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn output_size(output_path: &Path) -> Option<u64> {
    std::fs::metadata(output_path).ok().map(|m| m.len())
}

/// Supervisor driving transcode jobs through their state machine.
pub struct Supervisor<T, G> {
    transcoder: Arc<T>,
    tagger: Arc<G>,
    settings: SuperviseSettings,
    cancel: Arc<AtomicBool>,
}

impl<T, G> Supervisor<T, G>
where
    T: Transcoder + 'static,
    G: FileTagger + 'static,
{
    pub fn new(transcoder: T, tagger: G, settings: SuperviseSettings) -> Self {
        Self {
            transcoder: Arc::new(transcoder),
            tagger: Arc::new(tagger),
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The cooperative cancellation flag. Setting it stops new launches;
    /// already-launched children keep running under the transcoder.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs all jobs under the concurrency cap.
    ///
    /// Jobs are submitted in the order received; outcomes arrive in
    /// completion order.
    pub async fn supervise(&self, jobs: Vec<TranscodeJob>) -> Vec<JobOutcome> {
        let permits = self.settings.max_concurrent_jobs.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut set = JoinSet::new();

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let transcoder = Arc::clone(&self.transcoder);
            let tagger = Arc::clone(&self.tagger);
            let settings = self.settings.clone();
            let cancel = Arc::clone(&self.cancel);

            set.spawn(async move {
                run_job(job, transcoder, tagger, semaphore, settings, cancel).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("supervised job task failed: {}", e),
            }
        }
        outcomes
    }
}

async fn run_job<T, G>(
    mut job: TranscodeJob,
    transcoder: Arc<T>,
    tagger: Arc<G>,
    semaphore: Arc<Semaphore>,
    settings: SuperviseSettings,
    cancel: Arc<AtomicBool>,
) -> JobOutcome
where
    T: Transcoder,
    G: FileTagger,
{
    if cancel.load(Ordering::Relaxed) {
        return JobOutcome::new(job, JobState::Cancelled);
    }

    let _permit = semaphore
        .acquire_owned()
        .await
        .expect("semaphore should not be closed");

    // A cancel may have arrived while this job waited for a slot.
    if cancel.load(Ordering::Relaxed) {
        return JobOutcome::new(job, JobState::Cancelled);
    }

    // Idempotent short-circuit: a verified output from an earlier run means
    // the transcoder is not touched at all.
    if let Some(size) = output_size(&job.output_path) {
        if size >= job.min_output_size_bytes {
            match verify_codec(&*transcoder, &job).await {
                Ok(true) => {
                    info!(output = %job.output_path.display(), "output already present, short-circuiting");
                    let produced = job.output_path.clone();
                    return JobOutcome::new(job, JobState::Succeeded).with_produced(produced);
                }
                Ok(false) => {
                    let reason = SkipReason::OutputExists;
                    record_skip(&job, &reason, &settings);
                    return JobOutcome::new(job, JobState::Skipped(reason));
                }
                Err(_) => {
                    // Unreadable output; fall through and let the transcoder
                    // overwrite it.
                }
            }
        }
    }

    // Size gate.
    let source_size = match std::fs::metadata(&job.source_path) {
        Ok(m) => m.len(),
        Err(e) => {
            return JobOutcome::new(job, JobState::FailedFatal).with_error(JobFailure::Io(e));
        }
    };
    if source_size < job.min_source_size_bytes {
        let reason = SkipReason::TooSmall {
            size_bytes: source_size,
            min_bytes: job.min_source_size_bytes,
        };
        record_skip(&job, &reason, &settings);
        return JobOutcome::new(job, JobState::Skipped(reason));
    }

    // Role-appropriateness gate.
    if let (Some(expected), Some(actual)) = (&job.expect_source_codec, &job.source_codec) {
        if !actual.to_lowercase().contains(&expected.to_lowercase()) {
            let reason = SkipReason::WrongCodec {
                codec: actual.clone(),
            };
            record_skip(&job, &reason, &settings);
            return JobOutcome::new(job, JobState::Skipped(reason));
        }
    }

    // Mark the source as handed over before launching, so out-of-band
    // re-runs recognize it even if this process dies mid-flight.
    if let Err(e) = tagger.tag(&job.source_path, KOMPRESSOR_LABEL).await {
        return JobOutcome::new(job, JobState::FailedFatal).with_error(JobFailure::Tag(e));
    }

    if let Err(e) = transcoder
        .submit(&job.source_path, &job.output_path, &job.profile_id)
        .await
    {
        return JobOutcome::new(job, JobState::FailedFatal).with_error(JobFailure::Launch(e));
    }
    job.state = JobState::Submitted;
    info!(source = %job.source_path.display(), profile = %job.profile_id, "transcode job submitted");

    job.state = JobState::Polling;
    for check in 0..settings.max_checks {
        if cancel.load(Ordering::Relaxed) {
            return JobOutcome::new(job, JobState::Cancelled);
        }

        let names = sibling_names(&job.output_path);
        let output_name = job
            .output_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let decision = evaluate_output(
            &names,
            &output_name,
            output_size(&job.output_path),
            job.min_output_size_bytes,
        );

        if decision == PollDecision::Ready && verify_codec(&*transcoder, &job).await.unwrap_or(false)
        {
            job.state = JobState::SucceededPendingMove;
            break;
        }

        if check + 1 < settings.max_checks {
            sleep(settings.check_interval).await;
        }
    }

    if job.state != JobState::SucceededPendingMove {
        warn!(
            output = %job.output_path.display(),
            checks = settings.max_checks,
            "no completion observed, leaving output for a later re-run"
        );
        let checks = settings.max_checks;
        return JobOutcome::new(job, JobState::FailedTransient)
            .with_error(JobFailure::PollTimeout { checks });
    }

    // Post-action: optional source deletion, then done.
    if job.delete_source_on_success {
        if let Err(e) = std::fs::remove_file(&job.source_path) {
            warn!(source = %job.source_path.display(), "could not delete source: {}", e);
        }
    }

    let produced = job.output_path.clone();
    info!(output = %produced.display(), "transcode job succeeded");
    JobOutcome::new(job, JobState::Succeeded).with_produced(produced)
}

/// Checks the produced output's codec, when the job requires one.
async fn verify_codec<T: Transcoder>(transcoder: &T, job: &TranscodeJob) -> Result<bool, ToolError> {
    let Some(expected) = &job.expect_output_codec else {
        return Ok(true);
    };
    let codec = transcoder.output_codec(&job.output_path).await?;
    Ok(codec
        .map(|c| c.to_lowercase().contains(&expected.to_lowercase()))
        .unwrap_or(false))
}

fn record_skip(job: &TranscodeJob, reason: &SkipReason, settings: &SuperviseSettings) {
    info!(source = %job.source_path.display(), %reason, "job skipped");
    if let Err(e) = write_skip_sidecar(
        &job.source_path,
        &reason.to_string(),
        settings.write_skip_sidecars,
    ) {
        warn!(source = %job.source_path.display(), "could not write skip sidecar: {}", e);
    }
}
