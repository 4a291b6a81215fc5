//! Mediathek Engine
//!
//! The mediaset lifecycle engine of the Mediathek pipeline: probes raw
//! footage, groups it into mediasets, drives the external transcoder under
//! a bounded supervisor, and integrates finished mediasets into the
//! versioned library.

pub mod assemble;
pub mod classify;
pub mod integrate;
pub mod lock;
pub mod materialize;
pub mod metadata;
pub mod orchestrate;
pub mod probe;
pub mod report;
pub mod scan;
pub mod startup;
pub mod supervise;
pub mod transcoder;
pub mod validate;

pub use mediathek_config as config;
pub use mediathek_config::Config;

pub use assemble::{assemble, AssembleReport, MediasetCandidate};
pub use classify::{MediasetKey, RenditionRole};
pub use integrate::{integrate, IntegrateError, IntegrationMode, IntegrationOutcome};
pub use lock::{default_lock_path, LockError, LockGuard};
pub use materialize::{
    materialize, ConflictPolicy, MaterializeError, MaterializeOptions, MaterializeOverrides,
};
pub use metadata::{Metadaten, MetadataError, SlotCorruption, Untertyp};
pub use orchestrate::{OrchestrateError, Orchestrator, RunOptions};
pub use probe::{MediaProber, ProbeCache, ProbeError, ProbedFile, ToolProber};
pub use report::RunSummary;
pub use scan::{scan_sources, MediaKind, ScanCandidate};
pub use startup::{run_startup_checks, StartupError};
pub use supervise::{
    JobOutcome, JobState, Supervisor, SuperviseSettings, TranscodeJob,
};
pub use transcoder::{
    CompressorTranscoder, FileTagger, FinderTagger, ImageConverter, SipsConverter, Transcoder,
};
pub use validate::{validate_library, ValidationReport};
