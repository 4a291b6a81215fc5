//! Run summary for the orchestrator.
//!
//! Collects counts by outcome plus the structured failure lists the
//! operator sees at the end of a run. Errors recovered locally during the
//! run surface here, and nowhere else.

use crate::supervise::{JobOutcome, JobState};
use serde::Serialize;
use std::path::PathBuf;

/// A failed unit of work with its structured reason.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedUnit {
    /// What failed: a path, a mediaset title, a slot.
    pub unit: String,
    /// Human-readable reason.
    pub reason: String,
    /// Whether this failure escalates to exit code 1.
    pub fatal: bool,
}

/// Aggregate summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunSummary {
    pub probed: usize,
    pub probe_failures: usize,
    pub grouped: usize,
    pub dropped_groups: usize,
    pub jobs_submitted: usize,
    pub jobs_succeeded: usize,
    pub jobs_skipped: usize,
    pub jobs_transient: usize,
    pub jobs_fatal: usize,
    pub jobs_cancelled: usize,
    pub materialized: usize,
    pub integrated: usize,
    pub corrupt_slots: usize,
    pub cancelled: bool,
    /// Failed units with structured reasons.
    pub failed_units: Vec<FailedUnit>,
    /// Left-behind partial artifacts the operator should know about.
    pub partial_artifacts: Vec<PathBuf>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a supervised job outcome into the counters.
    pub fn record_job(&mut self, outcome: &JobOutcome) {
        match &outcome.job.state {
            JobState::Succeeded => self.jobs_succeeded += 1,
            JobState::Skipped(reason) => {
                self.jobs_skipped += 1;
                self.failed_units.push(FailedUnit {
                    unit: outcome.job.source_path.display().to_string(),
                    reason: format!("skipped: {}", reason),
                    fatal: false,
                });
            }
            JobState::FailedTransient => {
                self.jobs_transient += 1;
                self.failed_units.push(FailedUnit {
                    unit: outcome.job.source_path.display().to_string(),
                    reason: outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "transient failure".to_string()),
                    fatal: false,
                });
                // The output stays behind for a later re-run.
                self.partial_artifacts.push(outcome.job.output_path.clone());
            }
            JobState::FailedFatal => {
                self.jobs_fatal += 1;
                self.failed_units.push(FailedUnit {
                    unit: outcome.job.source_path.display().to_string(),
                    reason: outcome
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "fatal failure".to_string()),
                    fatal: true,
                });
            }
            JobState::Cancelled => self.jobs_cancelled += 1,
            // Intermediate states never appear in final outcomes.
            _ => {}
        }
    }

    /// Records a failed unit outside the job pipeline.
    pub fn record_failure(&mut self, unit: impl Into<String>, reason: impl Into<String>, fatal: bool) {
        self.failed_units.push(FailedUnit {
            unit: unit.into(),
            reason: reason.into(),
            fatal,
        });
    }

    /// True when nothing fatal-class happened.
    pub fn is_success(&self) -> bool {
        self.jobs_fatal == 0 && self.corrupt_slots == 0 && !self.cancelled
    }

    /// Process exit code: 0 on success, 1 on any fatal-class error.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Dateien: {} untersucht, {} nicht lesbar",
            self.probed, self.probe_failures
        )?;
        writeln!(
            f,
            "Mediasets: {} gruppiert, {} verworfen, {} materialisiert, {} integriert",
            self.grouped, self.dropped_groups, self.materialized, self.integrated
        )?;
        writeln!(
            f,
            "Jobs: {} übergeben, {} erfolgreich, {} übersprungen, {} vorläufig fehlgeschlagen, {} endgültig fehlgeschlagen, {} abgebrochen",
            self.jobs_submitted,
            self.jobs_succeeded,
            self.jobs_skipped,
            self.jobs_transient,
            self.jobs_fatal,
            self.jobs_cancelled
        )?;
        if self.corrupt_slots > 0 {
            writeln!(f, "Bibliothek: {} beschädigte Ablagen", self.corrupt_slots)?;
        }
        if self.cancelled {
            writeln!(f, "Lauf abgebrochen")?;
        }
        for failed in &self.failed_units {
            writeln!(f, "  FEHLER {}: {}", failed.unit, failed.reason)?;
        }
        for artifact in &self.partial_artifacts {
            writeln!(f, "  VERBLEIBT {}", artifact.display())?;
        }
        Ok(())
    }
}
