//! Startup checks for the Mediathek pipeline.
//!
//! Provides preflight checks to verify the external collaborators are
//! available before a run: the metadata extractor, the stream inspector,
//! and the transcoder executable.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("exiftool not available: {0}")]
    ExiftoolUnavailable(String),

    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),
}

/// Runs a tool with a version-style argument and checks it executes.
fn check_runs(program: &str, arg: &str) -> Result<(), String> {
    match Command::new(program).arg(arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!("exited with {}", output.status)),
        Err(e) => Err(e.to_string()),
    }
}

/// Verifies `exiftool -ver` executes successfully.
pub fn check_exiftool_available() -> Result<(), StartupError> {
    check_runs("exiftool", "-ver").map_err(StartupError::ExiftoolUnavailable)
}

/// Verifies `ffprobe -version` executes successfully.
pub fn check_ffprobe_available() -> Result<(), StartupError> {
    check_runs("ffprobe", "-version").map_err(StartupError::FfprobeUnavailable)
}

/// Verifies the configured transcoder executable exists.
///
/// The transcoder is not launched: a `-help` invocation of the compressor
/// CLI can take seconds and spawns UI helpers, so presence on disk is the
/// preflight contract.
pub fn check_transcoder_available(bin: &Path) -> Result<(), StartupError> {
    if bin.is_file() {
        Ok(())
    } else {
        Err(StartupError::TranscoderUnavailable(format!(
            "{} does not exist",
            bin.display()
        )))
    }
}

/// Runs all startup checks in order: exiftool, ffprobe, transcoder.
pub fn run_startup_checks(transcoder_bin: &Path) -> Result<(), StartupError> {
    check_exiftool_available()?;
    check_ffprobe_available()?;
    check_transcoder_available(transcoder_bin)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_transcoder_missing() {
        let err = check_transcoder_available(Path::new("/no/such/transcoder")).unwrap_err();
        assert!(matches!(err, StartupError::TranscoderUnavailable(_)));
        assert!(err.to_string().contains("/no/such/transcoder"));
    }

    #[test]
    fn test_check_transcoder_present() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("Compressor");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        assert!(check_transcoder_available(&bin).is_ok());
    }

    #[test]
    fn test_check_runs_missing_program() {
        let err = check_runs("definitely-not-a-real-tool-xyz", "-ver").unwrap_err();
        assert!(!err.is_empty());
    }
}
