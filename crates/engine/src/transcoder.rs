//! Drivers for the external tools the supervisor talks to: the transcoder,
//! the Finder tagger, and the image converter.
//!
//! The transcoder contract: it accepts `(input, output, profile)`, runs
//! detached, exits 0 on successful job submission (not completion), and
//! leaves `.sb-` sidecar files next to the output while work is in
//! progress. Completion is observed from the filesystem, never from the
//! child's exit code.

use crate::probe::{self, ProbeError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Finder label attached to sources that have been handed to the
/// transcoder. Re-runs recognize it out-of-band.
pub const KOMPRESSOR_LABEL: &str = "An Apple Kompressor übergeben";

/// Substring that marks the transcoder's in-progress sidecar files.
pub const IN_PROGRESS_MARKER: &str = ".sb-";

/// Error type for external tool invocations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be launched at all.
    #[error("Failed to launch {tool}: {message}")]
    LaunchFailed { tool: String, message: String },

    /// The tool ran and exited unsuccessfully.
    #[error("{tool} exited with {code:?}: {stderr}")]
    ExitFailure {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Probing the produced output failed.
    #[error("Output inspection failed: {0}")]
    Inspect(#[from] ProbeError),
}

/// Control seam for the external transcoder.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Submits a job and returns once the child reports successful
    /// submission. The actual transcode continues detached.
    async fn submit(&self, input: &Path, output: &Path, profile_id: &str)
        -> Result<(), ToolError>;

    /// Codec of the first video stream of a produced file, used for the
    /// post-completion sanity check.
    async fn output_codec(&self, path: &Path) -> Result<Option<String>, ToolError>;
}

/// Seam for the OS-level file tagger. Tagging must be idempotent.
#[async_trait]
pub trait FileTagger: Send + Sync {
    async fn tag(&self, path: &Path, label: &str) -> Result<(), ToolError>;
}

/// Seam for the PNG/JPEG converter (Adobe RGB, deterministic output path).
pub trait ImageConverter: Send + Sync {
    fn convert_to_jpeg(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

fn run_checked(tool: &str, cmd: &mut Command) -> Result<(), ToolError> {
    let output = cmd.output().map_err(|e| ToolError::LaunchFailed {
        tool: tool.to_string(),
        message: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(ToolError::ExitFailure {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Resolves a profile identifier to the transcoder's setting file: absolute
/// paths pass through, names resolve inside the configured profile
/// directory as `{name}.compressorsetting`.
pub fn resolve_profile_path(profile_dir: Option<&Path>, profile_id: &str) -> PathBuf {
    let as_path = Path::new(profile_id);
    if as_path.is_absolute() {
        return as_path.to_path_buf();
    }
    match profile_dir {
        Some(dir) => dir.join(format!("{}.compressorsetting", profile_id)),
        None => PathBuf::from(format!("{}.compressorsetting", profile_id)),
    }
}

/// Builds the submission command for the compressor CLI.
///
/// The batch name carries the output stem so concurrent submissions stay
/// distinguishable in the transcoder's own UI.
pub fn build_submit_command(
    bin: &Path,
    profile_dir: Option<&Path>,
    input: &Path,
    output: &Path,
    profile_id: &str,
) -> Command {
    let mut cmd = Command::new(bin);

    let batch = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mediathek");
    cmd.arg("-batchname").arg(format!("mediathek {}", batch));
    cmd.arg("-jobpath").arg(input);
    cmd.arg("-settingpath")
        .arg(resolve_profile_path(profile_dir, profile_id));
    cmd.arg("-locationpath").arg(output);

    cmd
}

/// Production transcoder driving the compressor CLI.
pub struct CompressorTranscoder {
    bin: PathBuf,
    profile_dir: Option<PathBuf>,
}

impl CompressorTranscoder {
    pub fn new(bin: PathBuf, profile_dir: Option<PathBuf>) -> Self {
        Self { bin, profile_dir }
    }
}

#[async_trait]
impl Transcoder for CompressorTranscoder {
    async fn submit(
        &self,
        input: &Path,
        output: &Path,
        profile_id: &str,
    ) -> Result<(), ToolError> {
        let bin = self.bin.clone();
        let profile_dir = self.profile_dir.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let profile_id = profile_id.to_string();

        debug!(input = %input.display(), output = %output.display(), profile = %profile_id, "submitting transcode job");

        tokio::task::spawn_blocking(move || {
            let mut cmd =
                build_submit_command(&bin, profile_dir.as_deref(), &input, &output, &profile_id);
            run_checked("compressor", &mut cmd)
        })
        .await
        .map_err(|e| ToolError::LaunchFailed {
            tool: "compressor".to_string(),
            message: e.to_string(),
        })?
    }

    async fn output_codec(&self, path: &Path) -> Result<Option<String>, ToolError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe::probe_codec(&path))
            .await
            .map_err(|e| ToolError::LaunchFailed {
                tool: "ffprobe".to_string(),
                message: e.to_string(),
            })?
            .map_err(ToolError::from)
    }
}

/// Production tagger driving the `tag` CLI.
///
/// `tag --list` is consulted first so re-applying an existing label is a
/// no-op.
pub struct FinderTagger;

impl FinderTagger {
    fn is_tagged(path: &Path, label: &str) -> Result<bool, ToolError> {
        let output = Command::new("tag")
            .args(["--list", "--no-name"])
            .arg(path)
            .output()
            .map_err(|e| ToolError::LaunchFailed {
                tool: "tag".to_string(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ToolError::ExitFailure {
                tool: "tag".to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let listed = String::from_utf8_lossy(&output.stdout);
        Ok(listed.lines().any(|l| l.trim() == label))
    }
}

#[async_trait]
impl FileTagger for FinderTagger {
    async fn tag(&self, path: &Path, label: &str) -> Result<(), ToolError> {
        let path = path.to_path_buf();
        let label = label.to_string();
        tokio::task::spawn_blocking(move || {
            if Self::is_tagged(&path, &label)? {
                return Ok(());
            }
            run_checked(
                "tag",
                Command::new("tag").arg("--add").arg(&label).arg(&path),
            )
        })
        .await
        .map_err(|e| ToolError::LaunchFailed {
            tool: "tag".to_string(),
            message: e.to_string(),
        })?
    }
}

/// Color profile the converter matches posters against.
pub const ADOBE_RGB_PROFILE: &str = "/System/Library/ColorSync/Profiles/AdobeRGB1998.icc";

/// Builds the conversion command for the image converter CLI.
pub fn build_convert_command(input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new("sips");
    cmd.arg("--matchTo").arg(ADOBE_RGB_PROFILE);
    cmd.args(["-s", "format", "jpeg"]);
    cmd.arg(input);
    cmd.arg("--out").arg(output);
    cmd
}

/// Deterministic output path for a converted poster: same directory, same
/// stem, `.jpg` extension.
pub fn converted_jpeg_path(input: &Path) -> PathBuf {
    input.with_extension("jpg")
}

/// Production converter driving the `sips` CLI.
pub struct SipsConverter;

impl ImageConverter for SipsConverter {
    fn convert_to_jpeg(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        run_checked("sips", &mut build_convert_command(input, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    /// Helper to convert Command args to a Vec of strings for easier testing
    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn test_label_constant() {
        assert_eq!(KOMPRESSOR_LABEL, "An Apple Kompressor übergeben");
        assert_eq!(IN_PROGRESS_MARKER, ".sb-");
    }

    #[test]
    fn test_resolve_profile_path_name() {
        let resolved = resolve_profile_path(Some(Path::new("/profiles")), "Medienserver");
        assert_eq!(
            resolved,
            PathBuf::from("/profiles/Medienserver.compressorsetting")
        );
    }

    #[test]
    fn test_resolve_profile_path_absolute_passthrough() {
        let resolved = resolve_profile_path(
            Some(Path::new("/profiles")),
            "/custom/setting.compressorsetting",
        );
        assert_eq!(resolved, PathBuf::from("/custom/setting.compressorsetting"));
    }

    #[test]
    fn test_converted_jpeg_path_is_deterministic() {
        assert_eq!(
            converted_jpeg_path(Path::new("/in/Titelbild.heic")),
            PathBuf::from("/in/Titelbild.jpg")
        );
        assert_eq!(
            converted_jpeg_path(Path::new("/in/Titelbild.png")),
            PathBuf::from("/in/Titelbild.jpg")
        );
    }

    #[test]
    fn test_build_convert_command() {
        let cmd = build_convert_command(Path::new("/in/a.png"), Path::new("/out/a.jpg"));
        assert_eq!(cmd.get_program(), OsStr::new("sips"));
        let args = get_command_args(&cmd);
        assert!(has_flag_with_value(&args, "--matchTo", ADOBE_RGB_PROFILE));
        assert!(has_flag_with_value(&args, "--out", "/out/a.jpg"));
        assert!(args.contains(&"jpeg".to_string()));
    }

    // Strategy for generating valid path-like strings
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("/[a-zA-Z0-9_/.-]{1,50}")
            .unwrap()
            .prop_filter("non-empty path", |s| !s.is_empty())
    }

    // For any input, output and profile, the built submission command
    // carries all required arguments.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_submit_command_completeness(
            input_path in path_strategy(),
            output_path in path_strategy(),
            profile in "[A-Za-z0-9-]{1,20}",
        ) {
            let cmd = build_submit_command(
                Path::new("/Applications/Compressor.app/Contents/MacOS/Compressor"),
                Some(Path::new("/profiles")),
                Path::new(&input_path),
                Path::new(&output_path),
                &profile,
            );
            let args = get_command_args(&cmd);

            prop_assert_eq!(
                cmd.get_program(),
                OsStr::new("/Applications/Compressor.app/Contents/MacOS/Compressor")
            );

            prop_assert!(
                has_flag_with_value(&args, "-jobpath", &input_path),
                "Command should contain -jobpath with '{}', args: {:?}",
                input_path, args
            );

            prop_assert!(
                has_flag_with_value(&args, "-locationpath", &output_path),
                "Command should contain -locationpath with '{}', args: {:?}",
                output_path, args
            );

            let setting = format!("/profiles/{}.compressorsetting", profile);
            prop_assert!(
                has_flag_with_value(&args, "-settingpath", &setting),
                "Command should contain -settingpath with '{}', args: {:?}",
                setting, args
            );

            prop_assert!(
                args.iter().any(|a| a == "-batchname"),
                "Command should contain -batchname, args: {:?}",
                args
            );
        }
    }
}
