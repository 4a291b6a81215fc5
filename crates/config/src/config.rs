//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Path-related configuration: where sources live and where the library is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root of the media library.
    #[serde(default = "default_library_root")]
    pub library_root: PathBuf,
    /// Staging directory where assembled mediasets are materialized before
    /// integration.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Directories scanned for incoming footage.
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,
    /// Override for the single-instance lock path. Defaults to
    /// `{user_cache_dir}/mediathek.lock` when unset.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
}

fn default_library_root() -> PathBuf {
    PathBuf::from("~/Mediathek")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("~/Mediathek-Eingang")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            staging_dir: default_staging_dir(),
            source_dirs: Vec::new(),
            lock_path: None,
        }
    }
}

/// Transcode supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Maximum concurrent transcoder jobs (0 = derive from core count).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// Seconds between completion polls.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Number of polls before a job is declared transiently failed.
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,
    /// Sources below this size are not worth transcoding (default 25 MB).
    #[serde(default = "default_min_source_size_bytes")]
    pub min_source_size_bytes: u64,
    /// Outputs below this size are considered incomplete (default 100 KB).
    #[serde(default = "default_min_output_size_bytes")]
    pub min_output_size_bytes: u64,
    /// Unlink the source file after a successful transcode.
    #[serde(default)]
    pub delete_source_on_success: bool,
    /// Write a `.why.txt` sidecar next to skipped sources.
    #[serde(default)]
    pub write_skip_sidecars: bool,
    /// Transcoder executable.
    #[serde(default = "default_transcoder_bin")]
    pub transcoder_bin: PathBuf,
    /// Directory holding the transcoder's profile/setting files.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_max_concurrent_jobs() -> u32 {
    3
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_max_checks() -> u32 {
    100
}

fn default_min_source_size_bytes() -> u64 {
    26_214_400
}

fn default_min_output_size_bytes() -> u64 {
    102_400
}

fn default_transcoder_bin() -> PathBuf {
    PathBuf::from("/Applications/Compressor.app/Contents/MacOS/Compressor")
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            check_interval_secs: default_check_interval_secs(),
            max_checks: default_max_checks(),
            min_source_size_bytes: default_min_source_size_bytes(),
            min_output_size_bytes: default_min_output_size_bytes(),
            delete_source_on_success: false,
            write_skip_sidecars: false,
            transcoder_bin: default_transcoder_bin(),
            profile_dir: None,
        }
    }
}

/// Library integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Re-integrations within this many days overwrite the existing slot;
    /// older slots are archived as a previous version.
    #[serde(default = "default_overwrite_window_days")]
    pub overwrite_window_days: i64,
}

fn default_overwrite_window_days() -> i64 {
    40
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            overwrite_window_days: default_overwrite_window_days(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_paths();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MEDIATHEK_LIBRARY_ROOT -> paths.library_root
    /// - MEDIATHEK_STAGING_DIR -> paths.staging_dir
    /// - MEDIATHEK_MAX_CONCURRENT_JOBS -> transcode.max_concurrent_jobs
    /// - MEDIATHEK_CHECK_INTERVAL_SECS -> transcode.check_interval_secs
    /// - MEDIATHEK_MAX_CHECKS -> transcode.max_checks
    /// - MEDIATHEK_MIN_SOURCE_SIZE_BYTES -> transcode.min_source_size_bytes
    /// - MEDIATHEK_MIN_OUTPUT_SIZE_BYTES -> transcode.min_output_size_bytes
    /// - MEDIATHEK_DELETE_SOURCE_ON_SUCCESS -> transcode.delete_source_on_success
    /// - MEDIATHEK_OVERWRITE_WINDOW_DAYS -> library.overwrite_window_days
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIATHEK_LIBRARY_ROOT") {
            if !val.is_empty() {
                self.paths.library_root = expand_tilde(Path::new(&val));
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_STAGING_DIR") {
            if !val.is_empty() {
                self.paths.staging_dir = expand_tilde(Path::new(&val));
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.transcode.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_CHECK_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcode.check_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_MAX_CHECKS") {
            if let Ok(checks) = val.parse::<u32>() {
                self.transcode.max_checks = checks;
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_MIN_SOURCE_SIZE_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.transcode.min_source_size_bytes = bytes;
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_MIN_OUTPUT_SIZE_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.transcode.min_output_size_bytes = bytes;
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_DELETE_SOURCE_ON_SUCCESS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.transcode.delete_source_on_success = true,
                "false" | "0" | "no" => self.transcode.delete_source_on_success = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("MEDIATHEK_OVERWRITE_WINDOW_DAYS") {
            if let Ok(days) = val.parse::<i64>() {
                self.library.overwrite_window_days = days;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load the configuration from the default location, falling back to
    /// defaults when no file exists. Environment overrides apply either way.
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.is_file() => Self::load_from_file(path)?,
            _ => {
                let mut c = Config::default();
                c.expand_paths();
                c
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.paths.library_root = expand_tilde(&self.paths.library_root);
        self.paths.staging_dir = expand_tilde(&self.paths.staging_dir);
        self.paths.source_dirs = self
            .paths
            .source_dirs
            .iter()
            .map(|p| expand_tilde(p))
            .collect();
        if let Some(lock) = &self.paths.lock_path {
            self.paths.lock_path = Some(expand_tilde(lock));
        }
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/mediathek/config.toml`,
/// falling back to `$HOME/.config/mediathek/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("mediathek").join("config.toml"));
        }
    }
    env::var("HOME").ok().filter(|h| !h.is_empty()).map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("mediathek")
            .join("config.toml")
    })
}

/// Expand a leading `~` or `~/` to the current home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
