//! Metadata probe for media files.
//!
//! Combines two external tools into one normalized record per file: exiftool
//! for the textual tag dump and ffprobe for the first video stream. Stream
//! inspector values win for codec, bitrate and resolution; the tag dump wins
//! for textual metadata. Fields absent from both stay unset.

use crate::scan::{self, MediaKind};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The external tool is not installed or not on PATH.
    #[error("{tool} is not available: {message}")]
    ToolMissing { tool: &'static str, message: String },

    /// The external tool ran but exited unsuccessfully.
    #[error("{tool} failed on {path}: {message}")]
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        message: String,
    },

    /// The tool's output could not be parsed.
    #[error("Failed to parse {tool} output for {path}: {message}")]
    UnparseableOutput {
        tool: &'static str,
        path: PathBuf,
        message: String,
    },

    /// The file itself could not be read.
    #[error("File unreadable: {path}: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Technical information about the first video stream of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    /// Codec name as reported by the stream inspector (e.g. "prores", "hevc").
    pub codec_name: String,
    /// Average bitrate in bit/s, when the container reports one.
    pub avg_bitrate_bps: Option<u64>,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Duration in seconds.
    pub duration_secs: Option<f64>,
    /// Average framerate.
    pub framerate: Option<f64>,
}

impl VideoStreamInfo {
    /// Average bitrate in Mbit/s.
    pub fn avg_bitrate_mbps(&self) -> Option<f64> {
        self.avg_bitrate_bps.map(|b| b as f64 / 1_000_000.0)
    }

    /// True when the stream is any ProRes variant.
    pub fn is_prores(&self) -> bool {
        self.codec_name.to_lowercase().contains("prores")
    }
}

/// Textual tags extracted from the tag dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaTags {
    pub title: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub keywords: Vec<String>,
    pub producer: Option<String>,
    pub director: Option<String>,
    pub artist: Option<String>,
    pub creation_date: Option<String>,
    pub content_create_date: Option<String>,
    pub date_time_original: Option<String>,
    pub offset_time_original: Option<String>,
    pub share_category: Option<String>,
    pub duration_tag: Option<String>,
}

/// Immutable record produced by the probe for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedFile {
    /// Absolute path of the probed file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Filesystem mtime, offset-aware.
    pub modified: DateTime<FixedOffset>,
    /// Logical kind (video, image, other).
    pub kind: MediaKind,
    /// Lowercase container extension without the dot.
    pub extension: String,
    /// First video stream, for video files.
    pub video: Option<VideoStreamInfo>,
    /// Textual tags.
    pub tags: MediaTags,
    /// Resolved creation timestamp, always offset-aware.
    pub created: DateTime<FixedOffset>,
    /// True when no timezone was recoverable and the local zone was assumed.
    pub created_zone_assumed: bool,
}

impl ProbedFile {
    /// Filename stem of the probed file.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    /// True when the first video stream is a ProRes variant.
    pub fn is_prores(&self) -> bool {
        self.video.as_ref().map(|v| v.is_prores()).unwrap_or(false)
    }
}

/// Tolerant scalar: exiftool emits strings or numbers depending on the tag.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagScalar {
    Text(String),
    Number(f64),
}

impl TagScalar {
    fn into_string(self) -> String {
        match self {
            TagScalar::Text(s) => s,
            TagScalar::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", n as i64)
                } else {
                    format!("{}", n)
                }
            }
        }
    }
}

/// Tolerant list: a tag may hold one value or an ordered sequence.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagList {
    One(TagScalar),
    Many(Vec<TagScalar>),
}

/// Raw exiftool JSON record. Only the tags the pipeline consumes are mapped;
/// everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExifRecord {
    #[serde(rename = "Title")]
    pub title: Option<TagScalar>,
    #[serde(rename = "DisplayName")]
    pub display_name: Option<TagScalar>,
    #[serde(rename = "Description")]
    pub description: Option<TagScalar>,
    #[serde(rename = "Album")]
    pub album: Option<TagScalar>,
    #[serde(rename = "Genre")]
    pub genre: Option<TagScalar>,
    #[serde(rename = "Keywords")]
    pub keywords: Option<TagList>,
    #[serde(rename = "Producer")]
    pub producer: Option<TagScalar>,
    #[serde(rename = "Director")]
    pub director: Option<TagScalar>,
    #[serde(rename = "Artist")]
    pub artist: Option<TagScalar>,
    #[serde(rename = "CreationDate")]
    pub creation_date: Option<TagScalar>,
    #[serde(rename = "ContentCreateDate")]
    pub content_create_date: Option<TagScalar>,
    #[serde(rename = "DateTimeOriginal")]
    pub date_time_original: Option<TagScalar>,
    #[serde(rename = "OffsetTimeOriginal")]
    pub offset_time_original: Option<TagScalar>,
    #[serde(rename = "AppleProappsShareCategory")]
    pub share_category: Option<TagScalar>,
    #[serde(rename = "Duration")]
    pub duration: Option<TagScalar>,
}

impl From<ExifRecord> for MediaTags {
    fn from(rec: ExifRecord) -> Self {
        MediaTags {
            title: rec.title.map(TagScalar::into_string).filter(|s| !s.is_empty()),
            display_name: rec
                .display_name
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            description: rec
                .description
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            album: rec.album.map(TagScalar::into_string).filter(|s| !s.is_empty()),
            genre: rec.genre.map(TagScalar::into_string).filter(|s| !s.is_empty()),
            keywords: normalize_keywords(rec.keywords),
            producer: rec
                .producer
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            director: rec
                .director
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            artist: rec.artist.map(TagScalar::into_string).filter(|s| !s.is_empty()),
            creation_date: rec
                .creation_date
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            content_create_date: rec
                .content_create_date
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            date_time_original: rec
                .date_time_original
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            offset_time_original: rec
                .offset_time_original
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            share_category: rec
                .share_category
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
            duration_tag: rec
                .duration
                .map(TagScalar::into_string)
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Normalizes the Keywords tag: a sequence stays a sequence, a single
/// comma-separated string is split.
fn normalize_keywords(keywords: Option<TagList>) -> Vec<String> {
    match keywords {
        None => Vec::new(),
        Some(TagList::Many(items)) => items
            .into_iter()
            .map(TagScalar::into_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(TagList::One(item)) => item
            .into_string()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// Parses the tag dump JSON (an array with one record per file).
pub fn parse_exiftool_output(json_str: &str, path: &Path) -> Result<ExifRecord, ProbeError> {
    let records: Vec<ExifRecord> =
        serde_json::from_str(json_str).map_err(|e| ProbeError::UnparseableOutput {
            tool: "exiftool",
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    records
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::UnparseableOutput {
            tool: "exiftool",
            path: path.to_path_buf(),
            message: "empty record array".to_string(),
        })
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub duration: Option<String>,
        pub avg_frame_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Parses an "N/D" rational framerate string.
pub fn parse_framerate(raw: &str) -> Option<f64> {
    let mut parts = raw.splitn(2, '/');
    let num: f64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(den) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => Some(num),
    }
}

/// Parses ffprobe JSON output into the first video stream's info.
///
/// Stream-level values win; format-level duration and bitrate fill the gaps
/// for containers that only report them globally.
pub fn parse_ffprobe_output(
    json_str: &str,
    path: &Path,
) -> Result<Option<VideoStreamInfo>, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::UnparseableOutput {
            tool: "ffprobe",
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format;

    let Some(stream) = streams
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
    else {
        return Ok(None);
    };

    let stream_bitrate = stream.bit_rate.as_ref().and_then(|b| b.parse::<u64>().ok());
    let format_bitrate = format
        .as_ref()
        .and_then(|f| f.bit_rate.as_ref())
        .and_then(|b| b.parse::<u64>().ok());

    let stream_duration = stream.duration.as_ref().and_then(|d| d.parse::<f64>().ok());
    let format_duration = format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok());

    Ok(Some(VideoStreamInfo {
        codec_name: stream.codec_name.unwrap_or_default(),
        avg_bitrate_bps: stream_bitrate.or(format_bitrate),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration_secs: stream_duration.or(format_duration),
        framerate: stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_framerate)
            .filter(|f| *f > 0.0),
    }))
}

/// Parses an exiftool-style timestamp (`YYYY:MM:DD HH:MM:SS[.fff][±HH:MM]`).
///
/// Returns the parsed timestamp and whether the local zone had to be assumed
/// because the value carried no offset.
pub fn parse_exif_datetime(raw: &str) -> Option<(DateTime<FixedOffset>, bool)> {
    let trimmed = raw.trim();
    // Normalize a trailing Z to an explicit zero offset.
    let normalized = if let Some(stripped) = trimmed.strip_suffix('Z') {
        format!("{}+00:00", stripped)
    } else {
        trimmed.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y:%m:%d %H:%M:%S%.f%z") {
        return Some((dt, false));
    }
    // ISO-style separators appear on some containers.
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Some((dt, false));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| Local::now());
    Some((local.fixed_offset(), true))
}

/// Resolves the creation timestamp of a probed file.
///
/// Order, first match wins:
/// (a) `CreationDate` or `ContentCreateDate` on video containers,
/// (b) `DateTimeOriginal` (+ `OffsetTimeOriginal`) for stills,
/// (c) filesystem mtime in the local zone.
pub fn resolve_creation_timestamp(
    kind: MediaKind,
    tags: &MediaTags,
    modified: DateTime<FixedOffset>,
) -> (DateTime<FixedOffset>, bool) {
    if kind == MediaKind::Video {
        for raw in [&tags.creation_date, &tags.content_create_date]
            .into_iter()
            .flatten()
        {
            if let Some(parsed) = parse_exif_datetime(raw) {
                return parsed;
            }
        }
    }

    if kind == MediaKind::Image {
        if let Some(dto) = &tags.date_time_original {
            let combined = match &tags.offset_time_original {
                Some(offset) => format!("{}{}", dto, offset),
                None => dto.clone(),
            };
            if let Some(parsed) = parse_exif_datetime(&combined) {
                return parsed;
            }
        }
    }

    // Fall back to mtime; zone is whatever the filesystem clock gave us,
    // counted as assumed for the diagnostics.
    (modified, true)
}

fn run_tool(
    tool: &'static str,
    cmd: &mut Command,
    path: &Path,
) -> Result<String, ProbeError> {
    let output = cmd.output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ProbeError::ToolMissing {
                tool,
                message: e.to_string(),
            }
        } else {
            ProbeError::ToolFailed {
                tool,
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::ToolFailed {
            tool,
            path: path.to_path_buf(),
            message: format!("exited with {}: {}", output.status, stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs exiftool for the full tag dump of one file.
fn run_exiftool(path: &Path) -> Result<ExifRecord, ProbeError> {
    let stdout = run_tool(
        "exiftool",
        Command::new("exiftool")
            .args(["-j", "-api", "largefilesupport=1"])
            .arg(path),
        path,
    )?;
    parse_exiftool_output(&stdout, path)
}

/// Runs ffprobe for the first video stream of one file.
fn run_ffprobe(path: &Path) -> Result<Option<VideoStreamInfo>, ProbeError> {
    let stdout = run_tool(
        "ffprobe",
        Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path),
        path,
    )?;
    parse_ffprobe_output(&stdout, path)
}

/// Inspects only the codec of a file's first video stream.
///
/// Used by the supervisor's completion check; cheaper than a full probe and
/// deliberately bypasses the per-run cache, since the file under inspection
/// is still being produced.
pub fn probe_codec(path: &Path) -> Result<Option<String>, ProbeError> {
    Ok(run_ffprobe(path)?.map(|v| v.codec_name))
}

/// Probes a single file: tag dump plus, for videos, the stream inspection.
pub fn probe(path: &Path) -> Result<ProbedFile, ProbeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ProbeError::FileUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    let kind = scan::media_kind(path);
    let extension = scan::lowercase_extension(path).unwrap_or_default();
    let modified = system_time_to_local(metadata.modified().map_err(|e| {
        ProbeError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        }
    })?);

    let tags: MediaTags = run_exiftool(path)?.into();

    let video = if kind == MediaKind::Video {
        run_ffprobe(path)?
    } else {
        None
    };

    let (created, created_zone_assumed) = resolve_creation_timestamp(kind, &tags, modified);
    if created_zone_assumed {
        warn!(path = %path.display(), "no timezone recoverable, assuming local zone");
    }

    Ok(ProbedFile {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified,
        kind,
        extension,
        video,
        tags,
        created,
        created_zone_assumed,
    })
}

/// Converts a filesystem timestamp into an offset-aware local timestamp.
fn system_time_to_local(t: SystemTime) -> DateTime<FixedOffset> {
    DateTime::<Local>::from(t).fixed_offset()
}

/// The thin media-probe capability the engine consumes. The production
/// implementation shells out to exiftool and ffprobe.
pub trait MediaProber: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbedFile, ProbeError>;
}

/// Production prober driving the external tools.
pub struct ToolProber;

impl MediaProber for ToolProber {
    fn probe(&self, path: &Path) -> Result<ProbedFile, ProbeError> {
        probe(path)
    }
}

/// Per-run probe cache. Each path is probed at most once per orchestration
/// run; the cache is discarded with the run.
pub struct ProbeCache {
    prober: Box<dyn MediaProber>,
    entries: HashMap<PathBuf, Arc<ProbedFile>>,
}

impl Default for ProbeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::with_prober(Box::new(ToolProber))
    }

    pub fn with_prober(prober: Box<dyn MediaProber>) -> Self {
        Self {
            prober,
            entries: HashMap::new(),
        }
    }

    /// Probes a path, returning the cached record when present.
    pub fn probe(&mut self, path: &Path) -> Result<Arc<ProbedFile>, ProbeError> {
        if let Some(hit) = self.entries.get(path) {
            return Ok(Arc::clone(hit));
        }
        let probed = Arc::new(self.prober.probe(path)?);
        self.entries
            .insert(path.to_path_buf(), Arc::clone(&probed));
        Ok(probed)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_exiftool_output_basic() {
        let json = r#"[{
            "Title": "2023-08-01 Wanderung",
            "Description": "Tagestour im Karwendel",
            "Keywords": ["Berge", "Familie"],
            "Producer": "A. Muster; B. Muster",
            "CreationDate": "2023:08:01 10:15:00+02:00",
            "Duration": "0:12:35"
        }]"#;

        let record = parse_exiftool_output(json, Path::new("/in/a.mov")).unwrap();
        let tags: MediaTags = record.into();

        assert_eq!(tags.title.as_deref(), Some("2023-08-01 Wanderung"));
        assert_eq!(tags.description.as_deref(), Some("Tagestour im Karwendel"));
        assert_eq!(tags.keywords, vec!["Berge", "Familie"]);
        assert_eq!(tags.producer.as_deref(), Some("A. Muster; B. Muster"));
        assert_eq!(
            tags.creation_date.as_deref(),
            Some("2023:08:01 10:15:00+02:00")
        );
        assert_eq!(tags.duration_tag.as_deref(), Some("0:12:35"));
    }

    #[test]
    fn test_parse_exiftool_output_keyword_string_is_split() {
        let json = r#"[{"Keywords": "Berge, Familie, Sommer"}]"#;
        let record = parse_exiftool_output(json, Path::new("/in/a.mov")).unwrap();
        let tags: MediaTags = record.into();
        assert_eq!(tags.keywords, vec!["Berge", "Familie", "Sommer"]);
    }

    #[test]
    fn test_parse_exiftool_output_numeric_tags() {
        let json = r#"[{"Title": 2023, "Duration": 12.5}]"#;
        let record = parse_exiftool_output(json, Path::new("/in/a.mov")).unwrap();
        let tags: MediaTags = record.into();
        assert_eq!(tags.title.as_deref(), Some("2023"));
        assert_eq!(tags.duration_tag.as_deref(), Some("12.5"));
    }

    #[test]
    fn test_parse_exiftool_output_empty_array_fails() {
        let err = parse_exiftool_output("[]", Path::new("/in/a.mov")).unwrap_err();
        assert!(matches!(err, ProbeError::UnparseableOutput { .. }));
    }

    #[test]
    fn test_parse_exiftool_output_garbage_fails() {
        let err = parse_exiftool_output("not json", Path::new("/in/a.mov")).unwrap_err();
        assert!(matches!(err, ProbeError::UnparseableOutput { .. }));
    }

    #[test]
    fn test_parse_ffprobe_output_basic() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "prores",
                    "width": 3840,
                    "height": 2160,
                    "bit_rate": "220000000",
                    "avg_frame_rate": "25/1"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "pcm_s16le"
                }
            ],
            "format": {
                "duration": "754.2",
                "bit_rate": "225000000"
            }
        }"#;

        let info = parse_ffprobe_output(json, Path::new("/in/a.mov"))
            .unwrap()
            .expect("video stream expected");

        assert_eq!(info.codec_name, "prores");
        assert_eq!(info.width, 3840);
        assert_eq!(info.height, 2160);
        assert_eq!(info.avg_bitrate_bps, Some(220_000_000));
        assert!((info.avg_bitrate_mbps().unwrap() - 220.0).abs() < 0.001);
        assert!((info.duration_secs.unwrap() - 754.2).abs() < 0.001);
        assert!((info.framerate.unwrap() - 25.0).abs() < 0.001);
        assert!(info.is_prores());
    }

    #[test]
    fn test_parse_ffprobe_output_format_fallbacks() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080
                }
            ],
            "format": {
                "duration": "60.0",
                "bit_rate": "10000000"
            }
        }"#;

        let info = parse_ffprobe_output(json, Path::new("/in/a.mp4"))
            .unwrap()
            .expect("video stream expected");
        assert_eq!(info.avg_bitrate_bps, Some(10_000_000));
        assert!((info.duration_secs.unwrap() - 60.0).abs() < 0.001);
        assert!(!info.is_prores());
    }

    #[test]
    fn test_parse_ffprobe_output_no_video_stream() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "60.0"}
        }"#;
        let info = parse_ffprobe_output(json, Path::new("/in/a.mp4")).unwrap();
        assert!(info.is_none());
    }

    #[test]
    fn test_parse_exif_datetime_with_offset() {
        let (dt, assumed) = parse_exif_datetime("2023:08:01 10:15:00+02:00").unwrap();
        assert!(!assumed);
        assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2023-08-01");
    }

    #[test]
    fn test_parse_exif_datetime_with_fraction_and_zulu() {
        let (dt, assumed) = parse_exif_datetime("2023:08:01 10:15:00.25Z").unwrap();
        assert!(!assumed);
        assert_eq!(dt.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parse_exif_datetime_without_offset_assumes_local() {
        let (_, assumed) = parse_exif_datetime("2023:08:01 10:15:00").unwrap();
        assert!(assumed);
    }

    #[test]
    fn test_parse_exif_datetime_invalid() {
        assert!(parse_exif_datetime("gestern").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn test_resolve_creation_timestamp_order() {
        let mtime = parse_exif_datetime("2024:01:01 00:00:00+01:00").unwrap().0;

        // Video with CreationDate: the tag wins.
        let tags = MediaTags {
            creation_date: Some("2023:08:01 10:15:00+02:00".to_string()),
            ..Default::default()
        };
        let (dt, assumed) = resolve_creation_timestamp(MediaKind::Video, &tags, mtime);
        assert!(!assumed);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2023-08-01");

        // Video without dates: mtime fallback, zone assumed.
        let (dt, assumed) =
            resolve_creation_timestamp(MediaKind::Video, &MediaTags::default(), mtime);
        assert!(assumed);
        assert_eq!(dt, mtime);

        // Still with DateTimeOriginal + offset.
        let tags = MediaTags {
            date_time_original: Some("2023:05:03 09:00:00".to_string()),
            offset_time_original: Some("+02:00".to_string()),
            ..Default::default()
        };
        let (dt, assumed) = resolve_creation_timestamp(MediaKind::Image, &tags, mtime);
        assert!(!assumed);
        assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_content_create_date_fallback() {
        let mtime = parse_exif_datetime("2024:01:01 00:00:00+01:00").unwrap().0;
        let tags = MediaTags {
            content_create_date: Some("2022:12:24 18:00:00+01:00".to_string()),
            ..Default::default()
        };
        let (dt, assumed) = resolve_creation_timestamp(MediaKind::Video, &tags, mtime);
        assert!(!assumed);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2022-12-24");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_parse_framerate_rational(num in 1u32..120_000, den in 1u32..1_001) {
            let raw = format!("{}/{}", num, den);
            let parsed = parse_framerate(&raw).expect("valid rational");
            prop_assert!((parsed - num as f64 / den as f64).abs() < 1e-9);
        }

        #[test]
        fn prop_parse_framerate_zero_denominator_is_none(num in 0u32..1000) {
            let raw = format!("{}/0", num);
            prop_assert!(parse_framerate(&raw).is_none());
        }

        #[test]
        fn prop_exif_datetime_roundtrips_date(
            year in 1990i32..2100,
            month in 1u32..13,
            day in 1u32..29,
            hour in 0u32..24,
            minute in 0u32..60,
        ) {
            let raw = format!("{:04}:{:02}:{:02} {:02}:{:02}:00+02:00", year, month, day, hour, minute);
            let (dt, assumed) = parse_exif_datetime(&raw).expect("valid timestamp");
            prop_assert!(!assumed);
            prop_assert_eq!(
                dt.format("%Y-%m-%d").to_string(),
                format!("{:04}-{:02}-{:02}", year, month, day)
            );
        }
    }

    #[test]
    fn test_probe_cache_misses_on_unreadable_file() {
        let mut cache = ProbeCache::new();
        let err = cache.probe(Path::new("/no/such/file.mov")).unwrap_err();
        assert!(matches!(err, ProbeError::FileUnreadable { .. }));
        assert!(cache.is_empty());
    }
}
