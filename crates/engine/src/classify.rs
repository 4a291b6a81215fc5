//! Classifier module for deriving mediaset titles and rendition roles.
//!
//! Given a probed file this module derives the mediaset key (the normalized
//! title), the content date embedded in the title, and the rendition role
//! based on codec, bitrate, and resolution.

use crate::probe::{ProbedFile, VideoStreamInfo};
use crate::scan::MediaKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Role of a rendition within a mediaset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenditionRole {
    /// ProRes master (any variant). Masters feed the transcoder but are
    /// never placed inside a mediaset directory.
    Master,
    /// High-bitrate HEVC rendition for the home media server.
    Medienserver,
    /// Internet delivery rendition, 4K.
    Internet4K,
    /// Internet delivery rendition, 1080p.
    InternetHD,
    /// Internet delivery rendition, SD.
    InternetSD,
    /// Title artwork.
    Poster,
    /// No role could be assigned.
    Unknown,
}

impl std::fmt::Display for RenditionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenditionRole::Master => write!(f, "Master"),
            RenditionRole::Medienserver => write!(f, "Medienserver"),
            RenditionRole::Internet4K => write!(f, "Internet-4K"),
            RenditionRole::InternetHD => write!(f, "Internet-HD"),
            RenditionRole::InternetSD => write!(f, "Internet-SD"),
            RenditionRole::Poster => write!(f, "Titelbild"),
            RenditionRole::Unknown => write!(f, "Unbekannt"),
        }
    }
}

/// Bitrate threshold above which a non-ProRes video is the media-server
/// rendition, regardless of its resolution.
pub const MEDIENSERVER_BITRATE_MBPS: f64 = 50.0;

/// Bitrate threshold above which an HEVC stream carries the informal
/// "HEVC-A" display tag.
pub const HEVC_A_BITRATE_MBPS: f64 = 80.0;

/// Normalized mediaset title.
///
/// The human-readable form keeps spaces; [`MediasetKey::fs_name`] is the
/// filesystem form with whitespace collapsed to underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediasetKey {
    title: String,
}

impl MediasetKey {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Human-readable title, spaces preserved.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Filesystem form: whitespace replaced by underscores.
    pub fn fs_name(&self) -> String {
        self.title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
    }
}

impl std::fmt::Display for MediasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title)
    }
}

/// Result of title derivation for one probed file.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleDerivation {
    /// Normalized mediaset key.
    pub key: MediasetKey,
    /// The raw title before date stripping and sanitization, used for
    /// filename-prefix matching of posters.
    pub full_title: String,
    /// Content date captured from a leading `YYYY-MM-DD` title prefix.
    pub content_date: Option<NaiveDate>,
}

/// Strips a leading `YYYY-MM-DD ` / `YYYY-MM-DD_` (or `YYYY_MM_DD`) token.
///
/// Returns the captured date and the remainder of the string.
pub fn strip_date_prefix(raw: &str) -> (Option<NaiveDate>, &str) {
    let trimmed = raw.trim();
    if trimmed.len() < 10 || !trimmed.is_char_boundary(10) {
        return (None, trimmed);
    }

    let (head, tail) = trimmed.split_at(10);
    let date = NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y_%m_%d"))
        .ok();

    match date {
        Some(d) if tail.is_empty() => (Some(d), ""),
        Some(d) if tail.starts_with(' ') || tail.starts_with('_') => (Some(d), &tail[1..]),
        _ => (None, trimmed),
    }
}

/// Sanitizes a raw title into the normalized human-readable form.
///
/// NFC normalization, then a whitelist of alphanumerics, German umlauts and
/// ` .-_()`; whitespace runs collapse to a single space.
pub fn sanitize_title(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let filtered: String = nfc
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    ' ' | '.' | '-' | '_' | '(' | ')'
                        | 'ä' | 'ö' | 'ü' | 'Ä' | 'Ö' | 'Ü' | 'ß'
                )
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derives the mediaset key, the full title, and the content date for a
/// probed file.
///
/// Title source, first present wins: the Title tag, the DisplayName tag, the
/// filename stem.
pub fn derive_title(probed: &ProbedFile) -> TitleDerivation {
    let raw = probed
        .tags
        .title
        .clone()
        .or_else(|| probed.tags.display_name.clone())
        .unwrap_or_else(|| probed.stem());

    let (content_date, remainder) = strip_date_prefix(&raw);
    TitleDerivation {
        key: MediasetKey::new(sanitize_title(remainder)),
        full_title: raw.trim().to_string(),
        content_date,
    }
}

/// Classifies the rendition role of a video stream.
///
/// ProRes is always the master. Everything else partitions by average
/// bitrate and pixel height.
pub fn classify_video(info: &VideoStreamInfo) -> RenditionRole {
    if info.is_prores() {
        return RenditionRole::Master;
    }

    if let Some(mbps) = info.avg_bitrate_mbps() {
        if mbps > MEDIENSERVER_BITRATE_MBPS {
            return RenditionRole::Medienserver;
        }
    }

    match info.height {
        h if h >= 2048 => RenditionRole::Internet4K,
        1080 => RenditionRole::InternetHD,
        h if h > 0 && h <= 540 => RenditionRole::InternetSD,
        _ => RenditionRole::Unknown,
    }
}

/// Legacy display tag: HEVC streams above 80 Mbit/s are shown as "HEVC-A".
pub fn is_hevc_a(info: &VideoStreamInfo) -> bool {
    info.codec_name.to_lowercase().contains("hevc")
        && info
            .avg_bitrate_mbps()
            .map(|mbps| mbps > HEVC_A_BITRATE_MBPS)
            .unwrap_or(false)
}

/// Classifies the rendition role of any probed file.
pub fn classify_role(probed: &ProbedFile) -> RenditionRole {
    match probed.kind {
        MediaKind::Video => probed
            .video
            .as_ref()
            .map(classify_video)
            .unwrap_or(RenditionRole::Unknown),
        MediaKind::Image => RenditionRole::Poster,
        MediaKind::Other => RenditionRole::Unknown,
    }
}

/// Ordering weight for poster candidates: PNG beats JPEG.
pub fn poster_preference(extension: &str) -> u8 {
    match extension {
        "png" => 0,
        "jpg" => 1,
        "jpeg" => 2,
        _ => 255,
    }
}
