//! Scanner module for discovering media files in source directories.
//!
//! This module provides functionality to recursively scan source roots for
//! video and image files, filtering by extension, dotfiles, and filesystem
//! snapshot directories.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Video file extensions accepted by the scanner (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mov", ".mp4", ".m4v"];

/// Image file extensions accepted by the scanner (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".heic"];

/// Path component marking a filesystem snapshot directory. Anything below
/// such a component is a read-only copy of older state and must not be
/// picked up as source material.
pub const SNAPSHOT_COMPONENT: &str = "#snapshot";

/// Logical kind of a media file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A video container (`.mov`, `.mp4`, `.m4v`).
    Video,
    /// A still image (`.png`, `.jpg`, `.jpeg`, `.heic`).
    Image,
    /// Anything else.
    Other,
}

/// A candidate media file discovered during source scanning.
#[derive(Debug, Clone)]
pub struct ScanCandidate {
    /// Full path to the media file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time of the file.
    pub modified_time: SystemTime,
}

/// Returns the lowercase extension of a path, without the dot.
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Determines the logical media kind of a path from its extension.
pub fn media_kind(path: &Path) -> MediaKind {
    match lowercase_extension(path) {
        Some(ext) => {
            let dotted = format!(".{}", ext);
            if VIDEO_EXTENSIONS.contains(&dotted.as_str()) {
                MediaKind::Video
            } else if IMAGE_EXTENSIONS.contains(&dotted.as_str()) {
                MediaKind::Image
            } else {
                MediaKind::Other
            }
        }
        None => MediaKind::Other,
    }
}

/// Checks if a file has a video or image extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    media_kind(path) != MediaKind::Other
}

/// Checks if any component of the path is a snapshot directory.
pub fn has_snapshot_component(path: &Path) -> bool {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .any(|c| c.contains(SNAPSHOT_COMPONENT))
}

/// Scans the given source roots for media files.
///
/// This function:
/// - Recursively walks each source root directory
/// - Skips hidden directories and snapshot directories entirely
/// - Skips dotfiles
/// - Filters files by the video and image extension sets (case-insensitive)
/// - Captures file size and modified time for later gating
pub fn scan_sources(roots: &[PathBuf]) -> Vec<ScanCandidate> {
    use walkdir::WalkDir;

    let mut candidates = Vec::new();

    for root in roots {
        if !root.exists() {
            continue;
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        // Allow the root directory even if it starts with '.'
                        if name.starts_with('.') && entry.depth() > 0 {
                            return false;
                        }
                        if name.contains(SNAPSHOT_COMPONENT) {
                            return false;
                        }
                    }
                }
                true
            });

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            // Skip dotfiles
            if entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with('.'))
                .unwrap_or(false)
            {
                continue;
            }

            if !is_media_file(path) {
                continue;
            }

            if let Ok(metadata) = entry.metadata() {
                let size_bytes = metadata.len();
                let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

                candidates.push(ScanCandidate {
                    path: path.to_path_buf(),
                    size_bytes,
                    modified_time,
                });
            }
        }
    }

    candidates
}
