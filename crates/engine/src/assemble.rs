//! Mediaset assembler: groups probed files into mediaset candidates.
//!
//! Scanning and probing feed a pure grouping stage: files are keyed by their
//! derived title, a metadata source is elected per group, every member gets
//! a rendition role, and posters are matched by filename prefix.

use crate::classify::{self, MediasetKey, RenditionRole};
use crate::probe::{ProbeCache, ProbeError, ProbedFile};
use crate::scan::{self, MediaKind};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A probed file that failed probing, kept for the diagnostics output.
#[derive(Debug)]
pub struct ProbeFailure {
    pub path: PathBuf,
    pub error: ProbeError,
}

/// Why a whole group was dropped from assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No `.mov` or `.mp4`/`.m4v` file exists to elect as metadata source.
    NoElectableSource,
    /// The derived title sanitized down to nothing.
    EmptyTitle,
}

/// A dropped group with its member paths, for the diagnostics output.
#[derive(Debug, Clone)]
pub struct DroppedGroup {
    pub key: MediasetKey,
    pub reason: DropReason,
    pub files: Vec<PathBuf>,
}

/// An in-flight mediaset assembly.
#[derive(Debug, Clone)]
pub struct MediasetCandidate {
    /// Normalized title key.
    pub key: MediasetKey,
    /// Untrimmed title of the elected source, used for poster prefix matching.
    pub full_title: String,
    /// Content date captured from the title prefix, if any.
    pub content_date: Option<NaiveDate>,
    /// Elected members, one per rendition role.
    pub members: Vec<(Arc<ProbedFile>, RenditionRole)>,
    /// Members that lost a duplicate-role election. Never silently dropped.
    pub shadowed: Vec<(Arc<ProbedFile>, RenditionRole)>,
    /// The file whose tags feed `Metadaten.yaml`.
    pub elected_source: Arc<ProbedFile>,
}

impl MediasetCandidate {
    /// The member holding the given role, if present.
    pub fn member(&self, role: RenditionRole) -> Option<&Arc<ProbedFile>> {
        self.members
            .iter()
            .find(|(_, r)| *r == role)
            .map(|(f, _)| f)
    }

    pub fn has_role(&self, role: RenditionRole) -> bool {
        self.member(role).is_some()
    }

    /// Year of the mediaset: content date first, else the elected source's
    /// resolved creation timestamp.
    pub fn year(&self) -> i32 {
        self.content_date
            .map(|d| d.year())
            .unwrap_or_else(|| self.elected_source.created.date_naive().year())
    }

    /// Adds a member under the one-per-role invariant: on a duplicate role
    /// the larger file wins and the loser is recorded as shadowed.
    pub fn add_member(&mut self, file: Arc<ProbedFile>, role: RenditionRole) {
        if role == RenditionRole::Unknown {
            self.members.push((file, role));
            return;
        }
        if let Some(pos) = self.members.iter().position(|(_, r)| *r == role) {
            if file.size_bytes > self.members[pos].0.size_bytes {
                let loser = std::mem::replace(&mut self.members[pos], (file, role));
                self.shadowed.push(loser);
            } else {
                self.shadowed.push((file, role));
            }
        } else {
            self.members.push((file, role));
        }
    }
}

/// Result of an assembly run.
#[derive(Debug, Default)]
pub struct AssembleReport {
    /// Candidates in directory-traversal order.
    pub candidates: Vec<MediasetCandidate>,
    /// Files excluded because probing failed.
    pub probe_failures: Vec<ProbeFailure>,
    /// Groups dropped with a structured reason.
    pub dropped: Vec<DroppedGroup>,
    /// Total number of successfully probed files.
    pub probed_count: usize,
}

/// Elects the metadata source for a group of probed videos: the largest
/// `.mov`, failing that the largest `.mp4`/`.m4v`.
pub fn elect_source(videos: &[Arc<ProbedFile>]) -> Option<Arc<ProbedFile>> {
    let largest_of = |ext_ok: &dyn Fn(&str) -> bool| {
        videos
            .iter()
            .filter(|f| ext_ok(f.extension.as_str()))
            .max_by_key(|f| f.size_bytes)
            .cloned()
    };

    largest_of(&|ext| ext == "mov").or_else(|| largest_of(&|ext| ext == "mp4" || ext == "m4v"))
}

/// Finds the poster for a group: images whose stem begins with the group's
/// full title, or with the stem of one of its video members. PNG beats
/// JPEG; ties resolve to the first match in traversal order.
pub fn match_poster(
    images: &[Arc<ProbedFile>],
    full_title: &str,
    video_stems: &[String],
) -> Option<Arc<ProbedFile>> {
    let mut candidates: Vec<&Arc<ProbedFile>> = images
        .iter()
        .filter(|img| {
            let stem = img.stem();
            stem.starts_with(full_title)
                || video_stems.iter().any(|vs| !vs.is_empty() && stem.starts_with(vs.as_str()))
        })
        .collect();

    // Stable sort keeps traversal order within the same extension class.
    candidates.sort_by_key(|img| classify::poster_preference(&img.extension));
    candidates.first().map(|img| Arc::clone(img))
}

/// Groups probed files into mediaset candidates.
///
/// Pure over its inputs; scanning and probing happen in [`assemble`].
pub fn group_candidates(probed: Vec<Arc<ProbedFile>>) -> AssembleReport {
    let mut report = AssembleReport {
        probed_count: probed.len(),
        ..Default::default()
    };

    let images: Vec<Arc<ProbedFile>> = probed
        .iter()
        .filter(|f| f.kind == MediaKind::Image)
        .cloned()
        .collect();

    // Group videos by derived key, preserving traversal order of first
    // appearance.
    let mut order: Vec<MediasetKey> = Vec::new();
    let mut groups: HashMap<MediasetKey, Vec<Arc<ProbedFile>>> = HashMap::new();
    for file in probed.iter().filter(|f| f.kind == MediaKind::Video) {
        let derivation = classify::derive_title(file);
        if !groups.contains_key(&derivation.key) {
            order.push(derivation.key.clone());
        }
        groups
            .entry(derivation.key)
            .or_default()
            .push(Arc::clone(file));
    }

    for key in order {
        let Some(videos) = groups.remove(&key) else {
            continue;
        };
        let files: Vec<PathBuf> = videos.iter().map(|f| f.path.clone()).collect();

        if key.is_empty() {
            warn!(?files, "dropping group with empty title");
            report.dropped.push(DroppedGroup {
                key,
                reason: DropReason::EmptyTitle,
                files,
            });
            continue;
        }

        let Some(elected_source) = elect_source(&videos) else {
            warn!(title = %key, "no electable metadata source, dropping group");
            report.dropped.push(DroppedGroup {
                key,
                reason: DropReason::NoElectableSource,
                files,
            });
            continue;
        };

        let source_derivation = classify::derive_title(&elected_source);
        let mut candidate = MediasetCandidate {
            key: key.clone(),
            full_title: source_derivation.full_title,
            content_date: source_derivation.content_date,
            members: Vec::new(),
            shadowed: Vec::new(),
            elected_source: Arc::clone(&elected_source),
        };

        for video in &videos {
            let role = classify::classify_role(video);
            if let Some(info) = &video.video {
                if classify::is_hevc_a(info) {
                    debug!(path = %video.path.display(), "HEVC-A stream");
                }
            }
            candidate.add_member(Arc::clone(video), role);
        }

        let video_stems: Vec<String> = videos.iter().map(|v| v.stem()).collect();
        match match_poster(&images, &candidate.full_title, &video_stems) {
            Some(poster) => candidate.add_member(poster, RenditionRole::Poster),
            None => {
                warn!(title = %key, "no poster found for mediaset");
            }
        }

        debug!(
            title = %key,
            members = candidate.members.len(),
            shadowed = candidate.shadowed.len(),
            "assembled candidate"
        );
        report.candidates.push(candidate);
    }

    report
}

/// Scans the given directories, probes every media file, and groups the
/// results into mediaset candidates.
pub fn assemble(
    search_dirs: &[PathBuf],
    additional_dirs: &[PathBuf],
    cache: &mut ProbeCache,
) -> AssembleReport {
    let mut roots: Vec<PathBuf> = search_dirs.to_vec();
    roots.extend(additional_dirs.iter().cloned());

    let scanned = scan::scan_sources(&roots);
    let mut probed = Vec::new();
    let mut failures = Vec::new();

    for candidate in scanned {
        match cache.probe(&candidate.path) {
            Ok(file) => probed.push(file),
            Err(error) => {
                warn!(path = %candidate.path.display(), %error, "probe failed");
                failures.push(ProbeFailure {
                    path: candidate.path,
                    error,
                });
            }
        }
    }

    let mut report = group_candidates(probed);
    report.probe_failures = failures;
    report
}
