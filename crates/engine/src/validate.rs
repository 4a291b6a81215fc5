//! Read-only library validation.
//!
//! Walks every library slot and reports structural violations: corrupt
//! metadata, non-canonical filenames, version-ordering violations against
//! the archived previous versions, and undersized video files. Nothing is
//! modified; findings feed the summary and the exit code.

use crate::metadata::{inspect_slot, SlotCorruption, METADATEN_FILE, VORHERIGE_VERSIONEN};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFinding {
    /// The slot directory the finding is about.
    pub slot: PathBuf,
    pub severity: Severity,
    pub kind: FindingKind,
}

/// What was found.
#[derive(Debug, Clone, PartialEq)]
pub enum FindingKind {
    /// The slot's metadata is unusable.
    CorruptMetadata(SlotCorruption),
    /// A filename outside the canonical set.
    NonCanonicalFile(String),
    /// The current version is not strictly above an archived one.
    VersionOrdering { current: u32, archived: u32 },
    /// The largest video in the slot is below the size threshold.
    UndersizedVideo { file: String, size_bytes: u64 },
    /// Neither a video nor an image exists next to the metadata.
    MissingAssets,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::CorruptMetadata(c) => write!(f, "corrupt metadata: {}", c),
            FindingKind::NonCanonicalFile(name) => write!(f, "non-canonical file '{}'", name),
            FindingKind::VersionOrdering { current, archived } => write!(
                f,
                "version {} not above archived version {}",
                current, archived
            ),
            FindingKind::UndersizedVideo { file, size_bytes } => {
                write!(f, "undersized video '{}' ({} bytes)", file, size_bytes)
            }
            FindingKind::MissingAssets => write!(f, "no video or image next to the metadata"),
        }
    }
}

/// Result of one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
    pub slots_checked: usize,
}

impl ValidationReport {
    pub fn has_fatal(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Fatal)
    }

    pub fn exit_code(&self) -> u8 {
        if self.has_fatal() {
            1
        } else {
            0
        }
    }
}

fn is_year_dir(name: &str) -> bool {
    name.len() == 4 && name.chars().all(|c| c.is_ascii_digit())
}

/// Reads the `Titel` field leniently from a slot's yaml.
fn read_titel(slot_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(slot_dir.join(METADATEN_FILE)).ok()?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content).ok()?;
    value
        .as_mapping()?
        .get(serde_yaml::Value::from("Titel"))?
        .as_str()
        .map(|s| s.to_string())
}

/// Archived `Version_{n}` directories in the year's archive whose metadata
/// carries the given title.
fn archived_versions_for_title(year_dir: &Path, titel: &str) -> Vec<u32> {
    let archive_root = year_dir.join(VORHERIGE_VERSIONEN);
    let Ok(entries) = fs::read_dir(&archive_root) else {
        return Vec::new();
    };

    let mut versions = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(n) = name
            .strip_prefix("Version_")
            .and_then(|v| v.parse::<u32>().ok())
        else {
            continue;
        };
        if read_titel(&entry.path()).as_deref() == Some(titel) {
            versions.push(n);
        }
    }
    versions
}

fn validate_slot(year_dir: &Path, slot_dir: &Path, min_video_bytes: u64) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    let finding = |severity, kind| ValidationFinding {
        slot: slot_dir.to_path_buf(),
        severity,
        kind,
    };

    let info = match inspect_slot(slot_dir) {
        Ok(info) => Some(info),
        Err(corruption) => {
            findings.push(finding(
                Severity::Fatal,
                FindingKind::CorruptMetadata(corruption),
            ));
            None
        }
    };

    let mut has_video = false;
    let mut has_image = false;
    let mut largest_video: Option<(String, u64)> = None;

    if let Ok(entries) = fs::read_dir(slot_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !crate::metadata::is_canonical_name(&name) {
                findings.push(finding(
                    Severity::Fatal,
                    FindingKind::NonCanonicalFile(name.clone()),
                ));
                continue;
            }
            if name.starts_with("Video-") {
                has_video = true;
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if largest_video
                    .as_ref()
                    .map(|(_, s)| size > *s)
                    .unwrap_or(true)
                {
                    largest_video = Some((name.clone(), size));
                }
            }
            if name.starts_with("Titelbild.") {
                has_image = true;
            }
        }
    }

    if let Some((file, size_bytes)) = largest_video {
        if size_bytes < min_video_bytes {
            findings.push(finding(
                Severity::Fatal,
                FindingKind::UndersizedVideo { file, size_bytes },
            ));
        }
    }

    if !has_video && !has_image {
        findings.push(finding(Severity::Fatal, FindingKind::MissingAssets));
    }

    if let Some(info) = info {
        if let Some(titel) = read_titel(slot_dir) {
            for archived in archived_versions_for_title(year_dir, &titel) {
                if info.version <= archived {
                    findings.push(finding(
                        Severity::Fatal,
                        FindingKind::VersionOrdering {
                            current: info.version,
                            archived,
                        },
                    ));
                }
            }
        }
    }

    findings
}

/// Validates every slot in the library.
pub fn validate_library(library_root: &Path, min_video_bytes: u64) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Ok(years) = fs::read_dir(library_root) else {
        return report;
    };

    for year_entry in years.filter_map(|e| e.ok()) {
        let year_name = year_entry.file_name().to_string_lossy().to_string();
        if !year_entry.path().is_dir() || !is_year_dir(&year_name) {
            continue;
        }

        let Ok(slots) = fs::read_dir(year_entry.path()) else {
            continue;
        };
        for slot_entry in slots.filter_map(|e| e.ok()) {
            let slot_name = slot_entry.file_name().to_string_lossy().to_string();
            if !slot_entry.path().is_dir() || slot_name == VORHERIGE_VERSIONEN {
                continue;
            }

            debug!(slot = %slot_entry.path().display(), "validating slot");
            report.slots_checked += 1;
            report.findings.extend(validate_slot(
                &year_entry.path(),
                &slot_entry.path(),
                min_video_bytes,
            ));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Metadaten, Untertyp};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn write_slot(library: &Path, year: &str, titel: &str, version: u32) -> PathBuf {
        let slot = library
            .join(year)
            .join(format!("{}_{}", year, titel.replace(' ', "_")));
        fs::create_dir_all(&slot).unwrap();

        let mut meta = Metadaten::new(
            titel,
            year,
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 8, 1).unwrap(),
        );
        meta.version = version;
        meta.aufnahmedatum = NaiveDate::from_ymd_opt(2023, 8, 1);
        meta.save(&slot.join(METADATEN_FILE)).unwrap();

        fs::write(slot.join("Video-Internet-HD.m4v"), vec![0u8; 200_000]).unwrap();
        fs::write(slot.join("Titelbild.png"), vec![0u8; 1_000]).unwrap();
        slot
    }

    #[test]
    fn test_healthy_library_passes() {
        let library = TempDir::new().unwrap();
        write_slot(library.path(), "2023", "Fest", 1);
        write_slot(library.path(), "2024", "Wanderung", 3);

        let report = validate_library(library.path(), 102_400);
        assert_eq!(report.slots_checked, 2);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_non_canonical_file_is_fatal() {
        let library = TempDir::new().unwrap();
        let slot = write_slot(library.path(), "2023", "Fest", 1);
        fs::write(slot.join("notizen.txt"), b"x").unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.has_fatal());
        assert!(report.findings.iter().any(|f| matches!(
            &f.kind,
            FindingKind::NonCanonicalFile(name) if name == "notizen.txt"
        )));
    }

    #[test]
    fn test_missing_yaml_is_fatal() {
        let library = TempDir::new().unwrap();
        let slot = library.path().join("2023").join("2023_Fest");
        fs::create_dir_all(&slot).unwrap();
        fs::write(slot.join("Video-Internet-HD.m4v"), vec![0u8; 200_000]).unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.findings.iter().any(|f| matches!(
            &f.kind,
            FindingKind::CorruptMetadata(SlotCorruption::MissingYaml)
        )));
    }

    #[test]
    fn test_undersized_video_is_fatal() {
        let library = TempDir::new().unwrap();
        let slot = write_slot(library.path(), "2023", "Fest", 1);
        fs::write(slot.join("Video-Internet-HD.m4v"), vec![0u8; 500]).unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.findings.iter().any(|f| matches!(
            &f.kind,
            FindingKind::UndersizedVideo { size_bytes: 500, .. }
        )));
    }

    #[test]
    fn test_version_ordering_violation() {
        let library = TempDir::new().unwrap();
        write_slot(library.path(), "2023", "Fest", 2);

        // Archived Version_3 of the same title: current version 2 violates
        // the ordering invariant.
        let archived = library
            .path()
            .join("2023")
            .join(VORHERIGE_VERSIONEN)
            .join("Version_3");
        fs::create_dir_all(&archived).unwrap();
        let mut meta = Metadaten::new(
            "Fest",
            "2023",
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        meta.version = 3;
        meta.aufnahmedatum = NaiveDate::from_ymd_opt(2023, 1, 1);
        meta.save(&archived.join(METADATEN_FILE)).unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.findings.iter().any(|f| matches!(
            f.kind,
            FindingKind::VersionOrdering {
                current: 2,
                archived: 3
            }
        )));
    }

    #[test]
    fn test_archived_other_title_does_not_conflict() {
        let library = TempDir::new().unwrap();
        write_slot(library.path(), "2023", "Fest", 2);

        let archived = library
            .path()
            .join("2023")
            .join(VORHERIGE_VERSIONEN)
            .join("Version_5");
        fs::create_dir_all(&archived).unwrap();
        let mut meta = Metadaten::new(
            "Anderes",
            "2023",
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        meta.version = 5;
        meta.aufnahmedatum = NaiveDate::from_ymd_opt(2023, 1, 1);
        meta.save(&archived.join(METADATEN_FILE)).unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn test_missing_assets() {
        let library = TempDir::new().unwrap();
        let slot = library.path().join("2023").join("2023_Fest");
        fs::create_dir_all(&slot).unwrap();
        let mut meta = Metadaten::new(
            "Fest",
            "2023",
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 8, 1).unwrap(),
        );
        meta.aufnahmedatum = NaiveDate::from_ymd_opt(2023, 8, 1);
        meta.save(&slot.join(METADATEN_FILE)).unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report
            .findings
            .iter()
            .any(|f| matches!(f.kind, FindingKind::MissingAssets)));
    }

    #[test]
    fn test_projekt_tar_is_canonical() {
        let library = TempDir::new().unwrap();
        let slot = write_slot(library.path(), "2023", "Fest", 1);
        fs::write(slot.join("Projekt.tar"), b"tar").unwrap();

        let report = validate_library(library.path(), 102_400);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn test_non_year_directories_are_ignored() {
        let library = TempDir::new().unwrap();
        fs::create_dir_all(library.path().join("irrelevant")).unwrap();
        let report = validate_library(library.path(), 102_400);
        assert_eq!(report.slots_checked, 0);
    }
}
