//! Library integrator: reconciles a materialized mediaset against the
//! long-lived library.
//!
//! Slot identity lives in `Metadaten.yaml`'s `Id`, never in the directory
//! name. Close-in-time re-integrations overwrite the slot in place and
//! preserve its identity; far-apart ones archive the old slot under
//! `Vorherige_Versionen/Version_{n}` and install the incoming set as a new
//! release. `Metadaten.yaml` is always the last file written, so a reader
//! that finds a valid yaml sees a consistent rendition set.

use crate::classify::{sanitize_title, MediasetKey};
use crate::metadata::{
    inspect_slot, Metadaten, MetadataError, SlotCorruption, METADATEN_FILE, VORHERIGE_VERSIONEN,
};
use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Requested integration behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMode {
    /// Decide by the age of the existing slot.
    #[default]
    Auto,
    /// Replace the slot's files, preserving its identity.
    Overwrite,
    /// Archive the existing slot and install the incoming set as a new
    /// release.
    NewVersion,
}

/// What integration actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationOutcome {
    /// No slot existed; the incoming set became the slot.
    CreatedNew {
        slot_dir: PathBuf,
        id: String,
    },
    /// The slot was overwritten in place; identity preserved.
    Overwrote {
        slot_dir: PathBuf,
        id: String,
        version: u32,
    },
    /// The old slot was archived and the incoming set installed.
    ArchivedAndReplaced {
        slot_dir: PathBuf,
        archived_to: PathBuf,
        version: u32,
    },
}

impl IntegrationOutcome {
    pub fn slot_dir(&self) -> &Path {
        match self {
            IntegrationOutcome::CreatedNew { slot_dir, .. } => slot_dir,
            IntegrationOutcome::Overwrote { slot_dir, .. } => slot_dir,
            IntegrationOutcome::ArchivedAndReplaced { slot_dir, .. } => slot_dir,
        }
    }
}

/// Error type for integration.
#[derive(Debug, Error)]
pub enum IntegrateError {
    /// The existing slot's metadata is unusable; the slot stays untouched.
    #[error("Corrupt library slot {slot_dir}: {corruption}")]
    CorruptSlot {
        slot_dir: PathBuf,
        #[source]
        corruption: SlotCorruption,
    },

    /// The archive target for the displaced version already exists.
    #[error("Version archive already exists: {target}")]
    VersionCollision { target: PathBuf },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> IntegrateError + '_ {
    move |e| IntegrateError::Io {
        path: path.to_path_buf(),
        source: e,
    }
}

/// The mode Auto resolves to for an existing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Overwrite,
    NewVersion,
}

/// Decides overwrite-vs-new-version from the age of the existing slot.
///
/// Re-integrations within the window are revisions of the same release;
/// older slots get archived as a previous version.
pub fn decide_mode(today: NaiveDate, mediatheksdatum: NaiveDate, window_days: i64) -> ResolvedMode {
    let age_days = (today - mediatheksdatum).num_days();
    if age_days > window_days {
        ResolvedMode::NewVersion
    } else {
        ResolvedMode::Overwrite
    }
}

/// The library slot directory for a metadata record.
pub fn slot_dir_for(library_root: &Path, meta: &Metadaten) -> PathBuf {
    let fs_title = MediasetKey::new(sanitize_title(&meta.titel)).fs_name();
    library_root
        .join(&meta.jahr)
        .join(format!("{}_{}", meta.jahr, fs_title))
}

/// Moves a file, falling back to copy-and-remove across filesystems.
fn move_file(source: &Path, target: &Path) -> Result<(), IntegrateError> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).map_err(io_err(target))?;
    fs::remove_file(source).map_err(io_err(source))
}

/// Moves a directory, falling back to a recursive copy across filesystems.
fn move_dir(source: &Path, target: &Path) -> Result<(), IntegrateError> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    copy_dir(source, target)?;
    fs::remove_dir_all(source).map_err(io_err(source))
}

fn copy_dir(source: &Path, target: &Path) -> Result<(), IntegrateError> {
    fs::create_dir_all(target).map_err(io_err(target))?;
    for entry in fs::read_dir(source).map_err(io_err(source))? {
        let entry = entry.map_err(io_err(source))?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(io_err(&to))?;
        }
    }
    Ok(())
}

/// Installs the incoming mediaset at `slot_dir`: renditions first, yaml
/// last, then the emptied incoming directory is removed.
fn install_set(
    incoming_dir: &Path,
    slot_dir: &Path,
    meta: &Metadaten,
) -> Result<(), IntegrateError> {
    fs::create_dir_all(slot_dir).map_err(io_err(slot_dir))?;

    for entry in fs::read_dir(incoming_dir).map_err(io_err(incoming_dir))? {
        let entry = entry.map_err(io_err(incoming_dir))?;
        let name = entry.file_name();
        if name.to_str() == Some(METADATEN_FILE) {
            continue;
        }
        move_file(&entry.path(), &slot_dir.join(&name))?;
    }

    meta.save(&slot_dir.join(METADATEN_FILE))?;
    fs::remove_dir_all(incoming_dir).map_err(io_err(incoming_dir))?;
    Ok(())
}

/// Copies the incoming files over the existing slot, overwriting as
/// needed; yaml last, incoming directory removed afterwards.
fn overwrite_set(
    incoming_dir: &Path,
    slot_dir: &Path,
    meta: &Metadaten,
) -> Result<(), IntegrateError> {
    for entry in fs::read_dir(incoming_dir).map_err(io_err(incoming_dir))? {
        let entry = entry.map_err(io_err(incoming_dir))?;
        let name = entry.file_name();
        if name.to_str() == Some(METADATEN_FILE) {
            continue;
        }
        let target = slot_dir.join(&name);
        fs::copy(entry.path(), &target).map_err(io_err(&target))?;
    }

    meta.save(&slot_dir.join(METADATEN_FILE))?;
    fs::remove_dir_all(incoming_dir).map_err(io_err(incoming_dir))?;
    Ok(())
}

/// Backfills the archived yaml's `Version` field when the file predates it.
fn backfill_archived_version(archived_dir: &Path, version: u32) -> Result<(), IntegrateError> {
    let yaml_path = archived_dir.join(METADATEN_FILE);
    let content = match fs::read_to_string(&yaml_path) {
        Ok(c) => c,
        // A slot that was integrable has a yaml; anything else was caught
        // by inspect_slot before archiving.
        Err(e) => return Err(io_err(&yaml_path)(e)),
    };
    let mut value: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };
    if let Some(mapping) = value.as_mapping_mut() {
        let key = serde_yaml::Value::String("Version".to_string());
        if !mapping.contains_key(&key) {
            mapping.insert(key, serde_yaml::Value::from(version as u64));
            let rewritten = serde_yaml::to_string(&value).map_err(|e| MetadataError::Yaml {
                path: yaml_path.clone(),
                source: e,
            })?;
            fs::write(&yaml_path, rewritten).map_err(io_err(&yaml_path))?;
        }
    }
    Ok(())
}

/// Integrates a materialized mediaset directory into the library.
pub fn integrate(
    mediaset_dir: &Path,
    library_root: &Path,
    mode: IntegrationMode,
    window_days: i64,
    today: NaiveDate,
) -> Result<IntegrationOutcome, IntegrateError> {
    let mut meta = Metadaten::load(&mediaset_dir.join(METADATEN_FILE))?;
    let slot_dir = slot_dir_for(library_root, &meta);

    if !slot_dir.exists() {
        meta.mediatheksdatum = today;
        install_set(mediaset_dir, &slot_dir, &meta)?;
        info!(slot = %slot_dir.display(), id = %meta.id, "created new library slot");
        return Ok(IntegrationOutcome::CreatedNew {
            slot_dir,
            id: meta.id,
        });
    }

    let existing = inspect_slot(&slot_dir).map_err(|corruption| IntegrateError::CorruptSlot {
        slot_dir: slot_dir.clone(),
        corruption,
    })?;

    let resolved = match mode {
        IntegrationMode::Overwrite => ResolvedMode::Overwrite,
        IntegrationMode::NewVersion => ResolvedMode::NewVersion,
        IntegrationMode::Auto => {
            let resolved = decide_mode(today, existing.mediatheksdatum, window_days);
            info!(
                slot = %slot_dir.display(),
                mediatheksdatum = %existing.mediatheksdatum,
                ?resolved,
                "auto mode resolved"
            );
            resolved
        }
    };

    match resolved {
        ResolvedMode::Overwrite => {
            // Identity is preserved: the slot's Id survives every overwrite.
            meta.id = existing.id.clone();
            meta.version = existing.version + 1;
            meta.mediatheksdatum = today;
            overwrite_set(mediaset_dir, &slot_dir, &meta)?;
            info!(slot = %slot_dir.display(), version = meta.version, "overwrote library slot");
            Ok(IntegrationOutcome::Overwrote {
                slot_dir,
                id: meta.id,
                version: meta.version,
            })
        }
        ResolvedMode::NewVersion => {
            let archive_root = library_root.join(&meta.jahr).join(VORHERIGE_VERSIONEN);
            fs::create_dir_all(&archive_root).map_err(io_err(&archive_root))?;

            let archived_to = archive_root.join(format!("Version_{}", existing.version));
            if archived_to.exists() {
                warn!(target = %archived_to.display(), "version archive collision");
                return Err(IntegrateError::VersionCollision {
                    target: archived_to,
                });
            }

            move_dir(&slot_dir, &archived_to)?;
            backfill_archived_version(&archived_to, existing.version)?;

            // The new release keeps its own ULID: it is a distinct entity
            // that happens to occupy the same slot name.
            meta.version = existing.version + 1;
            meta.mediatheksdatum = today;
            install_set(mediaset_dir, &slot_dir, &meta)?;
            info!(
                slot = %slot_dir.display(),
                archived = %archived_to.display(),
                version = meta.version,
                "archived previous version and installed new release"
            );
            Ok(IntegrationOutcome::ArchivedAndReplaced {
                slot_dir,
                archived_to,
                version: meta.version,
            })
        }
    }
}
