//! Materialization of an assembled mediaset candidate into a directory.
//!
//! Elected members are moved (not copied) onto their canonical filenames,
//! `Metadaten.yaml` is derived from the elected source's tags plus explicit
//! overrides and written last. Materialization is all-or-nothing per
//! candidate, but completed file moves are never rolled back; a partial
//! directory is left in place and reported.

use crate::assemble::MediasetCandidate;
use crate::classify::RenditionRole;
use crate::metadata::{Metadaten, MetadataError, Untertyp, METADATEN_FILE};
use crate::transcoder::ImageConverter;
use chrono::NaiveDate;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error type for materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A field required for `Metadaten.yaml` could not be derived.
    #[error("Missing required field {field} for '{title}'")]
    MissingRequiredField { field: &'static str, title: String },

    /// Filesystem failure; already-moved files stay where they are.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Poster conversion failed.
    #[error("Poster conversion failed: {0}")]
    Convert(#[from] crate::transcoder::ToolError),
}

/// What to do when a canonical target filename already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Ask on the terminal; overwrite only on an affirmative answer.
    #[default]
    Prompt,
    /// Overwrite without asking (`--no-prompt` runs).
    Overwrite,
    /// Never overwrite; the member stays at its source.
    Keep,
}

/// Explicit overrides from the invocation. Anything set here wins over the
/// probed tags.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOverrides {
    pub titel: Option<String>,
    pub untertyp: Option<Untertyp>,
    pub aufnahmedatum: Option<NaiveDate>,
    pub zeitraum: Option<String>,
    pub beschreibung: Option<String>,
    pub notiz: Option<String>,
    pub album: Option<String>,
    pub studio: Option<String>,
    pub filmfassung_name: Option<String>,
    pub filmfassung_beschreibung: Option<String>,
}

/// Options for one materialization pass.
pub struct MaterializeOptions<'a> {
    pub conflict: ConflictPolicy,
    pub converter: Option<&'a dyn ImageConverter>,
    pub overrides: MaterializeOverrides,
    /// Date written as the initial `Mediatheksdatum`; the integrator
    /// rewrites it on commit.
    pub today: NaiveDate,
}

/// A materialized mediaset directory.
#[derive(Debug)]
pub struct MaterializedSet {
    /// The mediaset directory (`{year}_{sanitized_title}`).
    pub dir: PathBuf,
    /// Performed moves as `(source, target)` pairs.
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Targets left untouched because of the conflict policy.
    pub skipped_conflicts: Vec<PathBuf>,
}

/// Canonical filename for a rendition role. Masters and unclassified files
/// never enter a mediaset directory.
pub fn canonical_rendition_name(role: RenditionRole) -> Option<&'static str> {
    match role {
        RenditionRole::Medienserver => Some("Video-Medienserver.mov"),
        RenditionRole::Internet4K => Some("Video-Internet-4K.m4v"),
        RenditionRole::InternetHD => Some("Video-Internet-HD.m4v"),
        RenditionRole::InternetSD => Some("Video-Internet-SD.m4v"),
        RenditionRole::Master | RenditionRole::Poster | RenditionRole::Unknown => None,
    }
}

/// Canonical poster filename for a given source extension.
pub fn canonical_poster_name(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("Titelbild.png"),
        "jpg" | "jpeg" | "heic" => Some("Titelbild.jpg"),
        _ => None,
    }
}

/// Splits a people tag on `,` and `;` into a sequence.
pub fn split_people(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Converts a duration string into integer seconds.
///
/// Accepted forms: `h:mm:ss[.fff]`, `mm:ss`, and exiftool's `NN.NN s`.
pub fn parse_duration_secs(raw: &str) -> Option<u64> {
    let t = raw.trim();

    if let Some(num) = t.strip_suffix(" s").or_else(|| t.strip_suffix('s')) {
        let v: f64 = num.trim().parse().ok()?;
        if v < 0.0 {
            return None;
        }
        return Some(v.round() as u64);
    }

    let parts: Vec<&str> = t.split(':').collect();
    let (h, m, s): (u64, u64, f64) = match parts.as_slice() {
        [h, m, s] => (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?),
        [m, s] => (0, m.parse().ok()?, s.parse().ok()?),
        _ => return None,
    };
    if s < 0.0 {
        return None;
    }
    Some((h * 3600 + m * 60) as u64 + s.round() as u64)
}

/// Maps the share-category tag onto an Untertyp. Anything that is not
/// recognizably a retrospective defaults to a dated event.
pub fn untertyp_from_share_category(category: Option<&str>) -> Untertyp {
    match category {
        Some(c) => {
            let lower = c.to_lowercase();
            if lower.contains("rückblick")
                || lower.contains("rueckblick")
                || lower.contains("retrospective")
            {
                Untertyp::Rueckblick
            } else {
                Untertyp::Ereignis
            }
        }
        None => Untertyp::Ereignis,
    }
}

/// Derives the `Metadaten.yaml` record for a candidate from the elected
/// source's tags and the explicit overrides.
pub fn derive_metadaten(
    candidate: &MediasetCandidate,
    overrides: &MaterializeOverrides,
    today: NaiveDate,
) -> Result<Metadaten, MaterializeError> {
    let titel = overrides
        .titel
        .clone()
        .unwrap_or_else(|| candidate.key.title().to_string());
    if titel.is_empty() {
        return Err(MaterializeError::MissingRequiredField {
            field: "Titel",
            title: candidate.full_title.clone(),
        });
    }

    let jahr = format!("{:04}", candidate.year());
    let tags = &candidate.elected_source.tags;

    let untertyp = overrides
        .untertyp
        .unwrap_or_else(|| untertyp_from_share_category(tags.share_category.as_deref()));

    let mut meta = Metadaten::new(titel.clone(), jahr, untertyp, today);

    match untertyp {
        Untertyp::Ereignis => {
            meta.aufnahmedatum = overrides.aufnahmedatum.or(candidate.content_date);
            if meta.aufnahmedatum.is_none() {
                return Err(MaterializeError::MissingRequiredField {
                    field: "Aufnahmedatum",
                    title: titel,
                });
            }
        }
        Untertyp::Rueckblick => {
            meta.zeitraum = overrides.zeitraum.clone();
            if meta.zeitraum.is_none() {
                return Err(MaterializeError::MissingRequiredField {
                    field: "Zeitraum",
                    title: titel,
                });
            }
        }
    }

    meta.beschreibung = overrides.beschreibung.clone().or_else(|| tags.description.clone());
    meta.notiz = overrides.notiz.clone();
    meta.album = overrides.album.clone().or_else(|| tags.album.clone());
    meta.studio = overrides.studio.clone();
    meta.filmfassung_name = overrides.filmfassung_name.clone();
    meta.filmfassung_beschreibung = overrides.filmfassung_beschreibung.clone();

    let mut schluesselwoerter = tags.keywords.clone();
    if let Some(genre) = &tags.genre {
        if !schluesselwoerter.iter().any(|k| k == genre) {
            schluesselwoerter.push(genre.clone());
        }
    }
    if !schluesselwoerter.is_empty() {
        meta.schluesselwoerter = Some(schluesselwoerter);
    }

    if let Some(producer) = &tags.producer {
        let people = split_people(producer);
        if !people.is_empty() {
            meta.videoschnitt = Some(people);
        }
    }
    if let Some(director) = &tags.director {
        let people = split_people(director);
        if !people.is_empty() {
            meta.kamerafuehrung = Some(people);
        }
    }

    meta.dauer_in_sekunden = tags
        .duration_tag
        .as_deref()
        .and_then(parse_duration_secs)
        .or_else(|| {
            candidate
                .elected_source
                .video
                .as_ref()
                .and_then(|v| v.duration_secs)
                .map(|d| d.round() as u64)
        });

    Ok(meta)
}

/// Moves a file, falling back to copy-and-remove across filesystems.
fn move_file(source: &Path, target: &Path) -> Result<(), MaterializeError> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).map_err(|e| MaterializeError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;
    fs::remove_file(source).map_err(|e| MaterializeError::Io {
        path: source.to_path_buf(),
        source: e,
    })
}

fn prompt_overwrite(target: &Path) -> bool {
    print!("{} existiert bereits. Überschreiben? [j/N] ", target.display());
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "j" | "ja" | "y" | "yes")
}

fn clear_target(
    target: &Path,
    conflict: ConflictPolicy,
    skipped: &mut Vec<PathBuf>,
) -> Result<bool, MaterializeError> {
    if !target.exists() {
        return Ok(true);
    }
    let overwrite = match conflict {
        ConflictPolicy::Overwrite => true,
        ConflictPolicy::Keep => false,
        ConflictPolicy::Prompt => prompt_overwrite(target),
    };
    if !overwrite {
        skipped.push(target.to_path_buf());
        return Ok(false);
    }
    fs::remove_file(target).map_err(|e| MaterializeError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;
    Ok(true)
}

/// Materializes a candidate into `output_root`.
///
/// The directory name is `{year}_{sanitized_title}`; members move onto
/// their canonical names; `Metadaten.yaml` is written last.
pub fn materialize(
    candidate: &MediasetCandidate,
    output_root: &Path,
    options: &MaterializeOptions<'_>,
) -> Result<MaterializedSet, MaterializeError> {
    // Derive the metadata first: a candidate that cannot produce a valid
    // record must fail before any file has moved.
    let meta = derive_metadaten(candidate, &options.overrides, options.today)?;

    let dir = output_root.join(format!("{}_{}", meta.jahr, candidate.key.fs_name()));
    fs::create_dir_all(&dir).map_err(|e| MaterializeError::Io {
        path: dir.clone(),
        source: e,
    })?;

    let mut result = MaterializedSet {
        dir: dir.clone(),
        moved: Vec::new(),
        skipped_conflicts: Vec::new(),
    };

    for (file, role) in &candidate.members {
        match role {
            RenditionRole::Poster => {
                let Some(name) = canonical_poster_name(&file.extension) else {
                    warn!(path = %file.path.display(), "poster with unsupported extension");
                    continue;
                };
                let target = dir.join(name);
                if !clear_target(&target, options.conflict, &mut result.skipped_conflicts)? {
                    continue;
                }
                if file.extension == "heic" {
                    // HEIC never lands in the set directly; it is converted
                    // to JPEG and the original stays at the source.
                    match options.converter {
                        Some(converter) => {
                            converter.convert_to_jpeg(&file.path, &target)?;
                            result.moved.push((file.path.clone(), target));
                        }
                        None => {
                            warn!(path = %file.path.display(), "no image converter available, poster skipped");
                        }
                    }
                } else {
                    move_file(&file.path, &target)?;
                    result.moved.push((file.path.clone(), target));
                }
            }
            role => {
                let Some(name) = canonical_rendition_name(*role) else {
                    // Masters and unclassified members stay at the source.
                    continue;
                };
                let target = dir.join(name);
                if !clear_target(&target, options.conflict, &mut result.skipped_conflicts)? {
                    continue;
                }
                move_file(&file.path, &target)?;
                result.moved.push((file.path.clone(), target));
            }
        }
    }

    // The yaml is written last so a reader that finds it sees a complete
    // rendition set.
    meta.validate()?;
    meta.save(&dir.join(METADATEN_FILE))?;

    info!(dir = %dir.display(), moved = result.moved.len(), "materialized mediaset");
    Ok(result)
}
