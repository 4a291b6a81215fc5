//! The `Metadaten.yaml` record of a mediaset.
//!
//! The file is canonical: a library consumer reading it must obtain every
//! field it needs without consulting the underlying video tags. Keys keep
//! their German names and casing exactly; dates are `YYYY-MM-DD`; sequences
//! are block sequences.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use ulid::Ulid;

/// Current schema version written into new files.
pub const SPEZIFIKATIONSVERSION: &str = "1.0";

/// Schema pointer emitted as the first line of every file.
pub const SCHEMA_URL: &str = "https://schema.mediathek.example/metadaten-1.0.json";

/// Canonical metadata filename inside a mediaset directory.
pub const METADATEN_FILE: &str = "Metadaten.yaml";

/// Directory holding archived prior versions next to the year's slots.
pub const VORHERIGE_VERSIONEN: &str = "Vorherige_Versionen";

/// The closed set of filenames permitted inside a mediaset directory.
pub const CANONICAL_FILENAMES: &[&str] = &[
    "Video-Medienserver.mov",
    "Video-Internet-4K.m4v",
    "Video-Internet-HD.m4v",
    "Video-Internet-SD.m4v",
    "Titelbild.png",
    "Titelbild.jpg",
    "Projekt.tar",
    METADATEN_FILE,
];

/// True when `name` is drawn from the canonical filename set.
pub fn is_canonical_name(name: &str) -> bool {
    CANONICAL_FILENAMES.contains(&name)
}

/// Error type for metadata operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error on {path}: {source}")]
    Yaml {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required field is missing for the record's Untertyp.
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: &'static str },
}

/// Mediaset type. Currently a single variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Typ {
    Familienfilm,
}

impl Default for Typ {
    fn default() -> Self {
        Typ::Familienfilm
    }
}

/// Mediaset flavor: a single dated event or a retrospective over a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Untertyp {
    Ereignis,
    #[serde(rename = "Rückblick")]
    Rueckblick,
}

impl std::fmt::Display for Untertyp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Untertyp::Ereignis => write!(f, "Ereignis"),
            Untertyp::Rueckblick => write!(f, "Rückblick"),
        }
    }
}

/// The persisted metadata record. Field order is serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadaten {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "Spezifikationsversion")]
    pub spezifikationsversion: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Titel")]
    pub titel: String,
    #[serde(rename = "Typ")]
    pub typ: Typ,
    #[serde(rename = "Untertyp")]
    pub untertyp: Untertyp,
    #[serde(rename = "Jahr")]
    pub jahr: String,
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Mediatheksdatum")]
    pub mediatheksdatum: NaiveDate,
    #[serde(rename = "Aufnahmedatum", skip_serializing_if = "Option::is_none", default)]
    pub aufnahmedatum: Option<NaiveDate>,
    #[serde(rename = "Zeitraum", skip_serializing_if = "Option::is_none", default)]
    pub zeitraum: Option<String>,
    #[serde(rename = "Beschreibung", skip_serializing_if = "Option::is_none", default)]
    pub beschreibung: Option<String>,
    #[serde(rename = "Notiz", skip_serializing_if = "Option::is_none", default)]
    pub notiz: Option<String>,
    #[serde(
        rename = "Schlüsselwörter",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub schluesselwoerter: Option<Vec<String>>,
    #[serde(rename = "Album", skip_serializing_if = "Option::is_none", default)]
    pub album: Option<String>,
    #[serde(rename = "Videoschnitt", skip_serializing_if = "Option::is_none", default)]
    pub videoschnitt: Option<Vec<String>>,
    #[serde(rename = "Kameraführung", skip_serializing_if = "Option::is_none", default)]
    pub kamerafuehrung: Option<Vec<String>>,
    #[serde(
        rename = "Dauer_in_Sekunden",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub dauer_in_sekunden: Option<u64>,
    #[serde(rename = "Studio", skip_serializing_if = "Option::is_none", default)]
    pub studio: Option<String>,
    #[serde(
        rename = "Filmfassung_Name",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub filmfassung_name: Option<String>,
    #[serde(
        rename = "Filmfassung_Beschreibung",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub filmfassung_beschreibung: Option<String>,
}

impl Metadaten {
    /// Creates a fresh record with a newly generated ULID and version 1.
    pub fn new(titel: impl Into<String>, jahr: impl Into<String>, untertyp: Untertyp, mediatheksdatum: NaiveDate) -> Self {
        Self {
            schema: SCHEMA_URL.to_string(),
            spezifikationsversion: SPEZIFIKATIONSVERSION.to_string(),
            id: new_ulid(),
            titel: titel.into(),
            typ: Typ::Familienfilm,
            untertyp,
            jahr: jahr.into(),
            version: 1,
            mediatheksdatum,
            aufnahmedatum: None,
            zeitraum: None,
            beschreibung: None,
            notiz: None,
            schluesselwoerter: None,
            album: None,
            videoschnitt: None,
            kamerafuehrung: None,
            dauer_in_sekunden: None,
            studio: None,
            filmfassung_name: None,
            filmfassung_beschreibung: None,
        }
    }

    /// Checks the Untertyp-dependent requirements.
    ///
    /// `Ereignis` requires an `Aufnahmedatum`, `Rückblick` a `Zeitraum`.
    pub fn validate(&self) -> Result<(), MetadataError> {
        match self.untertyp {
            Untertyp::Ereignis if self.aufnahmedatum.is_none() => {
                Err(MetadataError::MissingRequiredField {
                    field: "Aufnahmedatum",
                })
            }
            Untertyp::Rueckblick if self.zeitraum.is_none() => {
                Err(MetadataError::MissingRequiredField { field: "Zeitraum" })
            }
            _ => Ok(()),
        }
    }

    /// Loads the record from a `Metadaten.yaml` file.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = fs::read_to_string(path).map_err(|e| MetadataError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| MetadataError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Writes the record as UTF-8 YAML, `$schema` first.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| MetadataError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::write(path, yaml).map_err(|e| MetadataError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Generates a new ULID string for a mediaset identity.
pub fn new_ulid() -> String {
    Ulid::new().to_string()
}

/// Structured reasons a library slot's metadata is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotCorruption {
    #[error("Metadaten.yaml is missing")]
    MissingYaml,
    #[error("Metadaten.yaml is not parseable: {0}")]
    UnparseableYaml(String),
    #[error("Id field is missing")]
    MissingId,
    #[error("Mediatheksdatum field is missing or not a date")]
    MissingMediatheksdatum,
    #[error("Version field is not a positive integer")]
    UnparseableVersion,
}

/// The identity facts read from an existing slot's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: String,
    pub version: u32,
    pub mediatheksdatum: NaiveDate,
}

/// Inspects a slot directory's `Metadaten.yaml` leniently.
///
/// Overwrite-vs-new-version decisions need `Id`, `Version` and
/// `Mediatheksdatum` even from files that predate the current schema, so
/// this reads the raw mapping instead of the full record. A missing
/// `Version` is treated as 1 (files from before the field existed).
pub fn inspect_slot(slot_dir: &Path) -> Result<SlotInfo, SlotCorruption> {
    let yaml_path = slot_dir.join(METADATEN_FILE);
    if !yaml_path.is_file() {
        return Err(SlotCorruption::MissingYaml);
    }

    let content =
        fs::read_to_string(&yaml_path).map_err(|e| SlotCorruption::UnparseableYaml(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| SlotCorruption::UnparseableYaml(e.to_string()))?;

    if value.as_mapping().is_none() {
        return Err(SlotCorruption::UnparseableYaml(
            "top level is not a mapping".to_string(),
        ));
    }

    let id = value
        .get("Id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or(SlotCorruption::MissingId)?;

    let mediatheksdatum = value
        .get("Mediatheksdatum")
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or(SlotCorruption::MissingMediatheksdatum)?;

    let version = match value.get("Version") {
        None => 1,
        Some(v) => parse_version_value(v).ok_or(SlotCorruption::UnparseableVersion)?,
    };

    Ok(SlotInfo {
        id,
        version,
        mediatheksdatum,
    })
}

fn parse_version_value(v: &serde_yaml::Value) -> Option<u32> {
    match v {
        serde_yaml::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0),
        serde_yaml::Value::String(s) => s.parse::<u32>().ok().filter(|n| *n > 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Metadaten {
        let mut m = Metadaten::new(
            "Wanderung ins Tal",
            "2023",
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 8, 15).unwrap(),
        );
        m.aufnahmedatum = NaiveDate::from_ymd_opt(2023, 8, 1);
        m.beschreibung = Some("Tagestour im Karwendel".to_string());
        m.schluesselwoerter = Some(vec!["Berge".to_string(), "Familie".to_string()]);
        m.videoschnitt = Some(vec!["A. Muster".to_string()]);
        m.dauer_in_sekunden = Some(755);
        m
    }

    #[test]
    fn test_serialized_form() {
        let yaml = serde_yaml::to_string(&sample()).unwrap();

        // Schema pointer is the first line.
        let first_line = yaml.lines().next().unwrap();
        assert!(first_line.starts_with("$schema:"), "got: {}", first_line);

        // German keys survive exactly.
        assert!(yaml.contains("Spezifikationsversion: '1.0'") || yaml.contains("Spezifikationsversion: \"1.0\""));
        assert!(yaml.contains("Titel: Wanderung ins Tal"));
        assert!(yaml.contains("Typ: Familienfilm"));
        assert!(yaml.contains("Untertyp: Ereignis"));
        assert!(yaml.contains("Schlüsselwörter:"));
        assert!(yaml.contains("- Berge"));
        assert!(yaml.contains("Dauer_in_Sekunden: 755"));

        // Dates are plain YYYY-MM-DD.
        assert!(yaml.contains("Mediatheksdatum: 2023-08-15"));
        assert!(yaml.contains("Aufnahmedatum: 2023-08-01"));
    }

    #[test]
    fn test_absent_optionals_are_omitted() {
        let m = Metadaten::new(
            "Test",
            "2023",
            Untertyp::Ereignis,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        let yaml = serde_yaml::to_string(&m).unwrap();
        assert!(!yaml.contains("Zeitraum"));
        assert!(!yaml.contains("Notiz"));
        assert!(!yaml.contains("Studio"));
        assert!(!yaml.contains("Filmfassung"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATEN_FILE);
        let m = sample();
        m.save(&path).unwrap();

        let loaded = Metadaten::load(&path).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn test_validate_ereignis_requires_aufnahmedatum() {
        let mut m = sample();
        m.aufnahmedatum = None;
        let err = m.validate().unwrap_err();
        assert!(matches!(
            err,
            MetadataError::MissingRequiredField {
                field: "Aufnahmedatum"
            }
        ));
    }

    #[test]
    fn test_validate_rueckblick_requires_zeitraum() {
        let mut m = sample();
        m.untertyp = Untertyp::Rueckblick;
        m.zeitraum = None;
        let err = m.validate().unwrap_err();
        assert!(matches!(
            err,
            MetadataError::MissingRequiredField { field: "Zeitraum" }
        ));

        m.zeitraum = Some("Sommer 2023".to_string());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_untertyp_yaml_names() {
        let yaml = serde_yaml::to_string(&Untertyp::Rueckblick).unwrap();
        assert_eq!(yaml.trim(), "Rückblick");
        let back: Untertyp = serde_yaml::from_str("Rückblick").unwrap();
        assert_eq!(back, Untertyp::Rueckblick);
    }

    #[test]
    fn test_new_ulid_shape() {
        let id = new_ulid();
        assert_eq!(id.len(), 26);
        let other = new_ulid();
        assert_ne!(id, other);
    }

    #[test]
    fn test_canonical_names() {
        for name in CANONICAL_FILENAMES {
            assert!(is_canonical_name(name));
        }
        assert!(!is_canonical_name("movie.mkv"));
        assert!(!is_canonical_name("Titelbild.jpeg"));
        assert!(!is_canonical_name("metadaten.yaml"));
    }

    #[test]
    fn test_inspect_slot_happy_path() {
        let dir = TempDir::new().unwrap();
        sample().save(&dir.path().join(METADATEN_FILE)).unwrap();

        let info = inspect_slot(dir.path()).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(
            info.mediatheksdatum,
            NaiveDate::from_ymd_opt(2023, 8, 15).unwrap()
        );
        assert_eq!(info.id.len(), 26);
    }

    #[test]
    fn test_inspect_slot_missing_yaml() {
        let dir = TempDir::new().unwrap();
        assert_eq!(inspect_slot(dir.path()), Err(SlotCorruption::MissingYaml));
    }

    #[test]
    fn test_inspect_slot_missing_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATEN_FILE),
            "Titel: Test\nMediatheksdatum: 2023-08-15\nVersion: 2\n",
        )
        .unwrap();
        assert_eq!(inspect_slot(dir.path()), Err(SlotCorruption::MissingId));
    }

    #[test]
    fn test_inspect_slot_missing_mediatheksdatum() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATEN_FILE),
            "Id: 01HX5C4T9GJ0Q3YFM8Z2W7K6RD\nVersion: 2\n",
        )
        .unwrap();
        assert_eq!(
            inspect_slot(dir.path()),
            Err(SlotCorruption::MissingMediatheksdatum)
        );
    }

    #[test]
    fn test_inspect_slot_version_defaults_to_one() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATEN_FILE),
            "Id: 01HX5C4T9GJ0Q3YFM8Z2W7K6RD\nMediatheksdatum: 2023-08-15\n",
        )
        .unwrap();
        let info = inspect_slot(dir.path()).unwrap();
        assert_eq!(info.version, 1);
    }

    #[test]
    fn test_inspect_slot_unparseable_version() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATEN_FILE),
            "Id: 01HX5C4T9GJ0Q3YFM8Z2W7K6RD\nMediatheksdatum: 2023-08-15\nVersion: zwei\n",
        )
        .unwrap();
        assert_eq!(
            inspect_slot(dir.path()),
            Err(SlotCorruption::UnparseableVersion)
        );
    }

    #[test]
    fn test_inspect_slot_version_zero_is_unparseable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATEN_FILE),
            "Id: 01HX5C4T9GJ0Q3YFM8Z2W7K6RD\nMediatheksdatum: 2023-08-15\nVersion: 0\n",
        )
        .unwrap();
        assert_eq!(
            inspect_slot(dir.path()),
            Err(SlotCorruption::UnparseableVersion)
        );
    }
}
