use crate::fingerprint::recompute_fingerprint;
use crate::indicators::compute_ci_codes;
use crate::scoring::{score_session, SCORING_VERSION};
use crate::session::SessionResult;
use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const PACK_SCHEMA_VERSION: &str = "1.0";

static PACK_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/packs");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A versioned stimulus word list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StimulusPack {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub words: Vec<String>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
}

/// Read-only lookup of stimulus packs by id and version.
pub trait StimulusRegistry {
    fn lookup(&self, id: &str, version: &str) -> Option<StimulusPack>;
    fn list(&self) -> Vec<(String, String)>;

    fn require(&self, id: &str, version: &str) -> crate::error::Result<StimulusPack> {
        self.lookup(id, version)
            .ok_or_else(|| crate::error::Error::UnknownPack {
                id: id.to_string(),
                version: version.to_string(),
            })
    }
}

/// Packs compiled into the binary from `src/packs/<id>@<version>.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedRegistry;

impl StimulusRegistry for EmbeddedRegistry {
    fn lookup(&self, id: &str, version: &str) -> Option<StimulusPack> {
        let file = PACK_DIR.get_file(format!("{id}@{version}.json"))?;
        let contents = file.contents_utf8()?;
        match serde_json::from_str(contents) {
            Ok(pack) => Some(pack),
            Err(e) => {
                tracing::warn!("bundled pack {id}@{version} is unreadable: {e}");
                None
            }
        }
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = PACK_DIR
            .files()
            .filter_map(|f| f.path().file_stem()?.to_str())
            .filter_map(|stem| stem.split_once('@'))
            .map(|(id, version)| (id.to_string(), version.to_string()))
            .collect();
        out.sort();
        out
    }
}

/// Custom packs held in memory, keyed by `(id, version)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    packs: HashMap<(String, String), StimulusPack>,
}

impl InMemoryRegistry {
    pub fn insert(&mut self, pack: StimulusPack) {
        self.packs
            .insert((pack.id.clone(), pack.version.clone()), pack);
    }
}

impl StimulusRegistry for InMemoryRegistry {
    fn lookup(&self, id: &str, version: &str) -> Option<StimulusPack> {
        self.packs
            .get(&(id.to_string(), version.to_string()))
            .cloned()
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self.packs.keys().cloned().collect();
        out.sort();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingId,
    MissingVersion,
    EmptyWordList,
    EmptyWord,
    DuplicateWords,
    MissingProvenance,
    MissingFingerprint,
    FingerprintMismatch,
    ScoringMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// Collects every problem with a pack. An empty result means the pack is valid.
pub fn validate_pack(pack: &StimulusPack) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if pack.id.trim().is_empty() {
        errors.push(ValidationError::new(
            "id",
            ValidationCode::MissingId,
            "Pack id is required",
        ));
    }
    if pack.version.trim().is_empty() {
        errors.push(ValidationError::new(
            "version",
            ValidationCode::MissingVersion,
            "Pack version is required",
        ));
    }
    if pack.words.is_empty() {
        errors.push(ValidationError::new(
            "words",
            ValidationCode::EmptyWordList,
            "Pack must contain at least one word",
        ));
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for (i, word) in pack.words.iter().enumerate() {
        if word.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("words[{i}]"),
                ValidationCode::EmptyWord,
                "Words must not be blank",
            ));
        } else if !seen.insert(word.as_str()) && !duplicates.contains(word) {
            duplicates.push(word.clone());
        }
    }
    if !duplicates.is_empty() {
        errors.push(ValidationError::new(
            "words",
            ValidationCode::DuplicateWords,
            format!("Duplicate words: {}", duplicates.join(", ")),
        ));
    }

    if pack
        .provenance
        .as_ref()
        .map_or(true, |p| p.source.trim().is_empty())
    {
        errors.push(ValidationError::new(
            "provenance",
            ValidationCode::MissingProvenance,
            "Pack provenance source is required",
        ));
    }

    errors
}

/// Collects every structural problem with a stored or imported session.
///
/// Scoring is only compared when the session was scored by this engine version; older
/// sessions keep their original scoring and are checked for trial count only.
pub fn validate_session(session: &SessionResult) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if session.id.trim().is_empty() {
        errors.push(ValidationError::new(
            "id",
            ValidationCode::MissingId,
            "Session id is required",
        ));
    }

    if session.session_fingerprint.is_empty() {
        errors.push(ValidationError::new(
            "sessionFingerprint",
            ValidationCode::MissingFingerprint,
            "Session fingerprint is required",
        ));
    } else if recompute_fingerprint(session) != session.session_fingerprint {
        errors.push(ValidationError::new(
            "sessionFingerprint",
            ValidationCode::FingerprintMismatch,
            "Fingerprint does not match config and stimulus order",
        ));
    }

    let rescored = score_session(&session.trials);
    let mismatch = if session.scoring_version == SCORING_VERSION {
        rescored != session.scoring
            || (!session.candidate_complexes.is_empty()
                && compute_ci_codes(&session.trials) != session.candidate_complexes)
    } else {
        rescored.summary.total_trials != session.scoring.summary.total_trials
    };
    if mismatch {
        errors.push(ValidationError::new(
            "scoring",
            ValidationCode::ScoringMismatch,
            "Stored scoring does not match the trials",
        ));
    }

    errors
}
