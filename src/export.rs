//! Privacy-scoped export bundles.
//!
//! A bundle is always a fresh value: building or anonymizing never touches the source
//! session. Redaction happens in the artifact itself, so a redacted bundle carries no
//! response text anywhere.

use crate::hashing::{compute_words_sha256, sha256_hex};
use crate::pack::{Provenance, StimulusPack, PACK_SCHEMA_VERSION};
use crate::session::SessionResult;
use serde::{Deserialize, Serialize};

pub const EXPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrivacyMode {
    #[default]
    Full,
    Minimal,
    Redacted,
}

impl PrivacyMode {
    pub fn includes_stimulus_words(&self) -> bool {
        matches!(self, PrivacyMode::Full)
    }

    pub fn includes_responses(&self) -> bool {
        matches!(self, PrivacyMode::Full | PrivacyMode::Minimal)
    }

    pub fn manifest(&self) -> PrivacyManifest {
        PrivacyManifest {
            mode: *self,
            includes_stimulus_words: self.includes_stimulus_words(),
            stimulus_words_scope: StimulusWordsScope::PackWordList,
            includes_responses: self.includes_responses(),
        }
    }
}

/// What `includesStimulusWords` governs. Trial stimulus words and the realized order are
/// exported in every mode because the fingerprint is recomputed from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusWordsScope {
    #[default]
    PackWordList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyManifest {
    pub mode: PrivacyMode,
    pub includes_stimulus_words: bool,
    #[serde(default)]
    pub stimulus_words_scope: StimulusWordsScope,
    pub includes_responses: bool,
}

/// Stimulus pack identity attached to a bundle; word payload only when the mode allows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSnapshot {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub words: Option<Vec<String>>,
    #[serde(default)]
    pub words_sha256: Option<String>,
    #[serde(default)]
    pub pack_schema_version: Option<String>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
}

impl PackSnapshot {
    pub fn from_pack(pack: &StimulusPack, include_words: bool) -> Self {
        Self {
            id: pack.id.clone(),
            version: pack.version.clone(),
            language: pack.language.clone(),
            words: include_words.then(|| pack.words.clone()),
            words_sha256: Some(compute_words_sha256(&pack.words)),
            pack_schema_version: Some(PACK_SCHEMA_VERSION.to_string()),
            provenance: pack.provenance.clone(),
        }
    }

    /// Identity-only snapshot for sessions whose pack is no longer in the registry.
    pub fn from_session(session: &SessionResult) -> Self {
        Self {
            id: session.config.pack_id.clone(),
            version: session.config.pack_version.clone(),
            language: None,
            words: None,
            words_sha256: None,
            pack_schema_version: Some(PACK_SCHEMA_VERSION.to_string()),
            provenance: session.provenance_snapshot.clone(),
        }
    }

    /// A populated word list must always travel with its hash and schema version.
    pub fn is_self_describing(&self) -> bool {
        match &self.words {
            Some(_) => self.words_sha256.is_some() && self.pack_schema_version.is_some(),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub export_schema_version: String,
    pub exported_at: String,
    pub privacy: PrivacyManifest,
    pub session: SessionResult,
    pub stimulus_pack: Option<PackSnapshot>,
}

pub fn build_bundle(
    session: &SessionResult,
    pack: Option<&StimulusPack>,
    mode: PrivacyMode,
    exported_at: impl Into<String>,
) -> ExportBundle {
    let mut scoped = session.clone();
    scoped.candidate_complexes = session.ci_codes();
    if !mode.includes_responses() {
        for trial in &mut scoped.trials {
            trial.response.clear();
        }
    }

    let stimulus_pack = Some(match pack {
        Some(p) => PackSnapshot::from_pack(p, mode.includes_stimulus_words()),
        None => PackSnapshot::from_session(session),
    });

    ExportBundle {
        export_schema_version: EXPORT_SCHEMA_VERSION.to_string(),
        exported_at: exported_at.into(),
        privacy: mode.manifest(),
        session: scoped,
        stimulus_pack,
    }
}

/// Stable anonymous id for a fingerprint.
pub fn anonymous_session_id(fingerprint: &str) -> String {
    let digest = sha256_hex(&format!("anon:{fingerprint}"));
    format!("anon_{}", &digest[..16])
}

/// New bundle with identifying timestamps and the session id removed.
/// Provenance, fingerprint and scoring are carried over unchanged.
pub fn anonymize_bundle(bundle: &ExportBundle) -> ExportBundle {
    let mut anon = bundle.clone();
    anon.session.id = anonymous_session_id(&bundle.session.session_fingerprint);
    anon.session.started_at = String::new();
    anon.session.completed_at = String::new();
    anon.exported_at = String::new();
    anon
}
