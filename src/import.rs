//! Import gatekeeper: classify an arbitrary payload, verify package seals and derive the
//! one list of actions a caller may offer.

use crate::error::{Error, Result};
use crate::export::{PackSnapshot, PrivacyManifest};
use crate::hashing::compute_words_sha256;
use crate::indicators::compute_ci_codes;
use crate::pack::{validate_pack, validate_session, StimulusPack, ValidationCode};
use crate::package::{verify_package_integrity, IntegrityResult};
use crate::scoring::{score_session, SCORING_VERSION};
use crate::session::{ImportedFrom, SessionResult};
use crate::storage::SessionStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_COLLISION_RETRIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPolicy {
    /// Candidate ids tried for a colliding session before giving up.
    pub max_collision_retries: usize,
    /// Replace the stored scoring with the current engine's. Off by default: imports keep
    /// the scoring they were exported with.
    pub rescore: bool,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self {
            max_collision_retries: DEFAULT_MAX_COLLISION_RETRIES,
            rescore: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImportType {
    Pack,
    Bundle,
    Package,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ImportAction {
    #[strum(serialize = "Import as Session")]
    ImportAsSession,
    #[strum(serialize = "Extract Pack")]
    ExtractPack,
    #[strum(serialize = "Import Pack")]
    ImportPack,
    #[strum(serialize = "Blocked: Integrity mismatch")]
    Blocked,
}

impl Serialize for ImportAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The actions a payload allows. Both labels and enablement are derived from this.
pub fn available_actions(
    import_type: ImportType,
    word_count: usize,
    has_session_to_import: bool,
    integrity_failed: bool,
) -> Vec<ImportAction> {
    if integrity_failed {
        return vec![ImportAction::Blocked];
    }
    match import_type {
        ImportType::Package => {
            let mut actions = Vec::new();
            if has_session_to_import {
                actions.push(ImportAction::ImportAsSession);
            }
            if word_count > 0 {
                actions.push(ImportAction::ExtractPack);
            }
            if actions.is_empty() {
                actions.push(ImportAction::ImportAsSession);
            }
            actions
        }
        ImportType::Bundle | ImportType::Pack => vec![ImportAction::ImportPack],
    }
}

/// Transient classification of an input payload. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    #[serde(rename = "type")]
    pub import_type: ImportType,
    pub pack_data: Option<StimulusPack>,
    pub word_count: usize,
    pub hash: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_result: Option<IntegrityResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_to_import: Option<SessionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacyManifest>,
}

impl ImportPreview {
    pub fn integrity_failed(&self) -> bool {
        self.integrity_result.as_ref().map_or(false, |r| !r.valid)
    }

    pub fn available_actions(&self) -> Vec<ImportAction> {
        available_actions(
            self.import_type,
            self.word_count,
            self.session_to_import.is_some(),
            self.integrity_failed(),
        )
    }

    pub fn action_labels(&self) -> Vec<String> {
        self.available_actions()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn allows(&self, action: ImportAction) -> bool {
        action != ImportAction::Blocked && self.available_actions().contains(&action)
    }
}

fn classify_type(payload: &Value) -> ImportType {
    if payload.get("packageVersion").is_some() && payload.get("bundle").is_some() {
        ImportType::Package
    } else if payload.get("exportSchemaVersion").is_some() {
        ImportType::Bundle
    } else {
        ImportType::Pack
    }
}

/// A pack inside a bundle counts only when its snapshot is self-describing, its words are
/// non-empty and match the carried hash, and its provenance is populated.
fn extract_bundle_pack(bundle: &Value) -> Option<StimulusPack> {
    let snapshot: PackSnapshot = serde_json::from_value(bundle.get("stimulusPack")?.clone()).ok()?;
    if !snapshot.is_self_describing() {
        return None;
    }
    let words = snapshot.words.filter(|w| !w.is_empty())?;
    if snapshot.words_sha256.as_deref() != Some(compute_words_sha256(&words).as_str()) {
        tracing::warn!(id = %snapshot.id, "bundled pack words do not match their hash");
        return None;
    }
    let provenance = snapshot.provenance.filter(|p| !p.source.trim().is_empty())?;
    Some(StimulusPack {
        id: snapshot.id,
        version: snapshot.version,
        language: snapshot.language,
        words,
        provenance: Some(provenance),
    })
}

fn extract_session(bundle: &Value) -> Option<SessionResult> {
    let raw = bundle.get("session")?;
    match serde_json::from_value(raw.clone()) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!("bundle carries an unreadable session: {e}");
            None
        }
    }
}

pub fn classify_payload(raw: &str) -> Result<ImportPreview> {
    let payload: Value = serde_json::from_str(raw)?;
    Ok(classify_value(&payload, raw.len()))
}

pub fn classify_value(payload: &Value, size_bytes: usize) -> ImportPreview {
    let import_type = classify_type(payload);

    let (bundle, integrity_result) = match import_type {
        ImportType::Package => (
            payload.get("bundle"),
            Some(verify_package_integrity(payload)),
        ),
        ImportType::Bundle => (Some(payload), None),
        ImportType::Pack => (None, None),
    };

    let pack_data = match bundle {
        Some(b) => extract_bundle_pack(b),
        None => serde_json::from_value::<StimulusPack>(payload.clone()).ok(),
    };
    let session_to_import = bundle.and_then(extract_session);
    let privacy = bundle
        .and_then(|b| b.get("privacy"))
        .and_then(|p| serde_json::from_value(p.clone()).ok());

    let word_count = pack_data.as_ref().map_or(0, |p| p.words.len());
    let hash = pack_data
        .as_ref()
        .map(|p| compute_words_sha256(&p.words))
        .unwrap_or_default();

    let str_field = |key: &str| {
        (import_type == ImportType::Package)
            .then(|| payload.get(key).and_then(Value::as_str).map(str::to_string))
            .flatten()
    };

    let preview = ImportPreview {
        import_type,
        pack_data,
        word_count,
        hash,
        size_bytes,
        integrity_result,
        session_to_import,
        package_version: str_field("packageVersion"),
        package_hash: str_field("packageHash"),
        privacy,
    };
    tracing::debug!(
        kind = %preview.import_type,
        words = preview.word_count,
        session = preview.session_to_import.is_some(),
        blocked = preview.integrity_failed(),
        "classified import payload"
    );
    preview
}

/// Picks an id for an imported session that does not collide with a stored one.
///
/// Tries the original id, then `<id>__import_<hash8>`, then that with `__2`, `__3`, ...
/// `max_attempts` bounds the rewritten candidates.
pub fn resolve_import_id(
    original_id: &str,
    package_hash: &str,
    exists: impl Fn(&str) -> bool,
    max_attempts: usize,
) -> Result<String> {
    if !exists(original_id) {
        return Ok(original_id.to_string());
    }
    let short: String = package_hash.chars().take(8).collect();
    let base = format!("{original_id}__import_{short}");
    if max_attempts >= 1 && !exists(&base) {
        return Ok(base);
    }
    for n in 2..=max_attempts {
        let candidate = format!("{base}__{n}");
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::ImportCollision {
        id: original_id.to_string(),
        attempts: max_attempts,
    })
}

/// Turns a verified package preview into a session ready to store.
pub fn prepare_session_import(
    preview: &ImportPreview,
    store: &dyn SessionStore,
    policy: ImportPolicy,
) -> Result<SessionResult> {
    if let Some(result) = preview.integrity_result.as_ref().filter(|r| !r.valid) {
        return Err(Error::IntegrityMismatch {
            expected: result.expected.clone(),
            actual: result.actual.clone(),
        });
    }
    if !preview.allows(ImportAction::ImportAsSession) {
        return Err(Error::InvalidInput(format!(
            "a {} payload cannot be imported as a session",
            preview.import_type
        )));
    }
    let mut session = preview
        .session_to_import
        .clone()
        .ok_or_else(|| Error::InvalidInput("package carries no session".to_string()))?;

    // redacted exports keep their original scoring over blanked responses
    let responses_present = preview.privacy.map_or(true, |p| p.includes_responses);
    let errors: Vec<_> = validate_session(&session)
        .into_iter()
        .filter(|e| {
            (responses_present && !policy.rescore) || e.code != ValidationCode::ScoringMismatch
        })
        .collect();
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }
    if policy.rescore {
        session.scoring = score_session(&session.trials);
        session.candidate_complexes = compute_ci_codes(&session.trials);
        session.scoring_version = SCORING_VERSION.to_string();
    }

    let package_hash = preview.package_hash.clone().unwrap_or_default();
    let original_id = session.id.clone();
    session.id = resolve_import_id(
        &original_id,
        &package_hash,
        |id| store.session_exists(id),
        policy.max_collision_retries,
    )?;
    session.imported_from = Some(ImportedFrom {
        package_version: preview.package_version.clone().unwrap_or_default(),
        package_hash,
        original_session_id: original_id,
    });
    tracing::info!(id = %session.id, "prepared session import");
    Ok(session)
}

/// Validated stimulus pack from a pack payload, or extracted from a bundle/package.
pub fn prepare_pack_import(preview: &ImportPreview) -> Result<StimulusPack> {
    if preview.integrity_failed() {
        let result = preview.integrity_result.clone().unwrap_or(IntegrityResult {
            valid: false,
            expected: String::new(),
            actual: String::new(),
        });
        return Err(Error::IntegrityMismatch {
            expected: result.expected,
            actual: result.actual,
        });
    }
    let pack = preview
        .pack_data
        .clone()
        .ok_or_else(|| Error::InvalidInput("payload carries no stimulus pack".to_string()))?;
    let errors = validate_pack(&pack);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }
    Ok(pack)
}
