use crate::error::{Error, Result};
use crate::fingerprint::compute_session_fingerprint;
use crate::indicators::{compute_ci_codes, CiCode};
use crate::order::realize_order;
use crate::pack::{Provenance, StimulusPack};
use crate::scoring::{score_session, SessionScoring, SCORING_VERSION};
use serde::{Deserialize, Serialize};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One stimulus/response exchange. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub stimulus_word: String,
    pub stimulus_order_index: usize,
    pub response: String,
    pub reaction_time_ms: u64,
    pub first_keystroke_ms: Option<u64>,
    pub backspace_count: u32,
    pub edit_count: u32,
    pub ime_composition_count: u32,
    pub is_practice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl Trial {
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.unwrap_or(false)
    }

    pub fn is_empty_response(&self) -> bool {
        self.response.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderPolicy {
    Fixed,
    Seeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub pack_id: String,
    pub pack_version: String,
    pub order_policy: OrderPolicy,
    pub seed: Option<u64>,
    pub trial_timeout_ms: Option<u64>,
    pub break_every: Option<u32>,
}

impl SessionConfig {
    /// True when a break should be offered after `completed` scored trials.
    pub fn is_break_due(&self, completed: usize) -> bool {
        match self.break_every {
            Some(every) if every > 0 && completed > 0 => completed % every as usize == 0,
            _ => false,
        }
    }
}

/// Where an imported session came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedFrom {
    pub package_version: String,
    pub package_hash: String,
    pub original_session_id: String,
}

/// A completed session. Read-only once created; export transforms build new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub id: String,
    pub config: SessionConfig,
    pub trials: Vec<Trial>,
    pub scoring: SessionScoring,
    pub stimulus_order: Vec<String>,
    pub seed_used: Option<u64>,
    pub provenance_snapshot: Option<Provenance>,
    pub session_fingerprint: String,
    pub app_version: String,
    pub scoring_version: String,
    pub started_at: String,
    pub completed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from: Option<ImportedFrom>,
    /// CI codes per scored trial, captured from the unredacted responses at completion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_complexes: Vec<Vec<CiCode>>,
}

impl SessionResult {
    pub fn scored_trials(&self) -> impl Iterator<Item = (usize, &Trial)> {
        self.trials.iter().enumerate().filter(|(_, t)| !t.is_practice)
    }

    /// Stored CI codes when they cover every scored trial, otherwise recomputed.
    ///
    /// Redacted sessions must rely on the stored codes: blank responses read as `F`.
    pub fn ci_codes(&self) -> Vec<Vec<CiCode>> {
        if self.candidate_complexes.len() == self.scored_trials().count() {
            self.candidate_complexes.clone()
        } else {
            compute_ci_codes(&self.trials)
        }
    }
}

/// The single mutable in-progress session. Guarded by the draft lock while being built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSession {
    pub id: String,
    pub config: SessionConfig,
    pub stimulus_order: Vec<String>,
    pub seed_used: Option<u64>,
    pub provenance_snapshot: Option<Provenance>,
    pub trials: Vec<Trial>,
    pub started_at: String,
}

impl DraftSession {
    pub fn start(
        id: impl Into<String>,
        config: SessionConfig,
        pack: &StimulusPack,
        started_at: impl Into<String>,
    ) -> Result<Self> {
        if pack.id != config.pack_id || pack.version != config.pack_version {
            return Err(Error::InvalidInput(format!(
                "pack {}@{} does not match session config {}@{}",
                pack.id, pack.version, config.pack_id, config.pack_version
            )));
        }
        let (stimulus_order, seed_used) =
            realize_order(&pack.words, config.order_policy, config.seed);

        Ok(Self {
            id: id.into(),
            config,
            stimulus_order,
            seed_used,
            provenance_snapshot: pack.provenance.clone(),
            trials: Vec::new(),
            started_at: started_at.into(),
        })
    }

    /// The next stimulus to present, if any remain.
    pub fn next_stimulus(&self) -> Option<&str> {
        let answered = self.trials.iter().filter(|t| !t.is_practice).count();
        self.stimulus_order.get(answered).map(String::as_str)
    }

    pub fn record_trial(&mut self, trial: Trial) {
        self.trials.push(trial);
    }

    pub fn complete(self, completed_at: impl Into<String>) -> SessionResult {
        let scoring = score_session(&self.trials);
        let candidate_complexes = compute_ci_codes(&self.trials);
        let session_fingerprint =
            compute_session_fingerprint(&self.config, self.seed_used, &self.stimulus_order);
        tracing::debug!(id = %self.id, fingerprint = %session_fingerprint, "session completed");

        SessionResult {
            id: self.id,
            config: self.config,
            trials: self.trials,
            scoring,
            stimulus_order: self.stimulus_order,
            seed_used: self.seed_used,
            provenance_snapshot: self.provenance_snapshot,
            session_fingerprint,
            app_version: APP_VERSION.to_string(),
            scoring_version: SCORING_VERSION.to_string(),
            started_at: self.started_at,
            completed_at: completed_at.into(),
            imported_from: None,
            candidate_complexes,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn trial(word: &str, idx: usize, response: &str, rt: u64) -> Trial {
        Trial {
            stimulus_word: word.to_string(),
            stimulus_order_index: idx,
            response: response.to_string(),
            reaction_time_ms: rt,
            first_keystroke_ms: Some(rt / 2),
            backspace_count: 0,
            edit_count: 0,
            ime_composition_count: 0,
            is_practice: false,
            timed_out: None,
        }
    }

    pub fn practice(word: &str, response: &str, rt: u64) -> Trial {
        Trial {
            is_practice: true,
            ..trial(word, 0, response, rt)
        }
    }

    pub fn config() -> SessionConfig {
        SessionConfig {
            pack_id: "demo-en".into(),
            pack_version: "1.0.0".into(),
            order_policy: OrderPolicy::Seeded,
            seed: Some(42),
            trial_timeout_ms: Some(10_000),
            break_every: None,
        }
    }

    pub fn pack() -> StimulusPack {
        StimulusPack {
            id: "demo-en".into(),
            version: "1.0.0".into(),
            language: Some("en".into()),
            words: vec!["head".into(), "green".into(), "water".into(), "sing".into()],
            provenance: Some(Provenance {
                source: "test fixture".into(),
                license: Some("CC0-1.0".into()),
                notes: None,
            }),
        }
    }

    pub fn completed_session() -> SessionResult {
        let mut draft =
            DraftSession::start("sess_1", config(), &pack(), "2026-01-01T10:00:00.000Z").unwrap();
        draft.record_trial(practice("tree", "leaf", 800));
        let order = draft.stimulus_order.clone();
        let responses = ["heart", "grass", "", "song"];
        let rts = [620, 540, 3100, 700];
        for (i, word) in order.iter().enumerate() {
            draft.record_trial(trial(word, i, responses[i], rts[i]));
        }
        draft.complete("2026-01-01T10:05:00.000Z")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn timed_out_absent_means_false() {
        let json = r#"{"stimulusWord":"head","stimulusOrderIndex":0,"response":"hat",
            "reactionTimeMs":500,"firstKeystrokeMs":null,"backspaceCount":0,"editCount":0,
            "imeCompositionCount":0,"isPractice":false}"#;
        let t: Trial = serde_json::from_str(json).unwrap();
        assert!(!t.is_timed_out());
        assert_eq!(t.first_keystroke_ms, None);
        assert!(!serde_json::to_string(&t).unwrap().contains("timedOut"));
    }

    #[test]
    fn break_due_every_n() {
        let mut cfg = config();
        assert!(!cfg.is_break_due(5));
        cfg.break_every = Some(5);
        assert!(!cfg.is_break_due(0));
        assert!(!cfg.is_break_due(4));
        assert!(cfg.is_break_due(5));
        assert!(cfg.is_break_due(10));
    }

    #[test]
    fn draft_rejects_mismatched_pack() {
        let mut cfg = config();
        cfg.pack_version = "2.0.0".into();
        let err = DraftSession::start("x", cfg, &pack(), "t").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn draft_walks_stimuli_and_completes() {
        let mut draft = DraftSession::start("s", config(), &pack(), "start").unwrap();
        assert_eq!(draft.seed_used, Some(42));
        let first = draft.next_stimulus().unwrap().to_string();
        draft.record_trial(practice("tree", "leaf", 700));
        assert_eq!(draft.next_stimulus(), Some(first.as_str()));
        draft.record_trial(trial(&first, 0, "x", 500));
        assert_ne!(draft.next_stimulus(), Some(first.as_str()));

        let result = draft.complete("end");
        assert_eq!(result.scoring.summary.total_trials, 1);
        assert_eq!(result.scoring_version, SCORING_VERSION);
        assert_eq!(result.session_fingerprint.len(), 64);
        assert!(result.imported_from.is_none());
    }

    #[test]
    fn scored_trials_skip_practice() {
        let session = completed_session();
        let idx: Vec<usize> = session.scored_trials().map(|(i, _)| i).collect();
        assert_eq!(idx, vec![1, 2, 3, 4]);
    }

    #[test]
    fn ci_codes_survive_blanked_responses() {
        let session = completed_session();
        let captured = session.ci_codes();
        assert_eq!(captured, compute_ci_codes(&session.trials));
        assert_eq!(captured.len(), 4);

        let mut blanked = session.clone();
        blanked.trials.iter_mut().for_each(|t| t.response.clear());
        assert_eq!(blanked.ci_codes(), captured);

        // without stored codes they are recomputed from whatever the trials hold
        blanked.candidate_complexes.clear();
        assert!(blanked.ci_codes().iter().all(|c| c == &vec![CiCode::Failure]));
    }
}
