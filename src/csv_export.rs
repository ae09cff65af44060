use crate::error::{Error, Result};
use crate::session::SessionResult;
use itertools::Itertools;
use std::collections::HashMap;

pub const CSV_SCHEMA_VERSION: &str = "1";

/// Column order is part of the export contract. Append only.
pub const CSV_COLUMNS: [&str; 20] = [
    "csv_schema_version",
    "session_id",
    "session_fingerprint",
    "scoring_version",
    "pack_id",
    "pack_version",
    "seed",
    "order_index",
    "word",
    "warmup",
    "response",
    "t_first_input_ms",
    "t_submit_ms",
    "backspaces",
    "edits",
    "compositions",
    "timed_out",
    "flags",
    "emotions",
    "candidate_complexes",
];

/// One row per trial, practice included (`warmup = true`, no flags).
///
/// With `redact_responses` the response column is always blank.
pub fn build_csv(session: &SessionResult, redact_responses: bool) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;

    let ci_codes = session.ci_codes();
    let flags_by_position: HashMap<usize, String> = session
        .scoring
        .trial_flags
        .iter()
        .map(|tf| (tf.trial_index, tf.flags.iter().map(|f| f.as_str()).join(";")))
        .collect();
    let seed = session.seed_used.map(|s| s.to_string()).unwrap_or_default();
    let mut scored_idx = 0usize;

    for trial in &session.trials {
        let (flags, complexes) = if trial.is_practice {
            (String::new(), String::new())
        } else {
            let flags = flags_by_position
                .get(&scored_idx)
                .cloned()
                .unwrap_or_default();
            let complexes = ci_codes
                .get(scored_idx)
                .map(|codes| codes.iter().map(|c| c.as_str()).join(";"))
                .unwrap_or_default();
            scored_idx += 1;
            (flags, complexes)
        };

        let response = if redact_responses {
            ""
        } else {
            trial.response.as_str()
        };

        let first_input = trial
            .first_keystroke_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        let record: [&str; 20] = [
            CSV_SCHEMA_VERSION,
            &session.id,
            &session.session_fingerprint,
            &session.scoring_version,
            &session.config.pack_id,
            &session.config.pack_version,
            &seed,
            &trial.stimulus_order_index.to_string(),
            &trial.stimulus_word,
            &trial.is_practice.to_string(),
            response,
            &first_input,
            &trial.reaction_time_ms.to_string(),
            &trial.backspace_count.to_string(),
            &trial.edit_count.to_string(),
            &trial.ime_composition_count.to_string(),
            &trial.is_timed_out().to_string(),
            &flags,
            "",
            &complexes,
        ];
        writer.write_record(record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidInput(e.to_string()))
}
