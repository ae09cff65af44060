// End-to-end export/import flow through the public API: run a session against a
// bundled pack, seal it, tamper with it, then import it into a SQLite store.

use assert_matches::assert_matches;
use serde_json::Value;
use wordassoc::export::PrivacyMode;
use wordassoc::import::{
    classify_payload, classify_value, prepare_pack_import, prepare_session_import, ImportAction,
    ImportPolicy, ImportType,
};
use wordassoc::pack::{EmbeddedRegistry, StimulusPack, StimulusRegistry};
use wordassoc::package::{build_package, verify_package_integrity};
use wordassoc::session::{DraftSession, OrderPolicy, SessionConfig, SessionResult, Trial};
use wordassoc::storage::{SessionStore, SqliteStore};
use wordassoc::Error;

const EXPORTED_AT: &str = "2026-03-01T12:00:00.000Z";

fn demo_pack() -> StimulusPack {
    EmbeddedRegistry
        .lookup("demo-en", "1.0.0")
        .expect("bundled demo pack")
}

fn run_session(id: &str) -> SessionResult {
    let pack = demo_pack();
    let config = SessionConfig {
        pack_id: pack.id.clone(),
        pack_version: pack.version.clone(),
        order_policy: OrderPolicy::Seeded,
        seed: Some(7),
        trial_timeout_ms: Some(8_000),
        break_every: Some(10),
    };
    let mut draft = DraftSession::start(id, config, &pack, "2026-03-01T11:50:00.000Z").unwrap();
    let mut idx = 0;
    while let Some(word) = draft.next_stimulus().map(str::to_string) {
        let timed_out = idx == 3;
        draft.record_trial(Trial {
            stimulus_word: word.clone(),
            stimulus_order_index: idx,
            response: if timed_out {
                String::new()
            } else {
                format!("{word}ish")
            },
            reaction_time_ms: if timed_out { 8_000 } else { 600 + (idx as u64 % 5) * 40 },
            first_keystroke_ms: (!timed_out).then_some(300),
            backspace_count: if idx == 5 { 4 } else { 0 },
            edit_count: 0,
            ime_composition_count: 0,
            is_practice: false,
            timed_out: timed_out.then_some(true),
        });
        idx += 1;
    }
    draft.complete("2026-03-01T11:58:00.000Z")
}

fn package_json(session: &SessionResult, mode: PrivacyMode, anonymize: bool) -> String {
    let pack = demo_pack();
    let package = build_package(session, Some(&pack), mode, EXPORTED_AT, anonymize).unwrap();
    serde_json::to_string_pretty(&package).unwrap()
}

#[test]
fn full_session_covers_every_pack_word() {
    let session = run_session("sess_a");
    assert_eq!(session.stimulus_order.len(), demo_pack().words.len());
    assert_eq!(session.scoring.summary.total_trials, session.stimulus_order.len());
    assert_eq!(session.scoring.summary.timeout_count, 1);
}

#[test]
fn sealed_package_verifies_after_reparse() {
    let text = package_json(&run_session("sess_a"), PrivacyMode::Full, false);
    let value: Value = serde_json::from_str(&text).unwrap();
    let result = verify_package_integrity(&value);
    assert!(result.valid);
    assert_eq!(result.expected, result.actual);
}

#[test]
fn tampered_package_is_blocked() {
    let text = package_json(&run_session("sess_a"), PrivacyMode::Full, false);
    let mut value: Value = serde_json::from_str(&text).unwrap();
    value["bundle"]["session"]["trials"][0]["response"] = Value::from("forged");

    let preview = classify_value(&value, text.len());
    assert_eq!(preview.import_type, ImportType::Package);
    assert!(preview.integrity_failed());
    assert_eq!(preview.available_actions(), vec![ImportAction::Blocked]);
    assert_eq!(preview.action_labels(), vec!["Blocked: Integrity mismatch"]);

    let store = SqliteStore::open_in_memory().unwrap();
    assert_matches!(
        prepare_session_import(&preview, &store, ImportPolicy::default()),
        Err(Error::IntegrityMismatch { .. })
    );
    assert_matches!(
        prepare_pack_import(&preview),
        Err(Error::IntegrityMismatch { .. })
    );
}

#[test]
fn package_import_rewrites_colliding_id() {
    let session = run_session("sess_a");
    let text = package_json(&session, PrivacyMode::Full, false);
    let store = SqliteStore::open_in_memory().unwrap();
    store.save_session(&session).unwrap();

    let preview = classify_payload(&text).unwrap();
    assert_eq!(
        preview.available_actions(),
        vec![ImportAction::ImportAsSession, ImportAction::ExtractPack]
    );
    let imported = prepare_session_import(&preview, &store, ImportPolicy::default()).unwrap();
    let hash = preview.package_hash.clone().unwrap();
    assert_eq!(imported.id, format!("sess_a__import_{}", &hash[..8]));
    let origin = imported.imported_from.clone().unwrap();
    assert_eq!(origin.original_session_id, "sess_a");
    assert_eq!(origin.package_hash, hash);
    store.insert_session(&imported).unwrap();

    // the same package again lands on the numbered suffix
    let again = prepare_session_import(&preview, &store, ImportPolicy::default()).unwrap();
    assert_eq!(again.id, format!("sess_a__import_{}__2", &hash[..8]));

    let mut ids = store.list_sessions();
    ids.sort();
    assert_eq!(ids.len(), 2);
    assert_eq!(store.load_session(&imported.id).unwrap().trials, session.trials);
}

#[test]
fn collision_cap_is_respected() {
    let session = run_session("sess_a");
    let text = package_json(&session, PrivacyMode::Full, false);
    let preview = classify_payload(&text).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();
    store.save_session(&session).unwrap();
    let first = prepare_session_import(&preview, &store, ImportPolicy::default()).unwrap();
    store.insert_session(&first).unwrap();

    let policy = ImportPolicy {
        max_collision_retries: 1,
        ..ImportPolicy::default()
    };
    assert_matches!(
        prepare_session_import(&preview, &store, policy),
        Err(Error::ImportCollision { attempts: 1, .. })
    );
}

#[test]
fn redacted_package_imports_without_responses() {
    let session = run_session("sess_r");
    let text = package_json(&session, PrivacyMode::Redacted, true);
    let preview = classify_payload(&text).unwrap();
    assert!(!preview.integrity_failed());
    // no words in a redacted snapshot, so no pack to extract
    assert_eq!(preview.word_count, 0);
    assert_eq!(preview.available_actions(), vec![ImportAction::ImportAsSession]);

    let store = SqliteStore::open_in_memory().unwrap();
    let imported = prepare_session_import(&preview, &store, ImportPolicy::default()).unwrap();
    assert!(imported.id.starts_with("anon_"));
    assert!(imported.trials.iter().all(|t| t.response.is_empty()));
    assert_eq!(imported.scoring, session.scoring);
}

#[test]
fn extracted_pack_lands_in_store() {
    let text = package_json(&run_session("sess_a"), PrivacyMode::Full, false);
    let preview = classify_payload(&text).unwrap();
    assert!(preview.allows(ImportAction::ExtractPack));
    let pack = prepare_pack_import(&preview).unwrap();
    assert_eq!(pack, demo_pack());

    let store = SqliteStore::open_in_memory().unwrap();
    store.save_pack(&pack).unwrap();
    assert_eq!(store.load_pack("demo-en", "1.0.0"), Some(pack));
    assert_eq!(
        store.list_packs(),
        vec![("demo-en".to_string(), "1.0.0".to_string())]
    );
}

#[test]
fn bare_pack_file_offers_pack_import_only() {
    let raw = r#"{"id":"custom","version":"0.1.0","words":["sun","rain"],
        "provenance":{"source":"lab notebook"}}"#;
    let preview = classify_payload(raw).unwrap();
    assert_eq!(preview.import_type, ImportType::Pack);
    assert_eq!(preview.available_actions(), vec![ImportAction::ImportPack]);
    assert!(!preview.allows(ImportAction::ImportAsSession));
    assert_eq!(prepare_pack_import(&preview).unwrap().words, vec!["sun", "rain"]);
}
