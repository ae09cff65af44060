//! Hash-sealed package envelope around an export bundle and its CSV renderings.
//!
//! The seal is SHA-256 over a canonical JSON rendering of the envelope. Top-level keys are
//! written in a fixed order with `packageHash` kept in position as an empty placeholder;
//! nested objects use sorted keys. Unknown top-level keys are appended in sorted order so
//! that adding a field also breaks the seal.

use crate::csv_export::build_csv;
use crate::error::Result;
use crate::export::{anonymize_bundle, build_bundle, ExportBundle, PrivacyMode};
use crate::hashing::{canonical_json, sha256_hex};
use crate::pack::StimulusPack;
use crate::session::SessionResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PACKAGE_VERSION: &str = "1.0";
pub const HASH_ALGORITHM: &str = "sha256";

/// Top-level key order of the canonical form.
pub const PACKAGE_KEY_ORDER: [&str; 7] = [
    "packageVersion",
    "packageHash",
    "hashAlgorithm",
    "exportedAt",
    "bundle",
    "csv",
    "csvRedacted",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_version: String,
    pub package_hash: String,
    pub hash_algorithm: String,
    pub exported_at: String,
    pub bundle: ExportBundle,
    pub csv: String,
    pub csv_redacted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityResult {
    pub valid: bool,
    pub expected: String,
    pub actual: String,
}

/// Canonical text the package hash is computed over. `packageHash` is always blank here.
pub fn package_canonical_string(package: &Value) -> String {
    let empty = serde_json::Map::new();
    let map = package.as_object().unwrap_or(&empty);

    let mut out = String::from("{");
    let mut first = true;
    let mut emit = |key: &str, value: &Value, out: &mut String| {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&Value::String(key.to_string()).to_string());
        out.push(':');
        out.push_str(&canonical_json(value));
    };

    for key in PACKAGE_KEY_ORDER {
        if key == "packageHash" {
            emit(key, &Value::String(String::new()), &mut out);
        } else {
            emit(key, map.get(key).unwrap_or(&Value::Null), &mut out);
        }
    }

    let mut extra: Vec<&String> = map
        .keys()
        .filter(|k| !PACKAGE_KEY_ORDER.contains(&k.as_str()))
        .collect();
    extra.sort();
    for key in extra {
        emit(key, &map[key.as_str()], &mut out);
    }

    out.push('}');
    out
}

pub fn compute_package_hash(package: &Value) -> String {
    sha256_hex(&package_canonical_string(package))
}

pub fn seal_package(bundle: ExportBundle, csv: String, csv_redacted: String) -> Result<Package> {
    let mut package = Package {
        package_version: PACKAGE_VERSION.to_string(),
        package_hash: String::new(),
        hash_algorithm: HASH_ALGORITHM.to_string(),
        exported_at: bundle.exported_at.clone(),
        bundle,
        csv,
        csv_redacted,
    };
    let value = serde_json::to_value(&package)?;
    package.package_hash = compute_package_hash(&value);
    tracing::info!(
        hash = %package.package_hash,
        session = %package.bundle.session.id,
        mode = %package.bundle.privacy.mode,
        "sealed export package"
    );
    Ok(package)
}

/// Bundle, render CSV and seal in one step.
pub fn build_package(
    session: &SessionResult,
    pack: Option<&StimulusPack>,
    mode: PrivacyMode,
    exported_at: &str,
    anonymize: bool,
) -> Result<Package> {
    let mut bundle = build_bundle(session, pack, mode, exported_at);
    if anonymize {
        bundle = anonymize_bundle(&bundle);
    }
    let csv = build_csv(&bundle.session, !mode.includes_responses())?;
    let csv_redacted = build_csv(&bundle.session, true)?;
    seal_package(bundle, csv, csv_redacted)
}

/// Recomputes the seal of an arbitrary package payload. Any difference is a failure.
pub fn verify_package_integrity(package: &Value) -> IntegrityResult {
    let expected = package
        .get("packageHash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let algorithm_ok = package
        .get("hashAlgorithm")
        .and_then(Value::as_str)
        .map_or(false, |a| a == HASH_ALGORITHM);
    let actual = compute_package_hash(package);
    let valid = algorithm_ok && !expected.is_empty() && expected == actual;

    if !valid {
        tracing::warn!(%expected, %actual, "package integrity check failed");
    }
    IntegrityResult {
        valid,
        expected,
        actual,
    }
}
