// Library surface for the CLI and integration tests.
// Everything except storage and config is pure and deterministic.
pub mod app_dirs;
pub mod config;
pub mod csv_export;
pub mod draft_lock;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod hashing;
pub mod import;
pub mod indicators;
pub mod insights;
pub mod order;
pub mod pack;
pub mod package;
pub mod scoring;
pub mod session;
pub mod storage;
pub mod util;

pub use error::{Error, Result};
