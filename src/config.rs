use crate::app_dirs::AppDirs;
use crate::draft_lock::{Clock, DraftLockManager, LockStore, LOCK_TTL_MS};
use crate::export::PrivacyMode;
use crate::import::{ImportPolicy, DEFAULT_MAX_COLLISION_RETRIES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_privacy_mode: PrivacyMode,
    pub lock_ttl_ms: u64,
    pub max_import_collision_retries: usize,
    pub database_path: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_privacy_mode: PrivacyMode::Full,
            lock_ttl_ms: LOCK_TTL_MS,
            max_import_collision_retries: DEFAULT_MAX_COLLISION_RETRIES,
            database_path: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn import_policy(&self) -> ImportPolicy {
        ImportPolicy {
            max_collision_retries: self.max_import_collision_retries,
            ..ImportPolicy::default()
        }
    }

    pub fn draft_lock<'a, S: LockStore + ?Sized, C: Clock>(
        &self,
        store: &'a S,
        clock: C,
    ) -> DraftLockManager<'a, S, C> {
        DraftLockManager::with_ttl(store, clock, self.lock_ttl_ms)
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(e) => tracing::warn!("ignoring unreadable config {}: {e}", self.path.display()),
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            default_privacy_mode: PrivacyMode::Redacted,
            lock_ttl_ms: 30_000,
            max_import_collision_retries: 3,
            database_path: Some(dir.path().join("db.sqlite")),
            log_filter: "wordassoc=debug".into(),
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
        assert_eq!(loaded.import_policy().max_collision_retries, 3);
    }

    #[test]
    fn draft_lock_uses_configured_ttl() {
        use crate::storage::MemoryStore;
        use std::cell::Cell;

        struct Fixed<'c>(&'c Cell<u64>);
        impl Clock for Fixed<'_> {
            fn now_ms(&self) -> u64 {
                self.0.get()
            }
        }

        let cfg = Config {
            lock_ttl_ms: 1_000,
            ..Config::default()
        };
        let now = Cell::new(0);
        let store = MemoryStore::default();
        assert!(cfg.draft_lock(&store, Fixed(&now)).acquire("a"));
        now.set(1_001);
        assert!(cfg.draft_lock(&store, Fixed(&now)).acquire("b"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"default_privacy_mode":"minimal"}"#).unwrap();
        let loaded = FileConfigStore::with_path(&path).load();
        assert_eq!(loaded.default_privacy_mode, PrivacyMode::Minimal);
        assert_eq!(loaded.lock_ttl_ms, LOCK_TTL_MS);
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{{{").unwrap();
        assert_eq!(FileConfigStore::with_path(&path).load(), Config::default());
    }
}
