use crate::app_dirs::AppDirs;
use crate::draft_lock::{is_expired, DraftLock, LockStore};
use crate::error::{Error, Result};
use crate::pack::StimulusPack;
use crate::session::{DraftSession, SessionResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistence port for sessions, custom packs and the single draft slot.
///
/// Reads never fail: a backend or decoding error is logged and reported as absent.
/// `session_exists` is the exception: it reports rows that cannot be decoded, and an
/// unanswerable check counts as taken.
pub trait SessionStore {
    fn save_session(&self, session: &SessionResult) -> Result<()>;
    /// Stores a session under a fresh id. Fails with `SessionExists` instead of overwriting.
    fn insert_session(&self, session: &SessionResult) -> Result<()>;
    fn session_exists(&self, id: &str) -> bool;
    fn load_session(&self, id: &str) -> Option<SessionResult>;
    fn list_sessions(&self) -> Vec<String>;
    fn delete_session(&self, id: &str) -> Result<()>;

    fn save_pack(&self, pack: &StimulusPack) -> Result<()>;
    fn load_pack(&self, id: &str, version: &str) -> Option<StimulusPack>;
    fn list_packs(&self) -> Vec<(String, String)>;
    fn delete_pack(&self, id: &str, version: &str) -> Result<()>;

    fn save_draft(&self, draft: &DraftSession) -> Result<()>;
    fn load_draft(&self) -> Option<DraftSession>;
    fn delete_draft(&self) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    saved_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS packs (
    id TEXT NOT NULL,
    version TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (id, version)
);
CREATE TABLE IF NOT EXISTS draft (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS draft_lock (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    tab_id TEXT NOT NULL,
    acquired_at_ms INTEGER NOT NULL
);
"#;

/// SQLite-backed store. Each write is a single statement, so atomic per key.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the store at the default location under the user's state directory.
    pub fn new() -> Result<Self> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("wordassoc.db"));
        Self::open(db_path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // other handles on the same file may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    fn read_body<T: DeserializeOwned>(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Option<T> {
        let body: Option<String> = match self
            .conn
            .query_row(sql, args, |row| row.get(0))
            .optional()
        {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("storage read failed: {e}");
                return None;
            }
        };
        match serde_json::from_str(&body?) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("stored record is corrupt: {e}");
                None
            }
        }
    }

    fn read_column<T: rusqlite::types::FromSql>(&self, sql: &str) -> Vec<Vec<T>> {
        let run = || -> rusqlite::Result<Vec<Vec<T>>> {
            let mut stmt = self.conn.prepare(sql)?;
            let width = stmt.column_count();
            let rows = stmt.query_map([], |row| {
                (0..width).map(|i| row.get(i)).collect::<rusqlite::Result<Vec<T>>>()
            })?;
            rows.collect()
        };
        run().unwrap_or_else(|e| {
            tracing::warn!("storage listing failed: {e}");
            Vec::new()
        })
    }
}

impl SessionStore for SqliteStore {
    fn save_session(&self, session: &SessionResult) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (id, body) VALUES (?1, ?2)",
            params![session.id, serde_json::to_string(session)?],
        )?;
        Ok(())
    }

    fn insert_session(&self, session: &SessionResult) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO sessions (id, body) VALUES (?1, ?2)",
            params![session.id, serde_json::to_string(session)?],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::SessionExists(session.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn session_exists(&self, id: &str) -> bool {
        self.conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![id], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .unwrap_or_else(|e| {
                tracing::warn!("session existence check failed, treating {id} as taken: {e}");
                true
            })
    }

    fn load_session(&self, id: &str) -> Option<SessionResult> {
        self.read_body("SELECT body FROM sessions WHERE id = ?1", &[&id])
    }

    fn list_sessions(&self) -> Vec<String> {
        self.read_column::<String>("SELECT id FROM sessions ORDER BY id")
            .into_iter()
            .filter_map(|mut row| row.pop())
            .collect()
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn save_pack(&self, pack: &StimulusPack) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO packs (id, version, body) VALUES (?1, ?2, ?3)",
            params![pack.id, pack.version, serde_json::to_string(pack)?],
        )?;
        Ok(())
    }

    fn load_pack(&self, id: &str, version: &str) -> Option<StimulusPack> {
        self.read_body(
            "SELECT body FROM packs WHERE id = ?1 AND version = ?2",
            &[&id, &version],
        )
    }

    fn list_packs(&self) -> Vec<(String, String)> {
        self.read_column::<String>("SELECT id, version FROM packs ORDER BY id, version")
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [id, version] => Some((id.clone(), version.clone())),
                _ => None,
            })
            .collect()
    }

    fn delete_pack(&self, id: &str, version: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM packs WHERE id = ?1 AND version = ?2",
            params![id, version],
        )?;
        Ok(())
    }

    fn save_draft(&self, draft: &DraftSession) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO draft (slot, body) VALUES (0, ?1)",
            params![serde_json::to_string(draft)?],
        )?;
        Ok(())
    }

    fn load_draft(&self) -> Option<DraftSession> {
        self.read_body("SELECT body FROM draft WHERE slot = 0", &[])
    }

    fn delete_draft(&self) -> Result<()> {
        self.conn.execute("DELETE FROM draft", [])?;
        Ok(())
    }
}

impl LockStore for SqliteStore {
    fn load_lock(&self) -> Option<DraftLock> {
        self.conn
            .query_row(
                "SELECT tab_id, acquired_at_ms FROM draft_lock WHERE slot = 0",
                [],
                |row| {
                    Ok(DraftLock {
                        tab_id: row.get(0)?,
                        acquired_at_ms: row.get::<_, i64>(1)?.max(0) as u64,
                    })
                },
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::warn!("draft lock read failed: {e}");
                None
            })
    }

    fn try_acquire_lock(&self, tab_id: &str, now_ms: u64, ttl_ms: u64) -> Result<bool> {
        // the upsert only rewrites a row we own or one past its TTL; a live foreign lock
        // leaves zero rows changed
        let changed = self.conn.execute(
            "INSERT INTO draft_lock (slot, tab_id, acquired_at_ms) VALUES (0, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET
                 tab_id = excluded.tab_id,
                 acquired_at_ms = excluded.acquired_at_ms
             WHERE draft_lock.tab_id = excluded.tab_id
                OR excluded.acquired_at_ms - draft_lock.acquired_at_ms > ?3",
            params![tab_id, now_ms as i64, ttl_ms as i64],
        )?;
        Ok(changed == 1)
    }

    fn release_lock(&self, tab_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM draft_lock WHERE slot = 0 AND tab_id = ?1",
            params![tab_id],
        )?;
        Ok(changed == 1)
    }
}

/// In-process store for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RefCell<BTreeMap<String, SessionResult>>,
    packs: RefCell<BTreeMap<(String, String), StimulusPack>>,
    draft: RefCell<Option<DraftSession>>,
    lock: RefCell<Option<DraftLock>>,
}

impl SessionStore for MemoryStore {
    fn save_session(&self, session: &SessionResult) -> Result<()> {
        self.sessions
            .borrow_mut()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn insert_session(&self, session: &SessionResult) -> Result<()> {
        let mut sessions = self.sessions.borrow_mut();
        if sessions.contains_key(&session.id) {
            return Err(Error::SessionExists(session.id.clone()));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn session_exists(&self, id: &str) -> bool {
        self.sessions.borrow().contains_key(id)
    }

    fn load_session(&self, id: &str) -> Option<SessionResult> {
        self.sessions.borrow().get(id).cloned()
    }

    fn list_sessions(&self) -> Vec<String> {
        self.sessions.borrow().keys().cloned().collect()
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        self.sessions.borrow_mut().remove(id);
        Ok(())
    }

    fn save_pack(&self, pack: &StimulusPack) -> Result<()> {
        self.packs
            .borrow_mut()
            .insert((pack.id.clone(), pack.version.clone()), pack.clone());
        Ok(())
    }

    fn load_pack(&self, id: &str, version: &str) -> Option<StimulusPack> {
        self.packs
            .borrow()
            .get(&(id.to_string(), version.to_string()))
            .cloned()
    }

    fn list_packs(&self) -> Vec<(String, String)> {
        self.packs.borrow().keys().cloned().collect()
    }

    fn delete_pack(&self, id: &str, version: &str) -> Result<()> {
        self.packs
            .borrow_mut()
            .remove(&(id.to_string(), version.to_string()));
        Ok(())
    }

    fn save_draft(&self, draft: &DraftSession) -> Result<()> {
        *self.draft.borrow_mut() = Some(draft.clone());
        Ok(())
    }

    fn load_draft(&self) -> Option<DraftSession> {
        self.draft.borrow().clone()
    }

    fn delete_draft(&self) -> Result<()> {
        *self.draft.borrow_mut() = None;
        Ok(())
    }
}

impl LockStore for MemoryStore {
    fn load_lock(&self) -> Option<DraftLock> {
        self.lock.borrow().clone()
    }

    fn try_acquire_lock(&self, tab_id: &str, now_ms: u64, ttl_ms: u64) -> Result<bool> {
        let mut slot = self.lock.borrow_mut();
        let free = slot
            .as_ref()
            .map_or(true, |l| l.tab_id == tab_id || is_expired(l, now_ms, ttl_ms));
        if free {
            *slot = Some(DraftLock {
                tab_id: tab_id.to_string(),
                acquired_at_ms: now_ms,
            });
        }
        Ok(free)
    }

    fn release_lock(&self, tab_id: &str) -> Result<bool> {
        let mut slot = self.lock.borrow_mut();
        if slot.as_ref().map_or(false, |l| l.tab_id == tab_id) {
            *slot = None;
            return Ok(true);
        }
        Ok(false)
    }
}
