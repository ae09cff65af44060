//! Advisory TTL lock over the single in-progress draft slot.
//!
//! Cooperating contexts (tabs, processes) sharing one store agree that only the lock owner
//! writes the draft. A record older than the TTL is considered abandoned and may be taken
//! over. This does not defend against writers that ignore the lock.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const LOCK_TTL_MS: u64 = 2 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftLock {
    pub tab_id: String,
    pub acquired_at_ms: u64,
}

/// Storage for the one lock record. Acquire and release are each a single atomic step, so
/// two contexts checking the same free slot cannot both win it.
pub trait LockStore {
    fn load_lock(&self) -> Option<DraftLock>;
    /// Writes `tab_id` as holder if the slot is free, already held by `tab_id`, or held by a
    /// record older than `ttl_ms`. Returns whether the write happened.
    fn try_acquire_lock(&self, tab_id: &str, now_ms: u64, ttl_ms: u64)
        -> crate::error::Result<bool>;
    /// Clears the slot only if `tab_id` holds it.
    fn release_lock(&self, tab_id: &str) -> crate::error::Result<bool>;
}

/// A lock is expired once its age is strictly greater than the TTL.
pub fn is_expired(lock: &DraftLock, now_ms: u64, ttl_ms: u64) -> bool {
    now_ms.saturating_sub(lock.acquired_at_ms) > ttl_ms
}

pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

pub struct DraftLockManager<'a, S: LockStore + ?Sized, C: Clock> {
    store: &'a S,
    clock: C,
    ttl_ms: u64,
}

impl<'a, S: LockStore + ?Sized, C: Clock> DraftLockManager<'a, S, C> {
    pub fn new(store: &'a S, clock: C) -> Self {
        Self::with_ttl(store, clock, LOCK_TTL_MS)
    }

    pub fn with_ttl(store: &'a S, clock: C, ttl_ms: u64) -> Self {
        Self {
            store,
            clock,
            ttl_ms,
        }
    }

    /// Takes or renews the lock. Fails while another tab holds a live lock.
    pub fn acquire(&self, tab_id: &str) -> bool {
        let now = self.clock.now_ms();
        let previous = self.store.load_lock();
        match self.store.try_acquire_lock(tab_id, now, self.ttl_ms) {
            Ok(true) => {
                if let Some(stale) = previous.filter(|l| l.tab_id != tab_id) {
                    tracing::warn!(stale = %stale.tab_id, %tab_id, "took over expired draft lock");
                }
                true
            }
            Ok(false) => {
                tracing::debug!(%tab_id, "draft lock busy");
                false
            }
            Err(e) => {
                tracing::warn!("could not persist draft lock: {e}");
                false
            }
        }
    }

    pub fn is_locked_by_other(&self, tab_id: &str) -> bool {
        let now = self.clock.now_ms();
        self.store
            .load_lock()
            .map_or(false, |l| l.tab_id != tab_id && !is_expired(&l, now, self.ttl_ms))
    }

    /// Clears the lock if `tab_id` owns it. Anyone else's call is ignored.
    pub fn release(&self, tab_id: &str) {
        if let Err(e) = self.store.release_lock(tab_id) {
            tracing::warn!("could not clear draft lock: {e}");
        }
    }
}
