//! # Session Store
//!
//! Process-wide map of session id to [`Registry`], created once by the host
//! and handed to the engine.
//!
//! Membership changes (creating or destroying a session) take a mutex and bump
//! a version counter. Lookups on the dispatch path read a private per-thread
//! snapshot of the map and only copy it again when the version has moved, so
//! steady-state reads take no lock. Registries themselves are shared by `Arc`
//! and mutated in place, so a snapshot never needs rebuilding for method
//! registration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::registry::Registry;

/// Session used when the caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SNAPSHOTS: RefCell<HashMap<u64, Snapshot>> = RefCell::new(HashMap::new());
}

struct Snapshot {
    owner: Weak<StoreInner>,
    version: u64,
    sessions: HashMap<String, Arc<Registry>>,
}

#[derive(Debug)]
struct StoreInner {
    id: u64,
    sessions: Mutex<HashMap<String, Arc<Registry>>>,
    version: AtomicU64,
}

/// Shared handle to the session map; clones refer to the same store
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                sessions: Mutex::new(HashMap::new()),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Return the session's registry, creating an empty one on first use
    pub fn get_or_create(&self, session_id: &str) -> Arc<Registry> {
        let mut sessions = self.inner.sessions.lock();
        if let Some(registry) = sessions.get(session_id) {
            return Arc::clone(registry);
        }
        let registry = Arc::new(Registry::new(session_id));
        sessions.insert(session_id.to_string(), Arc::clone(&registry));
        self.inner.version.fetch_add(1, Ordering::Release);
        debug!(session_id = %session_id, "Created session registry");
        registry
    }

    /// Lock-free lookup through this thread's snapshot
    pub fn get(&self, session_id: &str) -> Option<Arc<Registry>> {
        match SNAPSHOTS.try_with(|cell| self.snapshot_lookup(&mut cell.borrow_mut(), session_id)) {
            Ok(found) => found,
            // thread-local storage is being torn down
            Err(_) => self.inner.sessions.lock().get(session_id).cloned(),
        }
    }

    /// Like [`get_or_create`](Self::get_or_create), but served from the
    /// snapshot whenever the session already exists
    pub fn resolve(&self, session_id: &str) -> Arc<Registry> {
        self.get(session_id)
            .unwrap_or_else(|| self.get_or_create(session_id))
    }

    /// Remove a session and clear its bindings. A later lookup of the same id
    /// builds a new, empty registry.
    pub fn destroy(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.inner.sessions.lock();
            let removed = sessions.remove(session_id);
            if removed.is_some() {
                self.inner.version.fetch_add(1, Ordering::Release);
            }
            removed
        };
        match removed {
            Some(registry) => {
                registry.clear();
                debug!(session_id = %session_id, "Destroyed session registry");
                true
            }
            None => false,
        }
    }

    /// Membership version; changes whenever a session is created or destroyed
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_lookup(
        &self,
        snapshots: &mut HashMap<u64, Snapshot>,
        session_id: &str,
    ) -> Option<Arc<Registry>> {
        let current = self.inner.version.load(Ordering::Acquire);
        let stale = snapshots
            .get(&self.inner.id)
            .is_none_or(|snapshot| snapshot.version != current);
        if stale {
            snapshots.retain(|_, snapshot| snapshot.owner.strong_count() > 0);
            let snapshot = self.copy_snapshot();
            debug!(version = snapshot.version, sessions = snapshot.sessions.len(), "Rebuilt session snapshot");
            snapshots.insert(self.inner.id, snapshot);
        }
        snapshots
            .get(&self.inner.id)
            .and_then(|snapshot| snapshot.sessions.get(session_id).cloned())
    }

    fn copy_snapshot(&self) -> Snapshot {
        let sessions = self.inner.sessions.lock();
        Snapshot {
            owner: Arc::downgrade(&self.inner),
            version: self.inner.version.load(Ordering::Acquire),
            sessions: sessions.clone(),
        }
    }
}
