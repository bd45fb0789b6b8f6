//! Registry of active sessions, ordered by id.
//!
//! The registry holds weak references: it never keeps a session alive on
//! its own (the session's I/O tasks and user handles do that), and a
//! session removes itself when it closes.
//!
//! [`for_each`](SessionRegistry::for_each) releases the lock around
//! every callback and resumes from the next id above the last one
//! visited, so callbacks may connect, close or otherwise mutate the
//! registry without deadlocking, and sessions destroyed mid-iteration
//! are skipped cleanly.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, Weak};

use crate::session::Session;

/// Map of active session id → session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<BTreeMap<u64, Weak<Session>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Weak<Session>>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn insert(&self, session: &Arc<Session>) {
        self.lock().insert(session.id(), Arc::downgrade(session));
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Look up a session by id.
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Check whether no live sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit live sessions in id order. The callback runs without the
    /// registry lock held; returning `false` stops the iteration.
    /// Returns the number of sessions the callback completed.
    ///
    /// Iteration resumes after the last visited id, so sessions inserted
    /// behind the cursor are not revisited and sessions removed ahead of
    /// it are skipped.
    pub fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Arc<Session>) -> bool,
    {
        let mut count = 0;
        let mut last_id = 0u64;
        loop {
            let next = {
                let mut map = self.lock();
                let mut found = None;
                let mut dead = Vec::new();
                for (&id, weak) in map.range((Bound::Excluded(last_id), Bound::Unbounded)) {
                    match weak.upgrade() {
                        Some(session) => {
                            found = Some((id, session));
                            break;
                        }
                        None => dead.push(id),
                    }
                }
                for id in dead {
                    map.remove(&id);
                }
                found
            };

            match next {
                None => return count,
                Some((id, session)) => {
                    last_id = id;
                    if !f(&session) {
                        return count;
                    }
                    count += 1;
                }
            }
        }
    }
}
