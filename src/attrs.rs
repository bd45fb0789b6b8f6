//! Per-session attribute map.
//!
//! A thread-safe, ordered map from short string keys to [`Any`] values.
//! Sessions carry one of these so handlers can hang protocol state off a
//! connection (the SOCKS5 pattern links peer sessions this way).
//!
//! Conditional operations ([`remove_if`](AttributeSet::remove_if),
//! [`replace_if`](AttributeSet::replace_if)) compare by *reference*
//! equality of [`Any`], and [`compute`](AttributeSet::compute) runs its
//! closure under the map's lock — the closure must not touch the same map
//! again.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::any::Any;

/// Thread-safe ordered key→value map with type-erased values.
#[derive(Debug, Default)]
pub struct AttributeSet {
    inner: Mutex<BTreeMap<String, Any>>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set seeded with the given entries.
    pub fn seeded<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Any)>,
        K: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<_, _>>();
        Self {
            inner: Mutex::new(map),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Any>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Test whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Get the value mapped to `key`.
    pub fn get(&self, key: &str) -> Option<Any> {
        self.lock().get(key).cloned()
    }

    /// Get the value mapped to `key`, cloned out as a `T`.
    pub fn get_as<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.lock().get(key).and_then(|v| v.get::<T>())
    }

    /// Map `key` to `value`, returning the previous value if any.
    pub fn set(&self, key: impl Into<String>, value: Any) -> Option<Any> {
        self.lock().insert(key.into(), value)
    }

    /// Map `key` to `value` only if absent. Returns the current value if
    /// one was already present.
    pub fn emplace(&self, key: impl Into<String>, value: Any) -> Option<Any> {
        let mut map = self.lock();
        let key = key.into();
        if let Some(existing) = map.get(&key) {
            return Some(existing.clone());
        }
        map.insert(key, value);
        None
    }

    /// Replace the value for `key` only if it is present. Returns the
    /// previous value, or `None` when the key was absent (in which case
    /// nothing is inserted).
    pub fn replace(&self, key: &str, value: Any) -> Option<Any> {
        let mut map = self.lock();
        map.get_mut(key)
            .map(|slot| std::mem::replace(slot, value))
    }

    /// Remove the entry for `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Any> {
        self.lock().remove(key)
    }

    /// Remove the entry for `key` only if it currently maps to `expected`
    /// (reference equality). Returns whether the entry was removed.
    pub fn remove_if(&self, key: &str, expected: &Any) -> bool {
        let mut map = self.lock();
        match map.get(key) {
            Some(current) if current.same(expected) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Replace the value for `key` only if it currently maps to `expected`
    /// (reference equality). Returns whether the value was replaced.
    pub fn replace_if(&self, key: &str, expected: &Any, value: Any) -> bool {
        let mut map = self.lock();
        match map.get_mut(key) {
            Some(slot) if slot.same(expected) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Compute the value for `key` atomically. The closure receives the
    /// current value (or `None`); leaving `None` behind removes the entry.
    ///
    /// Runs under the map's lock: other threads block until it returns,
    /// and the closure MUST NOT access this set.
    pub fn compute(&self, key: impl Into<String>, f: impl FnOnce(&mut Option<Any>)) {
        let mut map = self.lock();
        let key = key.into();
        let mut slot = map.remove(&key);
        f(&mut slot);
        if let Some(value) = slot {
            map.insert(key, value);
        }
    }

    /// Iterate entries in key order. The callback runs without the map's
    /// lock held (on a snapshot), so it may access or mutate this set.
    /// Returning `false` stops the iteration. Returns the number of
    /// entries the callback completed.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Any) -> bool) -> usize {
        let snapshot: Vec<(String, Any)> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut count = 0;
        for (key, value) in &snapshot {
            if !f(key, value) {
                return count;
            }
            count += 1;
        }
        count
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
