// src/state.rs

//! The shared key-value state store consulted by `state` requirements.
//!
//! Modules and other collaborators write findings here (e.g. discovered
//! interfaces); the core only reads it. The store journals its first
//! mutation so that it is only persisted when it actually changed.

use serde_json::{Map, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// The JSON object behind a [`StateStore`].
pub type StateMap = Map<String, Value>;

/// Failures reading or writing the state file.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Could not read state file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write state file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("State file '{path}' is not a JSON object: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Tracks whether the map was mutated since it was loaded.
#[derive(Debug)]
enum Journal {
    /// No mutable access was requested yet.
    Pristine(StateMap),
    /// Mutable access was handed out; the snapshot is kept for comparison.
    Dirty { original: StateMap, current: StateMap },
}

impl Journal {
    fn map(&self) -> &StateMap {
        match self {
            Self::Pristine(map) => map,
            Self::Dirty { current, .. } => current,
        }
    }

    fn map_mut(&mut self) -> &mut StateMap {
        if let Self::Pristine(map) = self {
            let original = std::mem::take(map);
            *self = Self::Dirty {
                current: original.clone(),
                original,
            };
        }
        match self {
            Self::Dirty { current, .. } => current,
            Self::Pristine(map) => map,
        }
    }
}

/// A cloneable handle over the process-wide state map.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Rc<RefCell<Journal>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::from_map(StateMap::new())
    }
}

impl StateStore {
    /// A clean store holding `map`.
    pub fn from_map(map: StateMap) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Journal::Pristine(map))),
        }
    }

    /// Loads the store from a JSON file; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| StateError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let map: StateMap = serde_json::from_str(&content).map_err(|e| StateError::Format {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::from_map(map))
    }

    /// Read-only view of the map.
    pub fn read(&self) -> StateGuard<'_> {
        StateGuard {
            guard: self.inner.borrow(),
        }
    }

    /// Mutable view of the map; the first call marks the store dirty.
    pub fn write(&self) -> StateGuardMut<'_> {
        StateGuardMut {
            guard: self.inner.borrow_mut(),
        }
    }

    /// A copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Sets `key`, marking the store dirty.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
    }

    /// Whether the content differs from what was loaded.
    pub fn needs_saving(&self) -> bool {
        match &*self.inner.borrow() {
            Journal::Pristine(_) => false,
            Journal::Dirty { original, current } => original != current,
        }
    }

    /// Writes the store to `path` if it changed since it was loaded, then
    /// takes a fresh snapshot. Returns whether anything was written.
    pub fn save_if_dirty(&self, path: &Path) -> Result<bool, StateError> {
        if !self.needs_saving() {
            return Ok(false);
        }
        let current = self.read().clone();
        let content = serde_json::to_string_pretty(&current).map_err(|e| StateError::Format {
            path: path.display().to_string(),
            source: e,
        })?;
        fs::write(path, content).map_err(|e| StateError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        *self.inner.borrow_mut() = Journal::Pristine(current);
        log::debug!("State saved to '{}'", path.display());
        Ok(true)
    }
}

/// Read access to the map of a [`StateStore`].
pub struct StateGuard<'a> {
    guard: Ref<'a, Journal>,
}

impl fmt::Debug for StateGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateGuard").field(self.guard.map()).finish()
    }
}

impl Deref for StateGuard<'_> {
    type Target = StateMap;

    fn deref(&self) -> &Self::Target {
        self.guard.map()
    }
}

/// Write access to the map of a [`StateStore`].
pub struct StateGuardMut<'a> {
    guard: RefMut<'a, Journal>,
}

impl fmt::Debug for StateGuardMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateGuardMut").field(self.guard.map()).finish()
    }
}

impl Deref for StateGuardMut<'_> {
    type Target = StateMap;

    fn deref(&self) -> &Self::Target {
        self.guard.map()
    }
}

impl DerefMut for StateGuardMut<'_> {
    fn deref_mut(&mut self) -> &mut StateMap {
        self.guard.map_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_read_access_keeps_store_pristine() {
        let store = StateStore::from_map(json!({"A": 1}).as_object().unwrap().clone());
        assert_eq!(store.get("A"), Some(json!(1)));
        assert!(!store.needs_saving());
    }

    #[test]
    fn test_mutation_marks_dirty_only_when_changed() {
        let store = StateStore::default();
        {
            let _guard = store.write();
        }
        assert!(!store.needs_saving(), "mutable access without change is not dirty");

        store.insert("IFACES", json!({"wlan0": {"monitor": true}}));
        assert!(store.needs_saving());
        assert!(store.contains("IFACES"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::default();
        store.insert("KEY", json!(["a", "b"]));

        // --- Execute ---
        assert!(store.save_if_dirty(&path).unwrap());
        assert!(!store.save_if_dirty(&path).unwrap());
        let reloaded = StateStore::load(&path).unwrap();

        // --- Assert ---
        assert_eq!(reloaded.get("KEY"), Some(json!(["a", "b"])));
    }

    #[test]
    fn test_load_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            StateStore::load(&path),
            Err(StateError::Format { .. })
        ));
    }
}
