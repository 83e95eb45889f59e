// src/system/storage.rs

//! Per-workspace stores bound on console resets.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Failures opening a store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    #[error("Invalid store path '{0}'")]
    InvalidPath(PathBuf),
}

/// A handle on the store bound to one workspace.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    path: PathBuf,
    data: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl StoreHandle {
    /// The workspace the store belongs to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.borrow().get(key).cloned()
    }

    /// Sets `key`.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.borrow_mut().insert(key.into(), value);
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.borrow_mut().remove(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Whether the store holds no key.
    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

/// Hands out one store per path and releases them all on `free`.
pub trait StoragePool {
    fn get(&mut self, path: &Path) -> Result<StoreHandle, StorageError>;
    fn free(&mut self);
    fn len(&self) -> usize;
}

/// Stores kept in memory for the session, one per workspace.
#[derive(Debug, Default)]
pub struct MemoryStoragePool {
    stores: BTreeMap<PathBuf, StoreHandle>,
}

impl StoragePool for MemoryStoragePool {
    fn get(&mut self, path: &Path) -> Result<StoreHandle, StorageError> {
        if path.as_os_str().is_empty() || path.file_name().is_none() {
            return Err(StorageError::InvalidPath(path.to_path_buf()));
        }
        let handle = self
            .stores
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                log::debug!("Opening store {}", path.display());
                StoreHandle {
                    path: path.to_path_buf(),
                    data: Rc::default(),
                }
            });
        Ok(handle.clone())
    }

    fn free(&mut self) {
        log::debug!("Releasing {} store(s)", self.stores.len());
        self.stores.clear();
    }

    fn len(&self) -> usize {
        self.stores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_path_same_store() {
        let mut pool = MemoryStoragePool::default();
        let a = pool.get(Path::new("/ws/store.db")).unwrap();
        a.insert("hosts", json!(["10.0.0.1"]));
        let b = pool.get(Path::new("/ws/store.db")).unwrap();
        assert_eq!(b.get("hosts"), Some(json!(["10.0.0.1"])));
        assert_eq!(pool.len(), 1);

        pool.get(Path::new("/other/store.db")).unwrap();
        assert_eq!(pool.len(), 2);
        pool.free();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_invalid_path() {
        let mut pool = MemoryStoragePool::default();
        assert!(pool.get(Path::new("")).is_err());
    }
}
