//! Atomic per-module JSON key-value storage (§4.2).

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KvError {
    #[error("invalid namespace or key: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize value: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// JSON-backed store, one directory per namespace (module name), one file
/// per key. Writes go through a temp file in the same directory followed by
/// a rename, so a reader never observes a partial write.
pub struct KeyValueStore {
    base_dir: PathBuf,
}

fn valid_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains('/')
        && !s.contains('\\')
        && !s.contains('\0')
}

impl KeyValueStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, KvError> {
        if !valid_component(namespace) {
            return Err(KvError::InvalidName(namespace.to_string()));
        }
        let dir = self.base_dir.join(namespace);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn key_path(&self, namespace: &str, key: &str) -> Result<PathBuf, KvError> {
        if !valid_component(key) {
            return Err(KvError::InvalidName(key.to_string()));
        }
        Ok(self.namespace_dir(namespace)?.join(format!("{key}.json")))
    }

    pub fn store<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<(), KvError> {
        let dir = self.namespace_dir(namespace)?;
        let path = self.key_path(namespace, key)?;
        let bytes = serde_json::to_vec(value).map_err(KvError::Serialize)?;
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        fs::write(tmp.path(), &bytes)?;
        tmp.persist(&path).map_err(|e| KvError::Io(e.error))?;
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, KvError> {
        let path = self.key_path(namespace, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(KvError::Deserialize)?,
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_or<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        default: T,
    ) -> Result<T, KvError> {
        Ok(self.load(namespace, key)?.unwrap_or(default))
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Result<(), KvError> {
        let path = self.key_path(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_keys(&self, namespace: &str) -> Result<Vec<String>, KvError> {
        let dir = self.namespace_dir(namespace)?;
        let mut keys: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.strip_suffix(".json").map(|s| s.to_string())
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_then_load_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = KeyValueStore::new(tmp.path()).unwrap();
        kv.store("mymodule", "settings", &json!({"a": 1})).unwrap();
        let loaded: serde_json::Value = kv.load("mymodule", "settings").unwrap().unwrap();
        assert_eq!(loaded, json!({"a": 1}));
    }

    #[test]
    fn missing_key_loads_none() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = KeyValueStore::new(tmp.path()).unwrap();
        let loaded: Option<serde_json::Value> = kv.load("mymodule", "missing").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn delete_then_list_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = KeyValueStore::new(tmp.path()).unwrap();
        kv.store("m", "a", &json!(1)).unwrap();
        kv.store("m", "b", &json!(2)).unwrap();
        assert_eq!(kv.list_keys("m").unwrap(), vec!["a", "b"]);
        kv.delete("m", "a").unwrap();
        assert_eq!(kv.list_keys("m").unwrap(), vec!["b"]);
    }

    #[test]
    fn path_traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = KeyValueStore::new(tmp.path()).unwrap();
        assert!(kv.store("../escape", "k", &json!(1)).is_err());
        assert!(kv.store("m", "../escape", &json!(1)).is_err());
    }
}
