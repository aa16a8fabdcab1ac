//! Persistence scopes. `FileStorage` survives restarts; `MemoryStorage`
//! lives as long as the process and backs the session scope.

use serde_json::{Number, Value};
use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::Mutex,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] io::Error),
    #[error("storage json failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// True for integers that fit neither `i64` nor `u64`.
pub fn is_big_integer(number: &Number) -> bool {
    !number.is_i64() && !number.is_u64() && !number.is_f64()
}

/// Rewrites every big integer as its decimal string so the stored document
/// stays readable by consumers limited to 64-bit numbers.
pub fn encode_big_integers(value: Value) -> Value {
    match value {
        Value::Number(number) if is_big_integer(&number) => Value::String(number.to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(encode_big_integers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, encode_big_integers(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Reads `key` as JSON. Missing keys, failed reads and corrupt documents
/// all come back as `None`.
pub fn read_json(storage: &dyn Storage, key: &str) -> Option<Value> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(event = "storage_read_error", key = key, error = %err);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(event = "storage_corrupt", key = key, error = %err);
            None
        }
    }
}

pub fn write_json(storage: &dyn Storage, key: &str, value: Value) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(&encode_big_integers(value))?;
    storage.set(key, &encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_storage_round_trips_and_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("state"));
        assert_eq!(storage.get("rdt_settings").expect("get"), None);
        storage.set("rdt_settings", "{\"port\":1}").expect("set");
        assert_eq!(
            storage.get("rdt_settings").expect("get").as_deref(),
            Some("{\"port\":1}")
        );
        assert!(!dir.path().join("state/.rdt_settings.json.tmp").exists());
        storage.remove("rdt_settings").expect("remove");
        storage.remove("rdt_settings").expect("remove twice");
        assert_eq!(storage.get("rdt_settings").expect("get"), None);
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path());
        assert!(matches!(
            storage.set("../escape", "{}"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(storage.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn corrupt_documents_read_as_missing() {
        let storage = MemoryStorage::new();
        storage.set("rdt_state", "{truncated").expect("set");
        assert_eq!(read_json(&storage, "rdt_state"), None);
        assert_eq!(read_json(&storage, "absent"), None);
    }

    #[test]
    fn big_integers_are_written_as_strings() {
        let storage = MemoryStorage::new();
        let value: Value = serde_json::from_str(
            r#"{"small": 7, "ratio": 0.5, "nested": [123456789012345678901234567890]}"#,
        )
        .expect("json");
        write_json(&storage, "rdt_state", value).expect("write");

        let stored = read_json(&storage, "rdt_state").expect("stored");
        assert_eq!(stored["small"], json!(7));
        assert_eq!(stored["ratio"], json!(0.5));
        assert_eq!(stored["nested"][0], json!("123456789012345678901234567890"));

        let reencoded =
            serde_json::to_string(&encode_big_integers(stored.clone())).expect("encode");
        assert_eq!(serde_json::from_str::<Value>(&reencoded).expect("json"), stored);
    }
}
