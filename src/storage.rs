use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::{debug, info};

use crate::{error::StorageError, geo::GeoCoordinate};

pub const LAST_LOCATION_KEY: &str = "location.last_known";

/// Small string key-value store for user preferences and cached state.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Key-value store backed by a TOML document on disk.
///
/// Every `set` rewrites the file; edits made by hand to other keys are kept.
#[derive(Debug)]
pub struct TomlStore {
    path: PathBuf,
    document: DocumentMut,
}

impl TomlStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let document = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            text.parse::<DocumentMut>()?
        } else {
            info!("Creating new store at {}", path.display());
            DocumentMut::new()
        };
        Ok(TomlStore { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, self.document.to_string())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for TomlStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .document
            .get(key)
            .and_then(|item| item.as_str())
            .map(str::to_owned))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.document[key] = toml_edit::value(value);
        debug!("store: set {key}");
        self.flush()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Last known position, kept across sessions for a fast cold start.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct CachedLocation {
    pub coordinate: GeoCoordinate,
    pub fixed_at: DateTime<Utc>,
}

pub fn load_cached_location(
    store: &impl KeyValueStore,
) -> Result<Option<CachedLocation>, StorageError> {
    match store.get(LAST_LOCATION_KEY)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_cached_location(
    store: &mut impl KeyValueStore,
    location: &CachedLocation,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(location)?;
    store.set(LAST_LOCATION_KEY, &json)
}
