use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access variable store {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("variable store {} is not a flat mapping: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Backing resource for variables that outlive a single executor.
///
/// Implementations do not lock across calls: `write_merge` is a
/// read-modify-write of the whole document, so two writers racing on the
/// same backing resource may lose each other's keys. Callers that run cases
/// concurrently must serialize access themselves.
pub trait PersistedStore {
    fn read_all(&self) -> Result<Variables, StoreError>;

    fn read_one(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    /// Overwrites colliding keys with `values`, keeping everything else.
    fn write_merge(&self, values: &Variables) -> Result<(), StoreError>;

    fn truncate(&self) -> Result<(), StoreError>;
}

/// A YAML document on disk, rewritten in full on every save.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl PersistedStore for FileStore {
    fn read_all(&self) -> Result<Variables, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Variables::new()),
            Err(err) => return Err(self.io_error(err)),
        };
        if content.trim().is_empty() {
            return Ok(Variables::new());
        }
        let parsed: Option<Variables> =
            serde_yaml::from_str(&content).map_err(|source| StoreError::Format {
                path: self.path.clone(),
                source,
            })?;
        Ok(parsed.unwrap_or_default())
    }

    fn write_merge(&self, values: &Variables) -> Result<(), StoreError> {
        let mut existing = self.read_all()?;
        existing.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        let rendered = serde_yaml::to_string(&existing).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, rendered).map_err(|err| self.io_error(err))
    }

    fn truncate(&self) -> Result<(), StoreError> {
        fs::write(&self.path, "").map_err(|err| self.io_error(err))
    }
}

/// Process-local store, used in tests and for runs that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<Variables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Variables) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Variables> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistedStore for MemoryStore {
    fn read_all(&self) -> Result<Variables, StoreError> {
        Ok(self.lock().clone())
    }

    fn write_merge(&self, values: &Variables) -> Result<(), StoreError> {
        let mut guard = self.lock();
        guard.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn truncate(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }
}

/// Variables extracted during the lifetime of one executor.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    values: Variables,
}

impl SessionStore {
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn extend(&mut self, values: &Variables) {
        self.values
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn all(&self) -> &Variables {
        &self.values
    }
}

/// Merges the three variable tiers, highest precedence first: the session,
/// the persisted store, then external defaults, which only fill gaps.
pub fn merge_variables(session: &Variables, persisted: &Variables, external: &Variables) -> Variables {
    let mut merged = persisted.clone();
    merged.extend(session.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (key, value) in external {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    merged
}
