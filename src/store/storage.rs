use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::StorageError;

/// Durable key/text storage backing persistent slots.
///
/// Keys are raw slot names with no namespacing.
pub trait DurableStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn save(&mut self, key: &str, text: &str) -> Result<(), StorageError>;
}

/// In-memory storage area. Clones share the same entries, so a store
/// created later over a clone sees what an earlier store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write raw text under `key`, bypassing any slot.
    pub fn insert(&self, key: &str, text: &str) {
        self.entries.borrow_mut().insert(key.to_string(), text.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl DurableStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }

    fn save(&mut self, key: &str, text: &str) -> Result<(), StorageError> {
        self.insert(key, text);
        Ok(())
    }
}

/// Storage kept in a single JSON document on disk (`{"key": "text", ...}`).
///
/// The whole document is read on open and rewritten on every save.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    /// Open the document at `path`. A missing file is an empty storage area.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, text).map_err(|source| StorageError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl DurableStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, text: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), text.to_string());
        self.flush()
    }
}
