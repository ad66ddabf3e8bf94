//! Persistence backends for wallet state.
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`MemoryStorage`] | Tests and short-lived processes |
//! | [`FileStorage`] | One JSON file per key under a data directory (`file-storage` feature) |
//!
//! Only `{accounts, chain, price}` is ever written; pending requests stay in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::StorageError;

/// Key under which the store is persisted.
pub const STORE_KEY: &str = "batua.store";

/// A key-value persistence backend.
pub trait Storage: Send + Sync {
    /// Read an item, `None` if it was never written.
    fn get_item<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Value>, StorageError>>;

    /// Write an item, replacing any previous value.
    fn set_item<'a>(&'a self, name: &'a str, value: Value) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Remove an item. Removing a missing item is not an error.
    fn remove_item<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get_item<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Value>, StorageError>> {
        Box::pin(async move { Ok(self.lock()?.get(name).cloned()) })
    }

    fn set_item<'a>(&'a self, name: &'a str, value: Value) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.lock()?.insert(name.to_string(), value);
            Ok(())
        })
    }

    fn remove_item<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.lock()?.remove(name);
            Ok(())
        })
    }
}

#[cfg(feature = "file-storage")]
pub use file::FileStorage;

#[cfg(feature = "file-storage")]
mod file {
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use futures::future::BoxFuture;
    use serde_json::Value;

    use super::Storage;
    use crate::error::StorageError;

    /// File-backed storage: one `<name>.json` file per item.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use batua::storage::FileStorage;
    ///
    /// // ~/.local/share/batua on Linux
    /// let storage = FileStorage::default_location().unwrap();
    /// ```
    #[derive(Debug, Clone)]
    pub struct FileStorage {
        dir: PathBuf,
    }

    impl FileStorage {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        /// Storage under the platform data directory.
        pub fn default_location() -> Result<Self, StorageError> {
            let dir = dirs::data_dir().ok_or_else(|| {
                StorageError::Backend("could not determine data directory".to_string())
            })?;
            Ok(Self::new(dir.join("batua")))
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        fn path(&self, name: &str) -> PathBuf {
            let file: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
                .collect();
            self.dir.join(format!("{file}.json"))
        }
    }

    impl Storage for FileStorage {
        fn get_item<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Option<Value>, StorageError>> {
            Box::pin(async move {
                match std::fs::read_to_string(self.path(name)) {
                    Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
        }

        fn set_item<'a>(
            &'a self,
            name: &'a str,
            value: Value,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                std::fs::create_dir_all(&self.dir)?;
                let content = serde_json::to_string_pretty(&value)?;
                std::fs::write(self.path(name), content)?;
                Ok(())
            })
        }

        fn remove_item<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
            Box::pin(async move {
                match std::fs::remove_file(self.path(name)) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            })
        }
    }
}
