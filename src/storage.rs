//! Durable key-value storage for session credentials.
//!
//! The gateway only ever touches two keys, [`ACCESS_TOKEN_KEY`] and
//! [`REFRESH_TOKEN_KEY`], and only through [`Session`](crate::Session).
//! Backends are synchronous: every read and write completes before the
//! call returns.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Error;

/// Storage key holding the current access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage key holding the current refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Consumer-provided credential persistence.
///
/// Implement this to keep tokens in an OS keychain, a browser-like
/// local store, or a database row.
///
/// # Example
///
/// ```rust,ignore
/// impl CredentialStore for Keychain {
///     fn get(&self, key: &str) -> Result<Option<String>, Error> {
///         self.entry(key).get_password().map(Some).or_else(not_found_as_none)
///     }
///     fn set(&self, key: &str, value: &str) -> Result<(), Error> { ... }
///     fn remove(&self, key: &str) -> Result<(), Error> { ... }
/// }
/// ```
pub trait CredentialStore: Send + Sync + 'static {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Store several entries as one write: either all land or none do.
    ///
    /// The default applies each entry with [`set`](Self::set) and is only
    /// as atomic as the backend. Override it when the backend can commit
    /// several keys at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be written.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), Error> {
        entries.iter().try_for_each(|(key, value)| self.set(key, value))
    }

    /// Delete `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Process-local store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), Error> {
        let mut map = self.entries.write();
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(feature = "file-store")]
pub use file::FileStore;

#[cfg(feature = "file-store")]
mod file {
    use std::collections::HashMap;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;

    use super::CredentialStore;
    use crate::error::Error;

    /// Store backed by a single JSON object on disk.
    ///
    /// The file is loaded on first access and rewritten after every
    /// mutation. A missing file reads as an empty store. A mutation is
    /// visible to readers only once it has been renamed into place.
    #[derive(Debug)]
    pub struct FileStore {
        path: PathBuf,
        cache: Mutex<Option<HashMap<String, String>>>,
    }

    impl FileStore {
        #[must_use]
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                cache: Mutex::new(None),
            }
        }

        /// Location of the backing file.
        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn load(&self) -> Result<HashMap<String, String>, Error> {
            match std::fs::read(&self.path) {
                Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
                Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Storage(format!("{}: invalid JSON: {e}", self.path.display()))
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
                Err(e) => Err(Error::Storage(format!("{}: {e}", self.path.display()))),
            }
        }

        fn persist(&self, entries: &HashMap<String, String>) -> Result<(), Error> {
            let bytes = serde_json::to_vec_pretty(entries)
                .map_err(|e| Error::Storage(e.to_string()))?;
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("{}: {e}", parent.display())))?;
            }
            // Readers never observe a partially written file.
            let tmp = self.path.with_extension("tmp");
            std::fs::write(&tmp, bytes)
                .map_err(|e| Error::Storage(format!("{}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, &self.path)
                .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
        }

        fn read<T>(&self, f: impl FnOnce(&HashMap<String, String>) -> T) -> Result<T, Error> {
            let mut cache = self.cache.lock();
            let entries = match cache.take() {
                Some(entries) => entries,
                None => self.load()?,
            };
            Ok(f(&*cache.insert(entries)))
        }

        /// Apply `f` to a copy of the entries; persist and publish the copy
        /// only if `f` changed something and the write succeeds.
        fn update(&self, f: impl FnOnce(&mut HashMap<String, String>) -> bool) -> Result<(), Error> {
            let mut cache = self.cache.lock();
            let mut next = match cache.as_ref() {
                Some(entries) => entries.clone(),
                None => self.load()?,
            };
            if f(&mut next) {
                self.persist(&next)?;
            }
            *cache = Some(next);
            Ok(())
        }
    }

    impl CredentialStore for FileStore {
        fn get(&self, key: &str) -> Result<Option<String>, Error> {
            self.read(|entries| entries.get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<(), Error> {
            self.set_many(&[(key, value)])
        }

        fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), Error> {
            self.update(|map| {
                for (key, value) in entries {
                    map.insert((*key).to_owned(), (*value).to_owned());
                }
                !entries.is_empty()
            })
        }

        fn remove(&self, key: &str) -> Result<(), Error> {
            self.update(|map| map.remove(key).is_some())
        }
    }
}
