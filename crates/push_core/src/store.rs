//! Key/value view over the `requests/`, `tokens/` and `updates/` layout.
//!
//! The same [`ObjectStore`] interface fronts both the local mirror and the
//! remote bucket. Keys are `/`-separated paths relative to the store root,
//! e.g. `requests/abc.json`. A [`Mirror`] bridges the two sides.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

pub const REQUESTS_PREFIX: &str = "requests";
pub const TOKENS_PREFIX: &str = "tokens";
pub const UPDATES_PREFIX: &str = "updates";

pub fn request_key(backend_key: &str) -> String {
    format!("{REQUESTS_PREFIX}/{backend_key}.json")
}

pub fn token_key(device: &str) -> String {
    format!("{TOKENS_PREFIX}/{device}.json")
}

pub fn device_updates_prefix(device: &str) -> String {
    format!("{UPDATES_PREFIX}/{device}")
}

pub fn update_batch_key(device: &str, batch_id: &str) -> String {
    format!("{}/{batch_id}.json", device_updates_prefix(device))
}

/// File name of `key` without directories or extension.
pub fn key_stem(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.strip_suffix(".json").unwrap_or(name)
}

pub trait ObjectStore: Send + Sync {
    /// Keys below `prefix`, sorted. An absent prefix yields an empty list.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// A key that does not exist fails with [`Error::NotFound`].
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removing a key that does not exist succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key below `prefix`.
    fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// Synchronizes a remote store with the local mirror.
pub trait Mirror: Send + Sync {
    /// Makes the local mirror an exact copy of the remote store, deleting
    /// local records that no longer exist remotely.
    fn pull(&self) -> Result<()>;

    /// Uploads the local subtree below `prefix` to the remote store.
    fn push(&self, prefix: &str) -> Result<()>;
}

/// Object store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(segments.join("/"))
    }
}

impl ObjectStore for FsStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.path_for(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.map_err(|err| Error::store(prefix, err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.key_for(entry.path()) {
                Some(key) => keys.push(key),
                None => {
                    tracing::debug!(path = %entry.path().display(), "skipping non utf-8 path");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.path_for(key)).map_err(|err| Error::store_io(key, err))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::store_io(key, err))?;
        }
        fs::write(&path, bytes).map_err(|err| Error::store_io(key, err))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::store_io(key, err)),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        match fs::remove_dir_all(self.path_for(prefix)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::store_io(prefix, err)),
        }
    }
}

/// Store wrapper that fails reads of chosen keys the way a flaky disk would.
#[cfg(test)]
pub(crate) struct FlakyReads<'a> {
    pub inner: &'a dyn ObjectStore,
    pub failing: Vec<&'static str>,
}

#[cfg(test)]
impl ObjectStore for FlakyReads<'_> {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        if self.failing.contains(&key) {
            return Err(Error::store(key, "EIO"));
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.write(key, bytes)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.delete_prefix(prefix)
    }
}
