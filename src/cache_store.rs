//! Cache Store
//! Content-addressed file cache. Entries are immutable once published:
//! a write lands in a temporary file in the same directory and is renamed
//! over the final path, so readers see either nothing or the whole file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::OptimizerError;

const TEMP_PREFIX: &str = ".tmp-";

/// Host-facing invalidation hook, called on content save, comment, trash
/// and theme switch
pub trait Invalidator: Send + Sync {
    /// Remove every cached artifact
    fn purge(&self) -> Result<(), OptimizerError>;
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    /// Public URL the root directory is served from
    public_url: Option<String>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, public_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf, OptimizerError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Public URL for a key, when the store is web-exposed
    pub fn url_for(&self, key: &str) -> Option<String> {
        self.public_url.as_ref().map(|base| format!("{}/{}", base, key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>, OptimizerError> {
        Ok(fs::read(self.path_for(key)?)?)
    }

    /// Create the directory if needed and check that files can be created in it
    pub fn ensure_writable(&self) -> Result<(), OptimizerError> {
        let not_writable = || OptimizerError::DirectoryNotWritable {
            path: self.root.clone(),
        };

        fs::create_dir_all(&self.root).map_err(|_| not_writable())?;
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|_| not_writable())?;
        Ok(())
    }

    /// Publish `bytes` under `key`
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, OptimizerError> {
        let path = self.path_for(key)?;
        let write_failed = |source: std::io::Error| OptimizerError::WriteFailed {
            path: path.clone(),
            source,
        };

        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(write_failed)?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(write_failed)?;
        temp.write_all(bytes).map_err(write_failed)?;
        temp.as_file().sync_all().map_err(write_failed)?;
        temp.persist(&path).map_err(|e| write_failed(e.error))?;

        tracing::debug!("Cache store: Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Remove all entries; the directory is left in place, empty
    pub fn purge(&self) -> Result<(), OptimizerError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root)?;

        tracing::info!("Cache store: Purged {}", self.root.display());
        Ok(())
    }
}

impl Invalidator for CacheStore {
    fn purge(&self) -> Result<(), OptimizerError> {
        CacheStore::purge(self)
    }
}

/// Purges several stores as one operation
pub struct CacheInvalidator {
    stores: Vec<CacheStore>,
}

impl CacheInvalidator {
    pub fn new(stores: Vec<CacheStore>) -> Self {
        Self { stores }
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.stores.iter().map(|s| s.root().to_path_buf()).collect()
    }
}

impl Invalidator for CacheInvalidator {
    fn purge(&self) -> Result<(), OptimizerError> {
        for store in &self.stores {
            store.purge()?;
        }
        Ok(())
    }
}

/// Keys are relative names below the store root
fn validate_key(key: &str) -> Result<(), OptimizerError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.starts_with(TEMP_PREFIX)
        && path.components().all(|c| matches!(c, Component::Normal(_)));

    if valid {
        Ok(())
    } else {
        Err(OptimizerError::InvalidCacheKey(key.to_string()))
    }
}
