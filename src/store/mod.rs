use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::host::Host;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("state file {} is corrupt: {}", .path.display(), .source)]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no state at {}", .path.display())]
    Missing { path: PathBuf },
    #[error("state file carries an invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("state file {} fails the escrow audit", .path.display())]
    Inconsistent { path: PathBuf },
}

/// Durable home of one [`Host`], stored as a single JSON document.
///
/// Saves go through a uniquely named temporary file and a rename so a crash
/// never leaves a half-written state behind. Writers serialise on an
/// exclusive lock held on a sibling `.lock` file for the whole
/// load, mutate and save sequence (see [`SnapshotStore::update`]).
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

/// Exclusive hold on a store; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Blocks until this process holds the store exclusively.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        fs::create_dir_all(self.dir()).map_err(|source| self.io_err(source))?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| StoreError::Io {
            path: lock_path,
            source,
        })?;
        Ok(StoreLock { file })
    }

    /// Loads the host for a state transition.
    ///
    /// Rejects a state whose config does not validate or whose escrow does
    /// not cover the election ledger, so no write builds on it.
    pub fn load(&self) -> Result<Option<Host>, StoreError> {
        let Some(host) = self.inspect()? else {
            return Ok(None);
        };
        if !host.is_consistent() {
            return Err(StoreError::Inconsistent {
                path: self.path.clone(),
            });
        }
        Ok(Some(host))
    }

    /// Loads the host for read-only reporting. A failed escrow audit is
    /// logged, not rejected.
    pub fn inspect(&self) -> Result<Option<Host>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(|source| self.io_err(source))?;
        let host: Host = serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        host.election().config().validate()?;
        if !host.is_consistent() {
            warn!(path = %self.path.display(), "loaded state fails the escrow audit");
        }
        Ok(Some(host))
    }

    pub fn save(&self, host: &Host) -> Result<(), StoreError> {
        fs::create_dir_all(self.dir()).map_err(|source| self.io_err(source))?;
        let data = serde_json::to_vec_pretty(host).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(self.dir()).map_err(|source| self.io_err(source))?;
        tmp.write_all(&data).map_err(|source| self.io_err(source))?;
        tmp.as_file()
            .sync_all()
            .map_err(|source| self.io_err(source))?;
        tmp.persist(&self.path)
            .map_err(|err| self.io_err(err.error))?;
        Ok(())
    }

    /// Runs one state transition under the store lock: load, apply `f`,
    /// save. Nothing is written when `f` fails.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Host) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _lock = self.lock()?;
        let mut host = self.load()?.ok_or_else(|| StoreError::Missing {
            path: self.path.clone(),
        })?;
        let out = f(&mut host)?;
        self.save(&host)?;
        debug!(path = %self.path.display(), height = host.ledger().meta.height, "state saved");
        Ok(out)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
