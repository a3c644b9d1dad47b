//! Content-addressed response cache on disk.
//!
//! Layout: `<root>/<namespace>/<fingerprint hex>`, one file per response,
//! file content is the raw response body and the file mtime is its storage
//! time. Writes land in a temporary file in the same directory and are
//! renamed into place, so a concurrent reader sees either the old or the new
//! body, never a partial one.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::{error::CacheIoError, fingerprint::Fingerprint, RequestDescriptor};

/// Outcome of a cache lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Vec<u8>),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Disk store keyed by request [`Fingerprint`].
#[derive(Clone, Debug)]
pub struct FingerprintCache {
    dir: PathBuf,
}

impl FingerprintCache {
    /// Cache rooted at `root/namespace`. Nothing is created until the first
    /// write.
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            dir: root.as_ref().join(namespace),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, descriptor: &RequestDescriptor) -> PathBuf {
        self.path_for_fingerprint(&descriptor.fingerprint())
    }

    fn path_for_fingerprint(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.to_hex())
    }

    pub fn read(&self, descriptor: &RequestDescriptor) -> Result<CacheLookup, CacheIoError> {
        let path = self.path_for(descriptor);
        match fs::read(&path) {
            Ok(bytes) => Ok(CacheLookup::Hit(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(CacheLookup::Miss),
            Err(err) => Err(CacheIoError::new("read", path, err)),
        }
    }

    /// Stores `payload` for `descriptor`, replacing any previous entry.
    pub fn write(&self, descriptor: &RequestDescriptor, payload: &[u8]) -> Result<(), CacheIoError> {
        fs::create_dir_all(&self.dir).map_err(|err| CacheIoError::new("create", &self.dir, err))?;

        let path = self.path_for(descriptor);
        let mut staged =
            NamedTempFile::new_in(&self.dir).map_err(|err| CacheIoError::new("write", &path, err))?;
        staged
            .write_all(payload)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|err| CacheIoError::new("write", &path, err))?;
        staged
            .persist(&path)
            .map_err(|err| CacheIoError::new("persist", &path, err.error))?;
        Ok(())
    }

    /// Deletes the entry for `descriptor`. Returns whether one existed.
    pub fn invalidate(&self, descriptor: &RequestDescriptor) -> Result<bool, CacheIoError> {
        remove_if_present(&self.path_for(descriptor))
    }

    /// When the entry for `descriptor` was stored, if there is one.
    pub fn stored_at(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<DateTime<Utc>>, CacheIoError> {
        let path = self.path_for(descriptor);
        match modified(&path) {
            Ok(time) => Ok(Some(time.into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheIoError::new("stat", path, err)),
        }
    }

    /// Deletes the entry if it was stored before `updated_at`, the time the
    /// underlying resource last changed. Returns whether it was deleted.
    pub fn invalidate_if_stale(
        &self,
        descriptor: &RequestDescriptor,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, CacheIoError> {
        match self.stored_at(descriptor)? {
            Some(stored) if stored < updated_at => {
                tracing::debug!(
                    path = %self.path_for(descriptor).display(),
                    %stored,
                    %updated_at,
                    "cache entry predates resource update"
                );
                self.invalidate(descriptor)
            }
            _ => Ok(false),
        }
    }

    /// Removes every entry in this namespace.
    pub fn clear(&self) -> Result<(), CacheIoError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheIoError::new("clear", &self.dir, err)),
        }
    }

    /// Removes entries stored more than `max_age` ago. Returns how many were
    /// removed.
    pub fn purge_older_than(&self, max_age: Duration) -> Result<usize, CacheIoError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheIoError::new("list", &self.dir, err)),
        };

        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in entries {
            let entry = entry.map_err(|err| CacheIoError::new("list", &self.dir, err))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stored = modified(&path).map_err(|err| CacheIoError::new("stat", &path, err))?;
            if stored < cutoff && remove_if_present(&path)? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

fn remove_if_present(path: &Path) -> Result<bool, CacheIoError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(CacheIoError::new("remove", path, err)),
    }
}
