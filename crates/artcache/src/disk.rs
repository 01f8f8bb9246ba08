use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::key::ResourceKey;

/// The on-disk tier: one file per cached key inside a single flat directory.
///
/// Every key renders to a 64-character hex file name, so existence is
/// discovered purely by filename lookup; there is no manifest or index.
/// Entries are created on first successful network fetch and persist until
/// an explicit [`clear`](Self::clear). All I/O errors degrade to a cache
/// miss (reads) or are logged and swallowed (writes); this tier is an
/// optimization, never a system of record.
///
/// Writes are atomic whole-file replaces: the payload goes into a temp file
/// inside the cache directory which is then persisted over the final path,
/// so a concurrent reader never observes a partial file.
#[derive(Debug, Clone)]
pub struct DiskCache {
    cache_dir: PathBuf,
}

/// Disk tier usage as reported by [`DiskCache::usage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Number of cache files.
    pub files: usize,
    /// Their summed size in bytes.
    pub bytes: u64,
}

impl DiskCache {
    /// Opens the tier rooted at `cache_dir`, creating the directory if
    /// absent.
    ///
    /// Opening the same directory repeatedly is fine.
    pub fn new(cache_dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// The path of the cache file for `key`.
    pub fn entry_path(&self, key: &ResourceKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Reads the stored bytes for `key`.
    ///
    /// Returns `None` on a missing file and on any read error.
    pub fn get(&self, key: &ResourceKey) -> Option<Bytes> {
        let path = self.entry_path(key);
        match catch_not_found(|| fs::read(&path)) {
            Ok(contents) => contents.map(Bytes::from),
            Err(e) => {
                tracing::debug!(
                    error = &e as &dyn std::error::Error,
                    "Failed to read cache file for `{key}`",
                );
                None
            }
        }
    }

    /// Writes the bytes for `key`, best-effort.
    ///
    /// A failed write leaves the previous state in place; it is logged and
    /// otherwise ignored.
    pub fn put(&self, key: &ResourceKey, contents: &[u8]) {
        if let Err(e) = self.write_atomic(key, contents) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                "Failed to write cache file for `{key}`",
            );
            return;
        }

        metric!(counter("caches.file.write") += 1);
        metric!(time_raw("caches.file.size") = contents.len() as u64);
    }

    fn write_atomic(&self, key: &ResourceKey, contents: &[u8]) -> io::Result<()> {
        // `clear` (or the host itself) can remove the cache directory at any
        // time, so recreate it and retry the fs operations.
        const MAX_RETRIES: usize = 2;
        let mut retries = 0;
        let mut temp_file = loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(&self.cache_dir) {
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match NamedTempFile::new_in(&self.cache_dir) {
                Ok(temp_file) => break temp_file,
                Err(e) => {
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                }
            }
        };

        temp_file.write_all(contents)?;
        temp_file.persist(self.entry_path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Deletes the entire cache directory and recreates it empty,
    /// best-effort.
    pub fn clear(&self) {
        if let Err(e) = catch_not_found(|| fs::remove_dir_all(&self.cache_dir)) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %self.cache_dir.display(),
                "Failed to remove cache directory",
            );
        }
        if let Err(e) = fs::create_dir_all(&self.cache_dir) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %self.cache_dir.display(),
                "Failed to recreate cache directory",
            );
        }
    }

    /// Counts the cache files and their summed size.
    pub fn usage(&self) -> DiskUsage {
        let mut usage = DiskUsage::default();
        let Ok(entries) = fs::read_dir(&self.cache_dir) else {
            return usage;
        };
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.metadata()
                && metadata.is_file()
            {
                usage.files += 1;
                usage.bytes += metadata.len();
            }
        }
        usage
    }
}

fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
