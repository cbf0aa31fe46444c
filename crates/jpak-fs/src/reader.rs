//! Archive readers consumed by the filesystem adapter.
//!
//! The adapter never parses packages itself. It asks an [`ArchiveReader`] to
//! load, looks entries up in the reader's index, and requests byte ranges.

use futures::future::BoxFuture;
use jpak_format::{parse_index, DirectoryEntry, Error, FileEntry, JpakArchive, Result};
use log::debug;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Future returned by the asynchronous reader operations.
pub type ReaderFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Source of the entry index and file content for a mount.
///
/// Lookups only see entries once `load` has completed; before that they
/// return `None`.
pub trait ArchiveReader: Send + Sync {
    /// Parse the package and build the entry index.
    fn load(&self) -> ReaderFuture<'_, ()>;

    /// Find a directory entry by path. `"/"` is the root.
    fn find_directory_entry(&self, path: &str) -> Option<&DirectoryEntry>;

    /// Find a file entry by path.
    fn find_file_entry(&self, path: &str) -> Option<&FileEntry>;

    /// Fetch up to `len` bytes of a file's content starting at `offset`.
    fn fetch_range(&self, path: &str, offset: u64, len: u64) -> ReaderFuture<'_, Vec<u8>>;
}

fn not_loaded() -> Error {
    Error::IoError(io::Error::new(io::ErrorKind::Other, "archive is not loaded"))
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::IoError(io::Error::new(io::ErrorKind::Other, e))
}

/// Reader for a package file on local disk.
///
/// Parsing and positional reads run on tokio's blocking pool so a slow disk
/// never stalls the task that dispatches filesystem requests.
#[derive(Debug)]
pub struct LocalArchive {
    path: PathBuf,
    archive: OnceLock<Arc<JpakArchive>>,
}

impl LocalArchive {
    /// Create a reader for the package at `path`. Nothing is read until `load`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            archive: OnceLock::new(),
        }
    }

    /// Path of the package file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// The parsed package, once loaded.
    pub fn archive(&self) -> Option<&JpakArchive> {
        self.archive.get().map(|a| a.as_ref())
    }
}

impl ArchiveReader for LocalArchive {
    fn load(&self) -> ReaderFuture<'_, ()> {
        Box::pin(async move {
            if self.archive.get().is_some() {
                return Ok(());
            }

            let path = self.path.clone();
            let archive = tokio::task::spawn_blocking(move || JpakArchive::open(path))
                .await
                .map_err(join_error)??;

            debug!(
                "Loaded {} ({} entries, {} bytes of content)",
                self.path.display(),
                archive.entry_count(),
                archive.total_size()
            );
            let _ = self.archive.set(Arc::new(archive));
            Ok(())
        })
    }

    fn find_directory_entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.archive()?.find_directory_entry(path)
    }

    fn find_file_entry(&self, path: &str) -> Option<&FileEntry> {
        self.archive()?.find_file_entry(path)
    }

    fn fetch_range(&self, path: &str, offset: u64, len: u64) -> ReaderFuture<'_, Vec<u8>> {
        let archive = self.archive.get().cloned();
        let path = path.to_string();
        Box::pin(async move {
            let archive = archive.ok_or_else(not_loaded)?;
            tokio::task::spawn_blocking(move || archive.read_range(&path, offset, len))
                .await
                .map_err(join_error)?
        })
    }
}

/// Reader over a package held entirely in memory.
#[derive(Debug)]
pub struct MemoryArchive {
    data: Vec<u8>,
    root: OnceLock<DirectoryEntry>,
}

impl MemoryArchive {
    /// Wrap complete package bytes. The index is parsed on `load`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            root: OnceLock::new(),
        }
    }
}

impl ArchiveReader for MemoryArchive {
    fn load(&self) -> ReaderFuture<'_, ()> {
        Box::pin(async move {
            if self.root.get().is_none() {
                let root = parse_index(&self.data)?;
                let _ = self.root.set(root);
            }
            Ok(())
        })
    }

    fn find_directory_entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.root.get()?.find_directory(path)
    }

    fn find_file_entry(&self, path: &str) -> Option<&FileEntry> {
        self.root.get()?.find_file(path)
    }

    fn fetch_range(&self, path: &str, offset: u64, len: u64) -> ReaderFuture<'_, Vec<u8>> {
        let result = (|| {
            let entry = self
                .find_file_entry(path)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            let start = entry.offset + offset.min(entry.size);
            let end = start + entry.size.saturating_sub(offset).min(len);
            Ok(self.data[start as usize..end as usize].to_vec())
        })();

        Box::pin(async move { result })
    }
}
