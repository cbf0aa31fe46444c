//! Path-based filesystem adapter over an archive reader.
//!
//! [`PackFs`] answers one request per method: every method returns exactly
//! one terminal `Result`, which the bridge turns into a kernel reply.

use crate::error::{FsError, Result};
use crate::reader::ArchiveReader;
use jpak_format::{DirectoryEntry, FileEntry};
use log::{debug, error, info, trace, warn};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU8, Ordering};

/// Size reported for every directory.
pub const DIRECTORY_SIZE: u64 = 4096;

/// Mode reported for every directory: `dr-xr-xr-x`.
pub const DIRECTORY_MODE: u32 = 0o040555;

/// Mode reported for every file: `-r--r--r--`.
pub const FILE_MODE: u32 = 0o100444;

/// Figure used for every synthetic capacity value in [`FsStats`].
pub const STATFS_CAPACITY: u64 = 1_000_000;

/// Maximum file name length reported by `statfs`.
pub const STATFS_NAME_MAX: u32 = 255;

/// The only file handle ever handed out; reads re-resolve by path.
pub const FILE_HANDLE: u64 = 0;

/// Outcome of looking a path up in the entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTarget<'a> {
    /// The path names a directory.
    Directory(&'a DirectoryEntry),
    /// The path names a file.
    File(&'a FileEntry),
    /// The path is not in the index.
    NotFound,
}

/// Kind of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
}

/// Filesystem metadata for a resolved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    pub size: u64,
    /// Full mode including the file type bits.
    pub mode: u32,
}

impl Metadata {
    /// Permission bits only (`mode & 0o7777`).
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Capacity figures reported by `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    pub fragment_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub files_available: u64,
    pub name_max: u32,
}

impl FsStats {
    /// The fixed figures reported for every package.
    pub fn synthetic() -> Self {
        Self {
            block_size: STATFS_CAPACITY as u32,
            fragment_size: STATFS_CAPACITY as u32,
            blocks: STATFS_CAPACITY,
            blocks_free: STATFS_CAPACITY,
            blocks_available: STATFS_CAPACITY,
            files: STATFS_CAPACITY,
            files_free: STATFS_CAPACITY,
            files_available: STATFS_CAPACITY,
            name_max: STATFS_NAME_MAX,
        }
    }
}

/// Mount lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Unmounted = 0,
    Loading = 1,
    Ready = 2,
    Unmounting = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Loading,
            2 => Phase::Ready,
            3 => Phase::Unmounting,
            _ => Phase::Unmounted,
        }
    }
}

/// Map a resolved entry to its filesystem metadata.
pub fn attributes_of(target: ResolvedTarget<'_>) -> Result<Metadata> {
    match target {
        ResolvedTarget::Directory(_) => Ok(Metadata {
            kind: FileKind::Directory,
            size: DIRECTORY_SIZE,
            mode: DIRECTORY_MODE,
        }),
        ResolvedTarget::File(entry) => Ok(Metadata {
            kind: FileKind::RegularFile,
            size: entry.size,
            mode: FILE_MODE,
        }),
        ResolvedTarget::NotFound => Err(FsError::NotFound),
    }
}

fn wants_write(flags: i32) -> bool {
    let access = flags & libc::O_ACCMODE;
    access != libc::O_RDONLY || flags & (libc::O_TRUNC | libc::O_APPEND | libc::O_CREAT) != 0
}

/// Read-only filesystem over the entries of one package.
///
/// Constructed once per mount. Handlers other than `init` and `destroy`
/// report [`FsError::NotReady`] until the archive has loaded, except the
/// write-class handlers, which always report [`FsError::PermissionDenied`].
pub struct PackFs<R> {
    reader: R,
    phase: AtomicU8,
}

impl<R: ArchiveReader> PackFs<R> {
    /// Create an adapter over `reader`. The archive is loaded by [`PackFs::init`].
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            phase: AtomicU8::new(Phase::Unmounted as u8),
        }
    }

    /// The archive reader backing this filesystem.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.phase() {
            Phase::Ready => Ok(()),
            phase => {
                debug!("request rejected in phase {:?}", phase);
                Err(FsError::NotReady)
            }
        }
    }

    /// Load the archive and start serving.
    ///
    /// On failure the filesystem returns to [`Phase::Unmounted`] and the
    /// bridge should refuse the mount.
    pub async fn init(&self) -> Result<()> {
        if self
            .phase
            .compare_exchange(
                Phase::Unmounted as u8,
                Phase::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("init: already started (phase {:?})", self.phase());
            return Err(FsError::InvalidOperation);
        }

        match self.reader.load().await {
            Ok(()) => {
                self.set_phase(Phase::Ready);
                info!("Archive loaded, filesystem ready");
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Unmounted);
                error!("Failed to load archive: {}", e);
                Err(FsError::Load(e))
            }
        }
    }

    /// Stop serving. No archive interaction is needed.
    pub fn destroy(&self) {
        self.set_phase(Phase::Unmounting);
        debug!("destroy: unmounting");
        self.set_phase(Phase::Unmounted);
    }

    /// Look `path` up as a directory first, then as a file. Exact match only.
    pub fn resolve(&self, path: &str) -> ResolvedTarget<'_> {
        if let Some(dir) = self.reader.find_directory_entry(path) {
            ResolvedTarget::Directory(dir)
        } else if let Some(file) = self.reader.find_file_entry(path) {
            ResolvedTarget::File(file)
        } else {
            ResolvedTarget::NotFound
        }
    }

    /// Get the attributes of `path`.
    pub fn getattr(&self, path: &str) -> Result<Metadata> {
        self.ensure_ready()?;
        let result = attributes_of(self.resolve(path));
        trace!("getattr({}) -> {:?}", path, result);
        result
    }

    /// List the names directly under `path`: directories, then files.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_ready()?;
        match self.resolve(path) {
            ResolvedTarget::Directory(dir) => {
                let names = dir.child_names();
                trace!("readdir({}) -> {} names", path, names.len());
                Ok(names)
            }
            ResolvedTarget::File(_) => {
                warn!("readdir: {} is a file", path);
                Err(FsError::InvalidOperation)
            }
            ResolvedTarget::NotFound => Err(FsError::NotFound),
        }
    }

    /// Open the file at `path`, returning the (constant) file handle.
    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        self.ensure_ready()?;
        trace!("open({}, {:#o})", path, flags);
        if self.reader.find_file_entry(path).is_none() {
            return Err(FsError::NotFound);
        }
        if wants_write(flags) {
            warn!("open: write access requested for {}", path);
            return Err(FsError::PermissionDenied);
        }
        Ok(FILE_HANDLE)
    }

    /// Read from the file at `path` into `buf`, starting at `offset`.
    ///
    /// The range is clipped to the file's advertised size; a read at or past
    /// the end returns 0. A failed fetch is logged and also returns 0.
    pub async fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_ready()?;
        trace!("read({}, offset={}, len={})", path, offset, buf.len());

        let entry = self
            .reader
            .find_file_entry(path)
            .ok_or(FsError::NotFound)?;

        if offset >= entry.size {
            trace!("read: offset {} at or beyond size {}", offset, entry.size);
            return Ok(0);
        }

        let wanted = (entry.size - offset).min(buf.len() as u64);
        if wanted == 0 {
            return Ok(0);
        }

        match self.reader.fetch_range(path, offset, wanted).await {
            Ok(data) => {
                let n = data.len().min(wanted as usize);
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Err(e) => {
                error!("read: fetching {} [{}+{}] failed: {}", path, offset, wanted, e);
                Ok(0)
            }
        }
    }

    /// Release a file handle. Nothing is tracked per handle.
    pub fn release(&self, path: &str, fh: u64) -> Result<()> {
        self.ensure_ready()?;
        trace!("release({}, fh={})", path, fh);
        Ok(())
    }

    fn deny(&self, operation: &str, path: &str) -> FsError {
        warn!("{}({}): package is read-only", operation, path);
        FsError::PermissionDenied
    }

    // Write-class handlers never succeed, whatever their arguments.

    pub fn write(&self, path: &str, _offset: u64, _data: &[u8], _fh: u64) -> Result<Infallible> {
        Err(self.deny("write", path))
    }

    pub fn create(&self, path: &str, _mode: u32) -> Result<Infallible> {
        Err(self.deny("create", path))
    }

    pub fn unlink(&self, path: &str) -> Result<Infallible> {
        Err(self.deny("unlink", path))
    }

    pub fn rename(&self, src: &str, dest: &str) -> Result<Infallible> {
        Err(self.deny("rename", &format!("{} -> {}", src, dest)))
    }

    pub fn mkdir(&self, path: &str, _mode: u32) -> Result<Infallible> {
        Err(self.deny("mkdir", path))
    }

    pub fn rmdir(&self, path: &str) -> Result<Infallible> {
        Err(self.deny("rmdir", path))
    }

    /// Extended attributes cannot be stored in a package.
    pub fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> Result<()> {
        self.ensure_ready()?;
        debug!(
            "setxattr({}, {}, {} bytes, flags={}): not supported",
            path,
            name,
            value.len(),
            flags
        );
        Err(FsError::NotSupported)
    }

    /// Capacity statistics. The figures are fixed, not derived from the package.
    pub fn statfs(&self) -> Result<FsStats> {
        self.ensure_ready()?;
        Ok(FsStats::synthetic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryArchive;
    use jpak_format::JpakBuilder;

    async fn ready_fs() -> PackFs<MemoryArchive> {
        let data = JpakBuilder::new()
            .with_file("/data/a.bin", b"0123456789".to_vec())
            .with_directory("/data/sub")
            .with_file("/data/b.txt", b"b".to_vec())
            .with_directory("/empty")
            .build()
            .unwrap();
        let fs = PackFs::new(MemoryArchive::new(data));
        fs.init().await.unwrap();
        fs
    }

    #[tokio::test]
    async fn test_resolve_prefers_directory() {
        let fs = ready_fs().await;
        assert!(matches!(fs.resolve("/data"), ResolvedTarget::Directory(_)));
        assert!(matches!(fs.resolve("/data/a.bin"), ResolvedTarget::File(_)));
        assert_eq!(fs.resolve("/data/a"), ResolvedTarget::NotFound);
        assert_eq!(fs.resolve("/dat"), ResolvedTarget::NotFound);
    }

    #[test]
    fn test_attributes_of() {
        let dir = DirectoryEntry::new("d");
        let attr = attributes_of(ResolvedTarget::Directory(&dir)).unwrap();
        assert_eq!(attr.size, DIRECTORY_SIZE);
        assert_eq!(attr.mode, 0o040555);
        assert_eq!(attr.perm(), 0o555);
        assert!(attr.is_dir());

        let file = FileEntry {
            name: "f".into(),
            size: 42,
            offset: 5,
            compressed: false,
        };
        let attr = attributes_of(ResolvedTarget::File(&file)).unwrap();
        assert_eq!(attr.size, 42);
        assert_eq!(attr.mode, 0o100444);
        assert_eq!(attr.perm(), 0o444);

        assert!(matches!(
            attributes_of(ResolvedTarget::NotFound),
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_readdir() {
        let fs = ready_fs().await;
        assert_eq!(fs.readdir("/").unwrap(), vec!["data", "empty"]);
        assert_eq!(fs.readdir("/data").unwrap(), vec!["sub", "a.bin", "b.txt"]);
        assert!(fs.readdir("/empty").unwrap().is_empty());
        assert!(matches!(fs.readdir("/data/a.bin"), Err(FsError::InvalidOperation)));
        assert!(matches!(fs.readdir("/nope"), Err(FsError::NotFound)));
    }

    #[tokio::test]
    async fn test_open_flags() {
        let fs = ready_fs().await;
        assert_eq!(fs.open("/data/a.bin", libc::O_RDONLY).unwrap(), FILE_HANDLE);
        assert!(matches!(fs.open("/data", libc::O_RDONLY), Err(FsError::NotFound)));
        assert!(matches!(fs.open("/x", libc::O_RDONLY), Err(FsError::NotFound)));
        assert!(matches!(
            fs.open("/data/a.bin", libc::O_WRONLY),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.open("/data/a.bin", libc::O_RDONLY | libc::O_TRUNC),
            Err(FsError::PermissionDenied)
        ));
        // missing beats write flags
        assert!(matches!(fs.open("/x", libc::O_RDWR), Err(FsError::NotFound)));
    }

    #[tokio::test]
    async fn test_read_clips_to_size() {
        let fs = ready_fs().await;
        let mut buf = [0u8; 100];
        assert_eq!(fs.read("/data/a.bin", 5, &mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"56789");

        let mut buf = [0u8; 3];
        assert_eq!(fs.read("/data/a.bin", 1, &mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"123");

        assert_eq!(fs.read("/data/a.bin", 10, &mut buf).await.unwrap(), 0);
        assert_eq!(fs.read("/data/a.bin", 11, &mut buf).await.unwrap(), 0);
        assert_eq!(fs.read("/data/a.bin", 0, &mut []).await.unwrap(), 0);
        assert!(matches!(
            fs.read("/data", 0, &mut buf).await,
            Err(FsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_mutations_denied_before_and_after_load() {
        let fs = PackFs::new(MemoryArchive::new(Vec::new()));
        assert!(matches!(fs.unlink("/a"), Err(FsError::PermissionDenied)));

        let fs = ready_fs().await;
        assert!(matches!(fs.write("/data/a.bin", 0, b"x", 0), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.create("/new", 0o644), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.unlink("/data/a.bin"), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.rename("/data", "/moved"), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.mkdir("/data/new", 0o755), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.rmdir("/empty"), Err(FsError::PermissionDenied)));
        assert_eq!(fs.readdir("/").unwrap(), vec!["data", "empty"]);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let fs = PackFs::new(MemoryArchive::new(JpakBuilder::new().build().unwrap()));
        assert_eq!(fs.phase(), Phase::Unmounted);
        assert!(matches!(fs.getattr("/"), Err(FsError::NotReady)));
        assert!(matches!(fs.statfs(), Err(FsError::NotReady)));

        fs.init().await.unwrap();
        assert_eq!(fs.phase(), Phase::Ready);
        assert!(fs.getattr("/").unwrap().is_dir());
        assert!(matches!(fs.init().await, Err(FsError::InvalidOperation)));

        fs.destroy();
        assert_eq!(fs.phase(), Phase::Unmounted);
        assert!(matches!(fs.getattr("/"), Err(FsError::NotReady)));
    }

    #[tokio::test]
    async fn test_failed_load_returns_to_unmounted() {
        let fs = PackFs::new(MemoryArchive::new(b"garbage!!".to_vec()));
        assert!(matches!(fs.init().await, Err(FsError::Load(_))));
        assert_eq!(fs.phase(), Phase::Unmounted);
        assert!(matches!(fs.readdir("/"), Err(FsError::NotReady)));
    }

    #[tokio::test]
    async fn test_statfs_and_setxattr() {
        let fs = ready_fs().await;
        let stats = fs.statfs().unwrap();
        assert_eq!(stats, FsStats::synthetic());
        assert_eq!(stats.blocks, 1_000_000);
        assert_eq!(stats.name_max, 255);

        assert!(matches!(
            fs.setxattr("/data/a.bin", "user.tag", b"v", 0),
            Err(FsError::NotSupported)
        ));
        assert!(fs.release("/data/a.bin", FILE_HANDLE).is_ok());
    }
}
