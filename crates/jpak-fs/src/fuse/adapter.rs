//! FUSE bridge for [`PackFs`].
//!
//! fuser speaks inodes while the adapter speaks paths, so this module keeps
//! an inode table that is filled in as the kernel looks names up.

use crate::config::MountConfig;
use crate::reader::{ArchiveReader, LocalArchive};
use crate::vfs::{FileKind, Metadata, PackFs};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    FUSE_ROOT_ID,
};
use libc::{c_int, EINVAL, ENOENT, ENOTDIR};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::{Builder, Runtime};

/// Block size reported in file attributes.
const BLOCK_SIZE: u32 = 512;

/// Bidirectional inode <-> path table. The root is always inode 1.
#[derive(Debug)]
struct InodeTable {
    paths: HashMap<u64, String>,
    inodes: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            next: FUSE_ROOT_ID + 1,
        };
        table.paths.insert(FUSE_ROOT_ID, "/".to_string());
        table.inodes.insert("/".to_string(), FUSE_ROOT_ID);
        table
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Inode for `path`, assigning the next free one on first sight.
    fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inodes.insert(path.to_string(), ino);
        debug!("Mapped '{}' to inode {}", path, ino);
        ino
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

fn child_path(parent: &str, name: &OsStr) -> String {
    let name = name.to_string_lossy();
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Index of the first listing entry to return for a readdir `offset`.
fn first_entry(offset: i64) -> usize {
    usize::try_from(offset).unwrap_or(0)
}

fn parent_path(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent,
        _ => "/",
    }
}

/// FUSE filesystem serving one package through a [`PackFs`].
pub struct JpakFuseFS<R: ArchiveReader + 'static> {
    fs: Arc<PackFs<R>>,
    inodes: InodeTable,
    /// Runtime that drives archive loading and reads.
    runtime: Runtime,
    ttl: Duration,
    uid: u32,
    gid: u32,
    mount_time: SystemTime,
}

impl<R: ArchiveReader + 'static> JpakFuseFS<R> {
    /// Create a FUSE filesystem around `fs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read runtime cannot be started.
    pub fn new(fs: PackFs<R>, config: &MountConfig) -> io::Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("jpak-read");
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build()?;

        // Get current user/group IDs
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        Ok(Self {
            fs: Arc::new(fs),
            inodes: InodeTable::new(),
            runtime,
            ttl: config.attr_ttl(),
            uid,
            gid,
            mount_time: SystemTime::now(),
        })
    }

    /// The adapter behind this bridge.
    pub fn pack_fs(&self) -> &PackFs<R> {
        &self.fs
    }

    fn file_attr(&self, ino: u64, meta: &Metadata) -> FileAttr {
        let (kind, nlink) = match meta.kind {
            FileKind::Directory => (FileType::Directory, 2),
            FileKind::RegularFile => (FileType::RegularFile, 1),
        };
        FileAttr {
            ino,
            size: meta.size,
            blocks: meta.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.mount_time,
            mtime: self.mount_time,
            ctime: self.mount_time,
            crtime: self.mount_time,
            kind,
            perm: meta.perm(),
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Path of `name` under inode `parent`, or an unresolvable placeholder.
    fn child_path_lossy(&self, parent: u64, name: &OsStr) -> String {
        match self.inodes.path(parent) {
            Some(parent) => child_path(parent, name),
            None => format!("<inode {}>/{}", parent, name.to_string_lossy()),
        }
    }

    /// Resolve `name` under inode `parent`, assigning the child an inode.
    fn lookup_child(&mut self, parent: u64, name: &OsStr) -> Result<(u64, Metadata), c_int> {
        let parent_path = self.inodes.path(parent).ok_or(ENOENT)?;
        if !self.fs.getattr(parent_path).map_err(|e| e.errno())?.is_dir() {
            return Err(ENOTDIR);
        }

        let path = child_path(parent_path, name);
        let meta = self.fs.getattr(&path).map_err(|e| e.errno())?;
        Ok((self.inodes.assign(&path), meta))
    }

    /// Full listing of inode `ino`: ".", "..", then the children in index order.
    fn directory_entries(&mut self, ino: u64) -> Result<Vec<(u64, FileType, String)>, c_int> {
        let path = self.inodes.path(ino).ok_or(ENOENT)?.to_string();
        let names = self.fs.readdir(&path).map_err(|e| e.errno())?;

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (
                self.inodes.assign(parent_path(&path)),
                FileType::Directory,
                "..".to_string(),
            ),
        ];
        for name in names {
            let child = child_path(&path, OsStr::new(&name));
            let kind = match self.fs.getattr(&child) {
                Ok(meta) if meta.is_dir() => FileType::Directory,
                _ => FileType::RegularFile,
            };
            entries.push((self.inodes.assign(&child), kind, name));
        }
        Ok(entries)
    }
}

impl<R: ArchiveReader + 'static> Filesystem for JpakFuseFS<R> {
    /// Load the archive. The mount only completes once this returns.
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("Loading archive before serving requests");
        let fs = Arc::clone(&self.fs);
        self.runtime.block_on(fs.init()).map_err(|e| {
            error!("init: {}", e);
            e.errno()
        })
    }

    fn destroy(&mut self) {
        debug!("destroy ({} inodes mapped)", self.inodes.len());
        self.fs.destroy();
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!("lookup(parent={}, name={:?})", parent, name);

        match self.lookup_child(parent, name) {
            Ok((ino, meta)) => reply.entry(&self.ttl, &self.file_attr(ino, &meta), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={})", ino);

        let Some(path) = self.inodes.path(ino) else {
            warn!("getattr: inode {} not found", ino);
            reply.error(ENOENT);
            return;
        };

        match self.fs.getattr(path) {
            Ok(meta) => reply.attr(&self.ttl, &self.file_attr(ino, &meta)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={}, offset={})", ino, offset);

        let entries = match self.directory_entries(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(first_entry(offset)) {
            // next_offset = i + 1
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(ENOENT);
            return;
        };

        match self.fs.open(path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    /// Read file data on the runtime; the reply is sent when the fetch completes.
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(async move {
            let mut buffer = vec![0u8; size as usize];
            match fs.read(&path, offset as u64, &mut buffer).await {
                Ok(n) => reply.data(&buffer[..n]),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = self.inodes.path(ino).unwrap_or("<unknown>");
        match self.fs.write(path, offset.max(0) as u64, data, fh) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.inodes.path(ino).unwrap_or("<unknown>");
        match self.fs.release(path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = self.child_path_lossy(parent, name);
        match self.fs.create(&path, mode) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = self.child_path_lossy(parent, name);
        match self.fs.unlink(&path) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let src = self.child_path_lossy(parent, name);
        let dest = self.child_path_lossy(newparent, newname);
        match self.fs.rename(&src, &dest) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = self.child_path_lossy(parent, name);
        match self.fs.mkdir(&path, mode) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = self.child_path_lossy(parent, name);
        match self.fs.rmdir(&path) {
            Ok(never) => match never {},
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = self.inodes.path(ino).unwrap_or("<unknown>");
        match self
            .fs
            .setxattr(path, &name.to_string_lossy(), value, flags)
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        trace!("statfs");

        match self.fs.statfs() {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                stats.files,
                stats.files_free,
                stats.block_size,
                stats.name_max,
                stats.fragment_size,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }
}

/// Mount a JPAK package as a FUSE filesystem.
///
/// This function blocks until the filesystem is unmounted.
///
/// # Errors
///
/// Returns an error if:
/// - The read runtime cannot be started
/// - The package cannot be loaded (the mount is refused)
/// - FUSE mounting fails
///
/// # Example
///
/// ```ignore
/// use jpak_fs::fuse::mount;
/// use jpak_fs::MountConfig;
///
/// mount("assets.jpak", "/mnt/assets", &MountConfig::default())?;
/// ```
pub fn mount<P: AsRef<Path>, Q: AsRef<Path>>(
    archive_path: P,
    mount_point: Q,
    config: &MountConfig,
) -> io::Result<()> {
    let fs = PackFs::new(LocalArchive::new(archive_path.as_ref()));
    let fuse_fs = JpakFuseFS::new(fs, config)?;
    let mount_point = mount_point.as_ref();

    debug!(
        "Mounting {} at {}",
        archive_path.as_ref().display(),
        mount_point.display()
    );

    fuser::mount2(fuse_fs, mount_point, &config.mount_options())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("FUSE mount failed: {}", e)))
}

/// Mount a JPAK package in the background and return a session handle.
///
/// The filesystem will remain mounted until the returned `BackgroundSession`
/// is dropped or `join()` is called on it.
pub fn mount_background<P: AsRef<Path>, Q: AsRef<Path>>(
    archive_path: P,
    mount_point: Q,
    config: &MountConfig,
) -> io::Result<fuser::BackgroundSession> {
    let fs = PackFs::new(LocalArchive::new(archive_path.as_ref()));
    let fuse_fs = JpakFuseFS::new(fs, config)?;
    let mount_point = mount_point.as_ref();

    debug!(
        "Mounting {} at {} (background)",
        archive_path.as_ref().display(),
        mount_point.display()
    );

    fuser::spawn_mount2(fuse_fs, mount_point, &config.mount_options())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("FUSE mount failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryArchive;
    use jpak_format::JpakBuilder;

    #[test]
    fn test_inode_table_assigns_stable_inodes() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(FUSE_ROOT_ID), Some("/"));

        let a = table.assign("/data");
        let b = table.assign("/data/a.bin");
        assert_eq!(a, FUSE_ROOT_ID + 1);
        assert_eq!(b, FUSE_ROOT_ID + 2);
        assert_eq!(table.assign("/data"), a);
        assert_eq!(table.path(b), Some("/data/a.bin"));
        assert_eq!(table.assign("/"), FUSE_ROOT_ID);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/", OsStr::new("data")), "/data");
        assert_eq!(child_path("/data", OsStr::new("a.bin")), "/data/a.bin");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/"), "/");
        assert_eq!(parent_path("/data"), "/");
        assert_eq!(parent_path("/data/sub"), "/data");
        assert_eq!(parent_path("/data/sub/"), "/data");
    }

    #[test]
    fn test_first_entry() {
        assert_eq!(first_entry(0), 0);
        assert_eq!(first_entry(3), 3);
        assert_eq!(first_entry(-1), 0);
        assert_eq!(first_entry(i64::MIN), 0);
    }

    fn loaded_bridge() -> JpakFuseFS<MemoryArchive> {
        let data = JpakBuilder::new()
            .with_file("/data/a.bin", b"0123456789".to_vec())
            .with_directory("/data/sub")
            .build()
            .unwrap();
        let fuse_fs =
            JpakFuseFS::new(PackFs::new(MemoryArchive::new(data)), &MountConfig::default())
                .unwrap();
        fuse_fs.runtime.block_on(fuse_fs.pack_fs().init()).unwrap();
        fuse_fs
    }

    #[test]
    fn test_lookup_child() {
        let mut fuse_fs = loaded_bridge();

        let (data, meta) = fuse_fs.lookup_child(FUSE_ROOT_ID, OsStr::new("data")).unwrap();
        assert!(meta.is_dir());
        let (file, meta) = fuse_fs.lookup_child(data, OsStr::new("a.bin")).unwrap();
        assert_eq!(meta.size, 10);
        assert_eq!(fuse_fs.lookup_child(data, OsStr::new("a.bin")).unwrap().0, file);

        let err = fuse_fs.lookup_child(file, OsStr::new("child")).unwrap_err();
        assert_eq!(err, ENOTDIR);
        let err = fuse_fs.lookup_child(data, OsStr::new("missing")).unwrap_err();
        assert_eq!(err, ENOENT);
        let err = fuse_fs.lookup_child(999, OsStr::new("a.bin")).unwrap_err();
        assert_eq!(err, ENOENT);
    }

    #[test]
    fn test_lookup_child_before_init() {
        let data = JpakBuilder::new().with_directory("/data").build().unwrap();
        let mut fuse_fs =
            JpakFuseFS::new(PackFs::new(MemoryArchive::new(data)), &MountConfig::default())
                .unwrap();
        let err = fuse_fs.lookup_child(FUSE_ROOT_ID, OsStr::new("data")).unwrap_err();
        assert_eq!(err, libc::EAGAIN);
    }

    #[test]
    fn test_directory_entries_link_to_parent() {
        let mut fuse_fs = loaded_bridge();

        let root = fuse_fs.directory_entries(FUSE_ROOT_ID).unwrap();
        assert_eq!(root[0], (FUSE_ROOT_ID, FileType::Directory, ".".to_string()));
        assert_eq!(root[1], (FUSE_ROOT_ID, FileType::Directory, "..".to_string()));
        let data = root[2].0;
        assert_eq!(root[2], (data, FileType::Directory, "data".to_string()));

        let listing = fuse_fs.directory_entries(data).unwrap();
        let names: Vec<_> = listing.iter().map(|(_, _, name)| name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "sub", "a.bin"]);
        assert_eq!(listing[0].0, data);
        assert_eq!(listing[1].0, FUSE_ROOT_ID);
        assert_eq!(listing[2].1, FileType::Directory);
        assert_eq!(listing[3].1, FileType::RegularFile);

        let sub = fuse_fs.directory_entries(listing[2].0).unwrap();
        assert_eq!(sub[1].0, data);
        assert_eq!(sub.len(), 2);

        let file = listing[3].0;
        assert_eq!(fuse_fs.directory_entries(file).unwrap_err(), libc::EINVAL);
    }

    #[test]
    fn test_file_attr_uses_adapter_metadata() {
        let data = JpakBuilder::new()
            .with_file("/data/a.bin", b"0123456789".to_vec())
            .build()
            .unwrap();
        let fuse_fs =
            JpakFuseFS::new(PackFs::new(MemoryArchive::new(data)), &MountConfig::default())
                .unwrap();
        fuse_fs.runtime.block_on(fuse_fs.pack_fs().init()).unwrap();

        let dir = fuse_fs.pack_fs().getattr("/data").unwrap();
        let attr = fuse_fs.file_attr(7, &dir);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.size, 4096);
        assert_eq!(attr.perm, 0o555);
        assert_eq!(attr.nlink, 2);

        let file = fuse_fs.pack_fs().getattr("/data/a.bin").unwrap();
        let attr = fuse_fs.file_attr(8, &file);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 10);
        assert_eq!(attr.perm, 0o444);
        assert_eq!(attr.blocks, 1);
    }

    // Mounting needs /dev/fuse and fusermount, so this is run by hand:
    // cargo test -p jpak-fs --features fuse test_fuse_mount -- --ignored
    #[test]
    #[ignore = "requires a FUSE device and manual testing"]
    fn test_fuse_mount() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("mount.jpak");
        let mount_point = dir.path().join("mnt");
        std::fs::create_dir(&mount_point).unwrap();
        JpakBuilder::new()
            .with_file("/data/a.bin", b"0123456789".to_vec())
            .write_to(&archive)
            .unwrap();

        let session = mount_background(&archive, &mount_point, &MountConfig::default()).unwrap();
        let content = std::fs::read(mount_point.join("data/a.bin")).unwrap();
        assert_eq!(content, b"0123456789");
        assert!(std::fs::write(mount_point.join("data/new.txt"), b"x").is_err());
        drop(session);
    }
}
