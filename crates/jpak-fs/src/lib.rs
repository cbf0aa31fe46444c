//! # jpak-fs
//!
//! Read-only filesystem adapter for JPAK packages.
//!
//! This crate provides:
//! - The path-based adapter ([`PackFs`]): path resolution, attributes,
//!   directory listing, clipped reads, and blanket rejection of writes
//! - Archive readers ([`LocalArchive`], [`MemoryArchive`]) behind the
//!   [`ArchiveReader`] trait
//! - Mount configuration ([`MountConfig`])
//! - FUSE mounting (with the `fuse` feature)
//!
//! ## Example
//!
//! ```ignore
//! use jpak_fs::{LocalArchive, PackFs};
//!
//! let fs = PackFs::new(LocalArchive::new("assets.jpak"));
//! fs.init().await?;
//!
//! assert_eq!(fs.readdir("/data")?, vec!["a.bin"]);
//! let mut buf = [0u8; 100];
//! let n = fs.read("/data/a.bin", 5, &mut buf).await?;
//! ```
//!
//! ## FUSE Support
//!
//! Enable the `fuse` feature to mount a package on Linux or macOS:
//!
//! ```ignore
//! use jpak_fs::fuse::mount;
//! use jpak_fs::MountConfig;
//!
//! mount("assets.jpak", "/mnt/assets", &MountConfig::default())?;
//! ```

mod config;
mod error;
mod reader;
mod vfs;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use config::MountConfig;
pub use error::{ConfigError, FsError, Result};
pub use reader::{ArchiveReader, LocalArchive, MemoryArchive, ReaderFuture};
pub use vfs::{
    attributes_of, FileKind, FsStats, Metadata, PackFs, Phase, ResolvedTarget, DIRECTORY_MODE,
    DIRECTORY_SIZE, FILE_HANDLE, FILE_MODE,
};

// Re-export jpak-format types for convenience
pub use jpak_format::{DirectoryEntry, FileEntry, JpakArchive};
