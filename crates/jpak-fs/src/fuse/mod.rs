//! FUSE mount support for JPAK packages.
//!
//! This module bridges the kernel's inode-based FUSE protocol to the
//! path-based [`PackFs`](crate::PackFs) adapter, allowing packages to be
//! mounted as read-only filesystems.
//!
//! # Features
//!
//! - **Load before serve**: the package is parsed during FUSE `init`, and a
//!   package that fails to load refuses the mount
//! - **Concurrent reads**: reads run on a tokio runtime and reply when their
//!   fetch completes, so a slow read never holds up metadata requests
//! - **Minimal Memory**: only the file table is kept in memory
//!
//! # Example
//!
//! ```ignore
//! use jpak_fs::fuse::mount;
//! use jpak_fs::MountConfig;
//!
//! mount("assets.jpak", "/mnt/assets", &MountConfig::default())?;
//! ```

mod adapter;

pub use adapter::*;
