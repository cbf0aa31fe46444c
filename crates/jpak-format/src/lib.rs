//! # jpak-format
//!
//! Core library for JPAK package parsing and creation.
//!
//! This crate provides:
//! - JPAK v1 package reading (`JpakArchive`)
//! - The entry index with path lookups (`DirectoryEntry`, `FileEntry`)
//! - A package builder for creating new `.jpak` files
//!
//! ## Layout
//!
//! ```text
//! +-------+------------------+-------------------+-----------------+
//! | JPAK1 | file contents... | file table (JSON) | table offset u32|
//! +-------+------------------+-------------------+-----------------+
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use jpak_format::{JpakArchive, JpakBuilder};
//!
//! JpakBuilder::new()
//!     .with_file("/data/a.bin", b"0123456789".to_vec())
//!     .write_to("example.jpak")?;
//!
//! let archive = JpakArchive::open("example.jpak")?;
//! let tail = archive.read_range("/data/a.bin", 5, 100)?;
//! assert_eq!(tail, b"56789");
//! ```

mod builder;
mod error;
mod format;
mod index;

pub use builder::JpakBuilder;
pub use error::{Error, Result};
pub use format::{parse_index, JpakArchive, MAGIC};
pub use index::{segments, DirectoryEntry, FileEntry};
