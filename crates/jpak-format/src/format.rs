use crate::error::{Error, Result};
use crate::index::{DirectoryEntry, FileEntry};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every JPAK v1 package.
pub const MAGIC: &[u8; 5] = b"JPAK1";

/// Size of the trailing file-table offset.
pub const TRAILER_LEN: u64 = 4;

/// A parsed JPAK package.
///
/// Only the file table is held in memory; content is read on demand with
/// positional reads against the package file.
#[derive(Debug)]
pub struct JpakArchive {
    path: PathBuf,
    file: File,
    table_offset: u64,
    root: DirectoryEntry,
}

impl JpakArchive {
    /// Open a JPAK package from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        if len < MAGIC.len() as u64 + TRAILER_LEN {
            return Err(Error::InvalidFormat(format!(
                "package is too short ({} bytes)",
                len
            )));
        }

        let mut magic = [0u8; 5];
        file.read_exact_at(&mut magic, 0)?;
        check_magic(&magic)?;

        let mut trailer = [0u8; 4];
        file.read_exact_at(&mut trailer, len - TRAILER_LEN)?;
        let table_offset = table_offset_in(u32::from_le_bytes(trailer), len)?;

        let mut table = vec![0u8; (len - TRAILER_LEN - table_offset) as usize];
        file.read_exact_at(&mut table, table_offset)?;
        let root = parse_table(&table, table_offset)?;

        log::debug!(
            "Opened {} ({} entries, table at {})",
            path.display(),
            root.entry_count(),
            table_offset
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            table_offset,
            root,
        })
    }

    /// Get the root of the entry index.
    pub fn root(&self) -> &DirectoryEntry {
        &self.root
    }

    /// Get the path to the package file.
    pub fn archive_path(&self) -> &Path {
        &self.path
    }

    /// Get the byte offset of the file table.
    pub fn table_offset(&self) -> u64 {
        self.table_offset
    }

    /// Find a directory entry by path. `"/"` is the root.
    pub fn find_directory_entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.root.find_directory(path)
    }

    /// Find a file entry by path.
    pub fn find_file_entry(&self, path: &str) -> Option<&FileEntry> {
        self.root.find_file(path)
    }

    /// Number of directories and files in the package (excluding the root).
    pub fn entry_count(&self) -> usize {
        self.root.entry_count()
    }

    /// Sum of all file sizes in the package.
    pub fn total_size(&self) -> u64 {
        self.root.total_size()
    }

    /// Read up to `len` bytes of a file's content starting at `offset`.
    ///
    /// The range is clipped to the file; reading at or past the end yields
    /// an empty vector.
    pub fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let entry = self
            .find_file_entry(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let remaining = entry.size.saturating_sub(offset);
        let to_read = remaining.min(len);
        if to_read == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; to_read as usize];
        self.file.read_exact_at(&mut buffer, entry.offset + offset)?;
        Ok(buffer)
    }

    /// Read a file's whole content.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.read_range(path, 0, u64::MAX)
    }
}

/// Parse the entry index from a complete in-memory package.
pub fn parse_index(data: &[u8]) -> Result<DirectoryEntry> {
    let len = data.len() as u64;
    if len < MAGIC.len() as u64 + TRAILER_LEN {
        return Err(Error::InvalidFormat(format!(
            "package is too short ({} bytes)",
            len
        )));
    }

    check_magic(&data[..MAGIC.len()])?;

    let trailer_start = (len - TRAILER_LEN) as usize;
    let mut trailer = [0u8; 4];
    trailer.copy_from_slice(&data[trailer_start..]);
    let table_offset = table_offset_in(u32::from_le_bytes(trailer), len)?;

    parse_table(&data[table_offset as usize..trailer_start], table_offset)
}

fn check_magic(magic: &[u8]) -> Result<()> {
    if magic != MAGIC {
        return Err(Error::InvalidFormat(format!(
            "bad magic {:?}, expected JPAK1",
            String::from_utf8_lossy(magic)
        )));
    }
    Ok(())
}

fn table_offset_in(raw: u32, len: u64) -> Result<u64> {
    let offset = raw as u64;
    if offset < MAGIC.len() as u64 || offset > len - TRAILER_LEN {
        return Err(Error::InvalidFormat(format!(
            "file table offset {} outside package of {} bytes",
            offset, len
        )));
    }
    Ok(offset)
}

/// Parse the file table and check it describes servable content.
///
/// Every file must lie in the content region and be stored uncompressed, and
/// no directory may hold a directory and a file under the same name.
fn parse_table(table: &[u8], table_offset: u64) -> Result<DirectoryEntry> {
    let root: DirectoryEntry = serde_json::from_slice(table)?;

    if let Some(path) = root.find_name_collision("/") {
        return Err(Error::InvalidFormat(format!(
            "{} names both a directory and a file",
            path
        )));
    }

    let mut bad = None;
    root.walk_files("/", &mut |path, file| {
        if bad.is_some() {
            return;
        }
        let end = file.offset.checked_add(file.size);
        let in_bounds = file.offset >= MAGIC.len() as u64 && end.is_some_and(|e| e <= table_offset);
        if file.compressed {
            bad = Some(format!("{} is zlib-compressed", path));
        } else if !in_bounds {
            bad = Some(format!(
                "{} spans {}+{} beyond content region ending at {}",
                path, file.offset, file.size, table_offset
            ));
        }
    });

    match bad {
        Some(message) => Err(Error::InvalidFormat(message)),
        None => Ok(root),
    }
}
