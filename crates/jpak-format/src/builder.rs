use crate::format::MAGIC;
use crate::index::{segments, DirectoryEntry, FileEntry};
use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Name given to the root directory of built packages.
const ROOT_NAME: &str = "root";

#[derive(Debug, Clone)]
enum PendingEntry {
    Directory(String),
    File(String, Vec<u8>),
}

/// Builder for creating JPAK packages.
///
/// Entries appear in the file table in the order they were added; parent
/// directories are created on first use.
#[derive(Debug, Default, Clone)]
pub struct JpakBuilder {
    entries: Vec<PendingEntry>,
}

#[derive(Debug, Default)]
struct BuildDir {
    name: String,
    directories: Vec<BuildDir>,
    files: Vec<(String, Vec<u8>)>,
}

impl BuildDir {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn has_file(&self, name: &str) -> bool {
        self.files.iter().any(|(n, _)| n == name)
    }

    fn directory_mut(&mut self, name: &str) -> Result<&mut BuildDir> {
        if self.has_file(name) {
            return Err(Error::BuilderError(format!(
                "'{}' is already a file",
                name
            )));
        }
        let index = match self.directories.iter().position(|d| d.name == name) {
            Some(index) => index,
            None => {
                self.directories.push(BuildDir::named(name));
                self.directories.len() - 1
            }
        };
        Ok(&mut self.directories[index])
    }

    fn descend(&mut self, names: &[&str]) -> Result<&mut BuildDir> {
        names
            .iter()
            .try_fold(self, |dir, name| dir.directory_mut(name))
    }

    /// Append contents to `out`, returning the index entry for this subtree.
    fn layout(self, out: &mut Vec<u8>) -> DirectoryEntry {
        let mut entry = DirectoryEntry::new(self.name);
        for dir in self.directories {
            entry.directories.push(dir.layout(out));
        }
        for (name, data) in self.files {
            entry.files.push(FileEntry {
                name,
                size: data.len() as u64,
                offset: out.len() as u64,
                compressed: false,
            });
            out.extend_from_slice(&data);
        }
        entry
    }
}

impl JpakBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at `path` with the given content.
    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries
            .push(PendingEntry::File(path.to_string(), data.into()));
        self
    }

    /// Add a (possibly empty) directory at `path`.
    pub fn with_directory(mut self, path: &str) -> Self {
        self.entries.push(PendingEntry::Directory(path.to_string()));
        self
    }

    /// Add every file and directory below `dir` on disk.
    ///
    /// Entries are added in name order so packages are reproducible.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut builder = Self::new();
        builder.add_dir_tree(dir.as_ref(), "")?;
        Ok(builder)
    }

    fn add_dir_tree(&mut self, dir: &Path, prefix: &str) -> Result<()> {
        let mut children = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
        children.sort_by_key(|c| c.file_name());

        for child in children {
            let name = child.file_name().to_string_lossy().to_string();
            let path = format!("{}/{}", prefix, name);
            let file_type = child.file_type()?;
            if file_type.is_dir() {
                self.entries.push(PendingEntry::Directory(path.clone()));
                self.add_dir_tree(&child.path(), &path)?;
            } else if file_type.is_file() {
                let data = fs::read(child.path())?;
                self.entries.push(PendingEntry::File(path, data));
            } else {
                log::warn!("Skipping {}: not a regular file or directory", path);
            }
        }
        Ok(())
    }

    /// Build the package bytes.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut root = BuildDir::named(ROOT_NAME);

        for entry in self.entries {
            match entry {
                PendingEntry::Directory(path) => {
                    let names: Vec<&str> = segments(&path).collect();
                    root.descend(&names)?;
                }
                PendingEntry::File(path, data) => {
                    let names: Vec<&str> = segments(&path).collect();
                    let (name, parents) = names
                        .split_last()
                        .ok_or_else(|| Error::BuilderError(format!("empty file path '{}'", path)))?;
                    let parent = root.descend(parents)?;
                    if parent.has_file(name) || parent.directories.iter().any(|d| d.name == *name)
                    {
                        return Err(Error::BuilderError(format!(
                            "duplicate entry '{}'",
                            path
                        )));
                    }
                    parent.files.push((name.to_string(), data));
                }
            }
        }

        let mut out = MAGIC.to_vec();
        let index = root.layout(&mut out);
        let table_offset = u32::try_from(out.len()).map_err(|_| {
            Error::BuilderError(format!("content too large ({} bytes)", out.len()))
        })?;
        serde_json::to_writer(&mut out, &index)?;
        out.extend_from_slice(&table_offset.to_le_bytes());
        Ok(out)
    }

    /// Write the package to the specified path.
    pub fn write_to<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let data = self.build()?;
        fs::write(path, data)?;
        Ok(())
    }
}
