//! The entry index: the directory tree stored in a package's file table.
//!
//! Directories and files are kept in the order they appear in the file
//! table, so listings are reproducible across mounts.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// A folder-like node in the entry index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Name of this directory within its parent.
    #[serde(default)]
    pub name: String,
    /// Child directories, in table order.
    #[serde(
        default,
        deserialize_with = "keyed_entries",
        serialize_with = "serialize_keyed"
    )]
    pub directories: Vec<DirectoryEntry>,
    /// Child files, in table order.
    #[serde(
        default,
        deserialize_with = "keyed_entries",
        serialize_with = "serialize_keyed"
    )]
    pub files: Vec<FileEntry>,
}

/// A leaf node in the entry index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Name of this file within its parent directory.
    #[serde(default)]
    pub name: String,
    /// Size of the content in bytes.
    pub size: u64,
    /// Absolute byte offset of the content within the package.
    pub offset: u64,
    /// Whether the content is zlib-compressed. Packages carrying such
    /// entries are rejected when the table is parsed.
    #[serde(rename = "zlib", default, skip_serializing_if = "is_false")]
    pub compressed: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DirectoryEntry {
    /// Create an empty directory entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Find an immediate child directory by name.
    pub fn directory(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directories.iter().find(|d| d.name == name)
    }

    /// Find an immediate child file by name.
    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Resolve `path` (relative to this directory) to a directory entry.
    ///
    /// The empty path and `"/"` resolve to `self`.
    pub fn find_directory(&self, path: &str) -> Option<&DirectoryEntry> {
        segments(path).try_fold(self, |dir, segment| dir.directory(segment))
    }

    /// Resolve `path` (relative to this directory) to a file entry.
    pub fn find_file(&self, path: &str) -> Option<&FileEntry> {
        let (parent, name) = split_parent(path)?;
        self.find_directory(parent)?.file(name)
    }

    /// Names of the immediate children: directories first, then files.
    pub fn child_names(&self) -> Vec<String> {
        self.directories
            .iter()
            .map(|d| d.name.clone())
            .chain(self.files.iter().map(|f| f.name.clone()))
            .collect()
    }

    /// Total number of entries below this directory (not counting itself).
    pub fn entry_count(&self) -> usize {
        self.files.len()
            + self
                .directories
                .iter()
                .map(|d| 1 + d.entry_count())
                .sum::<usize>()
    }

    /// Total size in bytes of all files below this directory.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum::<u64>()
            + self.directories.iter().map(|d| d.total_size()).sum::<u64>()
    }

    /// Visit every file below this directory together with its full path.
    pub fn walk_files<F>(&self, prefix: &str, visit: &mut F)
    where
        F: FnMut(&str, &FileEntry),
    {
        for file in &self.files {
            visit(&join(prefix, &file.name), file);
        }
        for dir in &self.directories {
            dir.walk_files(&join(prefix, &dir.name), visit);
        }
    }

    /// Path of the first name used by both a directory and a file in the
    /// same directory, searching depth-first below `prefix`.
    pub fn find_name_collision(&self, prefix: &str) -> Option<String> {
        if let Some(file) = self.files.iter().find(|f| self.directory(&f.name).is_some()) {
            return Some(join(prefix, &file.name));
        }
        self.directories
            .iter()
            .find_map(|dir| dir.find_name_collision(&join(prefix, &dir.name)))
    }
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split a path into its parent path and final segment.
///
/// Returns `None` for paths with no segments (the root).
fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

fn join(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

trait Keyed {
    fn key(&self) -> &str;
    fn set_key(&mut self, key: String);
}

impl Keyed for DirectoryEntry {
    fn key(&self) -> &str {
        &self.name
    }

    fn set_key(&mut self, key: String) {
        self.name = key;
    }
}

impl Keyed for FileEntry {
    fn key(&self) -> &str {
        &self.name
    }

    fn set_key(&mut self, key: String) {
        self.name = key;
    }
}

/// Deserialize a JSON object of `name -> entry` into a vector in key order.
///
/// An entry without a `name` field takes its key. A repeated name replaces
/// the earlier entry in place.
fn keyed_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Keyed,
{
    struct KeyedVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for KeyedVisitor<T>
    where
        T: Deserialize<'de> + Keyed,
    {
        type Value = Vec<T>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of entries keyed by name")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Vec<T>, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries: Vec<T> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, mut entry)) = map.next_entry::<String, T>()? {
                if entry.key().is_empty() {
                    entry.set_key(key);
                }
                match entries.iter_mut().find(|e| e.key() == entry.key()) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(KeyedVisitor(PhantomData))
}

fn serialize_keyed<S, T>(entries: &[T], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize + Keyed,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for entry in entries {
        map.serialize_entry(entry.key(), entry)?;
    }
    map.end()
}
