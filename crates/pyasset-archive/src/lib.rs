//! Read-only index over a zip asset bundle.
//!
//! An [`ArchiveIndex`] parses a bundle's central directory exactly once, at open time, into
//! an ordered table keyed by normalized `/`-separated relative path. Lookups never touch the
//! underlying file; only [`ArchiveIndex::read`] does, and it serializes access to the shared
//! zip reader internally.
//!
//! Zip archives are not required to contain explicit directory records, so every ancestor
//! directory of a file entry is synthesized into the table. This keeps package detection
//! (`pkg/` exists) independent of how the bundle was produced.

mod dos_time;
mod entry;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use zip::ZipArchive;

pub use dos_time::dos_to_unix_seconds;
pub use entry::ArchiveEntry;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{entry} not found in {archive}")]
    NotFound { archive: PathBuf, entry: String },

    #[error("failed to read {entry} from {archive}: {source}")]
    Read {
        archive: PathBuf,
        entry: String,
        #[source]
        source: std::io::Error,
    },
}

/// Normalizes an archive-relative path: `\` becomes `/`, and leading/trailing separators
/// are dropped. The empty string names the archive root.
pub fn normalize_entry_path(path: &str) -> String {
    let path = if path.contains('\\') {
        path.replace('\\', "/")
    } else {
        path.to_owned()
    };
    path.trim_matches('/').to_owned()
}

/// Upper bound on the buffer reserved up front for an entry.
///
/// The declared size comes from the central directory and is not trusted; larger entries
/// still read fully, growing the buffer as data arrives.
const MAX_PREALLOC_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug)]
pub struct ArchiveIndex {
    path: PathBuf,
    entries: BTreeMap<String, ArchiveEntry>,
    reader: Mutex<ZipArchive<File>>,
}

impl ArchiveIndex {
    /// Open `path` and index its central directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let file = File::open(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;
        let mut zip = ZipArchive::new(file).map_err(|source| ArchiveError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut entries = BTreeMap::new();
        for i in 0..zip.len() {
            let file = zip.by_index_raw(i).map_err(|source| ArchiveError::Corrupt {
                path: path.clone(),
                source,
            })?;
            if file.enclosed_name().is_none() {
                tracing::warn!(
                    target: "pyasset.archive",
                    archive = %path.display(),
                    entry = file.name(),
                    "skipping archive entry with an unsafe path"
                );
                continue;
            }

            let name = normalize_entry_path(file.name());
            if name.is_empty() {
                continue;
            }
            // Missing or out-of-range timestamps read as the epoch.
            let mtime = file
                .last_modified()
                .and_then(|dt| {
                    dos_to_unix_seconds(
                        dt.year(),
                        dt.month(),
                        dt.day(),
                        dt.hour(),
                        dt.minute(),
                        dt.second(),
                    )
                })
                .unwrap_or(0);

            let entry = ArchiveEntry {
                path: name.clone(),
                is_directory: file.is_dir(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                mtime,
                content_offset: file.data_start(),
                zip_index: Some(i),
            };
            entries.insert(name, entry);
        }

        synthesize_directories(&mut entries);

        tracing::debug!(
            target: "pyasset.archive",
            archive = %path.display(),
            entries = entries.len(),
            "indexed archive"
        );

        Ok(Self {
            path,
            entries,
            reader: Mutex::new(zip),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    /// Look up an entry. Directories are addressed without a trailing `/`.
    pub fn lookup(&self, relative_path: &str) -> Option<&ArchiveEntry> {
        let key = normalize_entry_path(relative_path);
        self.entries.get(&key)
    }

    /// Like [`ArchiveIndex::lookup`], but a miss is an error naming the archive.
    pub fn get(&self, relative_path: &str) -> Result<&ArchiveEntry, ArchiveError> {
        self.lookup(relative_path)
            .ok_or_else(|| ArchiveError::NotFound {
                archive: self.path.clone(),
                entry: normalize_entry_path(relative_path),
            })
    }

    pub fn is_dir(&self, relative_path: &str) -> bool {
        let key = normalize_entry_path(relative_path);
        key.is_empty() || self.entries.get(&key).is_some_and(|e| e.is_directory)
    }

    pub fn is_file(&self, relative_path: &str) -> bool {
        self.lookup(relative_path).is_some_and(|e| !e.is_directory)
    }

    /// Names of the immediate children of `directory_path` (files and directories).
    ///
    /// Deeper descendants are not included. Returns an empty set if the directory is
    /// missing.
    pub fn list_children(&self, directory_path: &str) -> BTreeSet<String> {
        let dir = normalize_entry_path(directory_path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut out = BTreeSet::new();
        for (key, _) in self.entries.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            if !rest.is_empty() && !rest.contains('/') {
                out.insert(rest.to_owned());
            }
        }
        out
    }

    /// Read the full (decompressed) contents of a file entry.
    pub fn read(&self, entry: &ArchiveEntry) -> Result<Vec<u8>, ArchiveError> {
        let read_err = |source| ArchiveError::Read {
            archive: self.path.clone(),
            entry: entry.path.clone(),
            source,
        };
        let Some(zip_index) = entry.zip_index.filter(|_| !entry.is_directory) else {
            return Err(read_err(std::io::Error::other("entry is a directory")));
        };

        let mut zip = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = zip
            .by_index(zip_index)
            .map_err(|source| ArchiveError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let mut buf = Vec::with_capacity(entry.size.min(MAX_PREALLOC_BYTES) as usize);
        file.read_to_end(&mut buf).map_err(read_err)?;
        Ok(buf)
    }

    /// Read a file entry by path. Returns `Ok(None)` when the entry isn't present.
    pub fn read_path(&self, relative_path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match self.lookup(relative_path) {
            Some(entry) if !entry.is_directory => self.read(entry).map(Some),
            _ => Ok(None),
        }
    }
}

fn synthesize_directories(entries: &mut BTreeMap<String, ArchiveEntry>) {
    let mut implied: Vec<(String, i64)> = Vec::new();
    for entry in entries.values() {
        let mut path = entry.path.as_str();
        while let Some((parent, _)) = path.rsplit_once('/') {
            implied.push((parent.to_owned(), entry.mtime));
            path = parent;
        }
    }

    for (dir, mtime) in implied {
        entries
            .entry(dir.clone())
            .or_insert_with(|| ArchiveEntry::synthesized_dir(dir, mtime));
    }
}
