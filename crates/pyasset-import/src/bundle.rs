use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use pyasset_archive::{normalize_entry_path, ArchiveEntry, ArchiveIndex};

use crate::error::ImportError;

/// Mount name for an archive: its file stem up to the first `-`.
///
/// `requirements-common.zip` and `requirements-arm64-v8a.zip` both mount at `requirements`.
pub fn mount_name_for(archive_path: &Path) -> Option<String> {
    let stem = archive_path.file_stem()?.to_str()?;
    let name = stem.split('-').next().unwrap_or(stem);
    (!name.is_empty()).then(|| name.to_owned())
}

/// One or more archives sharing a mount name.
///
/// Lookups consult the archives in order; directories are merged, so a package rooted in
/// one archive may contain entries that live in another.
pub struct Bundle {
    name: String,
    root: PathBuf,
    archives: Vec<ArchiveIndex>,
    relocatable: bool,
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name)
            .field("root", &self.root)
            .field(
                "archives",
                &self.archives.iter().map(ArchiveIndex::path).collect::<Vec<_>>(),
            )
            .field("relocatable", &self.relocatable)
            .finish()
    }
}

/// Bundles are equal when they mount the same archives, in the same order, at the same root.
impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.root == other.root
            && self.archives.len() == other.archives.len()
            && self
                .archives
                .iter()
                .zip(&other.archives)
                .all(|(a, b)| a.path() == b.path())
    }
}

impl Eq for Bundle {}

impl Bundle {
    /// An empty bundle mounted at `<extract_root>/<name>`.
    pub fn new(name: impl Into<String>, extract_root: &Path) -> Self {
        let name = name.into();
        Self {
            root: extract_root.join(&name),
            name,
            archives: Vec::new(),
            relocatable: true,
        }
    }

    #[must_use]
    pub fn with_relocatable(mut self, relocatable: bool) -> Self {
        self.relocatable = relocatable;
        self
    }

    pub(crate) fn set_relocatable(&mut self, relocatable: bool) {
        self.relocatable = relocatable;
    }

    /// Open `archive_path` and append it to this bundle.
    pub fn open_archive(&mut self, archive_path: &Path) -> Result<(), ImportError> {
        let index = ArchiveIndex::open(archive_path)?;
        tracing::debug!(
            target: "pyasset.import",
            bundle = %self.name,
            archive = %archive_path.display(),
            entries = index.len(),
            "opened bundle archive"
        );
        self.archives.push(index);
        Ok(())
    }

    pub fn push_archive(&mut self, index: ArchiveIndex) {
        self.archives.push(index);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical root: where this bundle's entries appear to live on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archives(&self) -> &[ArchiveIndex] {
        &self.archives
    }

    pub fn is_relocatable(&self) -> bool {
        self.relocatable
    }

    /// The first file entry at `relative_path`, with the archive holding it.
    pub fn lookup_file(&self, relative_path: &str) -> Option<(&ArchiveIndex, &ArchiveEntry)> {
        self.archives.iter().find_map(|archive| {
            archive
                .lookup(relative_path)
                .filter(|entry| !entry.is_directory())
                .map(|entry| (archive, entry))
        })
    }

    /// The first entry (file or directory) at `relative_path`.
    pub fn lookup(&self, relative_path: &str) -> Option<(&ArchiveIndex, &ArchiveEntry)> {
        self.archives
            .iter()
            .find_map(|archive| archive.lookup(relative_path).map(|entry| (archive, entry)))
    }

    pub fn is_dir(&self, relative_path: &str) -> bool {
        self.archives.iter().any(|archive| archive.is_dir(relative_path))
    }

    pub fn is_file(&self, relative_path: &str) -> bool {
        self.lookup_file(relative_path).is_some()
    }

    /// Union of the immediate children of `directory_path` across all archives.
    pub fn list_children(&self, directory_path: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for archive in &self.archives {
            out.extend(archive.list_children(directory_path));
        }
        out
    }

    /// `<root>/<relative_path>`, whether or not anything exists there on disk.
    pub fn logical_path(&self, relative_path: &str) -> PathBuf {
        join_relative(&self.root, relative_path)
    }

    /// Inverse of [`Bundle::logical_path`]. Returns `None` for paths outside the root or
    /// paths that climb out of it.
    pub fn relative_path(&self, logical_path: &Path) -> Option<String> {
        relative_to(&self.root, logical_path)
    }
}

/// Join a `/`-separated relative path onto `base`, one component at a time.
pub(crate) fn join_relative(base: &Path, relative_path: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for component in relative_path.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path
}

/// `path` relative to `base` as a normalized `/`-separated string.
pub(crate) fn relative_to(base: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(normalize_entry_path(&parts.join("/")))
}
