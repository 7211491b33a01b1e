use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use pyasset_cache::SourceStamp;
use pyasset_config::{ConfigError, PyAssetConfig, SearchPathSource};

use crate::bundle::{join_relative, mount_name_for, Bundle};
use crate::error::ImportError;

/// One place consulted during resolution: a directory inside a bundle, or a filesystem
/// directory.
#[derive(Clone, Debug)]
pub enum SearchPathEntry {
    Archive { bundle: Arc<Bundle>, subpath: String },
    Directory(PathBuf),
}

impl PartialEq for SearchPathEntry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SearchPathEntry::Archive { bundle, subpath },
                SearchPathEntry::Archive {
                    bundle: other_bundle,
                    subpath: other_subpath,
                },
            ) => {
                (Arc::ptr_eq(bundle, other_bundle) || bundle == other_bundle)
                    && subpath == other_subpath
            }
            (SearchPathEntry::Directory(a), SearchPathEntry::Directory(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SearchPathEntry {}

impl SearchPathEntry {
    /// The root of `bundle`.
    pub fn bundle_root(bundle: Arc<Bundle>) -> Self {
        SearchPathEntry::Archive {
            bundle,
            subpath: String::new(),
        }
    }

    pub fn bundle(&self) -> Option<&Arc<Bundle>> {
        match self {
            SearchPathEntry::Archive { bundle, .. } => Some(bundle),
            SearchPathEntry::Directory(_) => None,
        }
    }

    /// The entry for the subdirectory `name` of this one.
    pub fn child(&self, name: &str) -> SearchPathEntry {
        match self {
            SearchPathEntry::Archive { bundle, subpath } => SearchPathEntry::Archive {
                bundle: bundle.clone(),
                subpath: self.archive_path(name).unwrap_or_else(|| subpath.clone()),
            },
            SearchPathEntry::Directory(path) => {
                SearchPathEntry::Directory(join_relative(path, name))
            }
        }
    }

    /// Where this directory appears to live on disk.
    pub fn logical_path(&self) -> PathBuf {
        match self {
            SearchPathEntry::Archive { bundle, subpath } => bundle.logical_path(subpath),
            SearchPathEntry::Directory(path) => path.clone(),
        }
    }

    /// Logical path of `name`, relative to this directory.
    pub fn logical_path_of(&self, name: &str) -> PathBuf {
        join_relative(&self.logical_path(), name)
    }

    /// Path of `name` inside the bundle, for archive entries.
    pub fn archive_path(&self, name: &str) -> Option<String> {
        match self {
            SearchPathEntry::Archive { subpath, .. } if subpath.is_empty() => {
                Some(name.trim_matches('/').to_owned())
            }
            SearchPathEntry::Archive { subpath, .. } => {
                let name = name.trim_matches('/');
                if name.is_empty() {
                    Some(subpath.clone())
                } else {
                    Some(format!("{subpath}/{name}"))
                }
            }
            SearchPathEntry::Directory(_) => None,
        }
    }

    pub fn is_dir(&self, name: &str) -> bool {
        match self {
            SearchPathEntry::Archive { bundle, .. } => self
                .archive_path(name)
                .is_some_and(|path| bundle.is_dir(&path)),
            SearchPathEntry::Directory(path) => join_relative(path, name).is_dir(),
        }
    }

    pub fn is_file(&self, name: &str) -> bool {
        match self {
            SearchPathEntry::Archive { bundle, .. } => self
                .archive_path(name)
                .is_some_and(|path| bundle.is_file(&path)),
            SearchPathEntry::Directory(path) => join_relative(path, name).is_file(),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.is_dir(name) || self.is_file(name)
    }

    /// Immediate children of the directory `name` (`""` for this directory itself).
    pub fn list_children(&self, name: &str) -> BTreeSet<String> {
        match self {
            SearchPathEntry::Archive { bundle, .. } => self
                .archive_path(name)
                .map(|path| bundle.list_children(&path))
                .unwrap_or_default(),
            SearchPathEntry::Directory(path) => {
                let Ok(read_dir) = fs::read_dir(join_relative(path, name)) else {
                    return BTreeSet::new();
                };
                read_dir
                    .filter_map(Result::ok)
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
                    .collect()
            }
        }
    }

    /// Contents of the file `name`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, ImportError> {
        match self {
            SearchPathEntry::Archive { bundle, .. } => {
                let found = self
                    .archive_path(name)
                    .and_then(|path| bundle.lookup_file(&path));
                match found {
                    Some((archive, entry)) => Ok(archive.read(entry)?),
                    None => Err(ImportError::FileNotFound {
                        path: self.logical_path_of(name),
                    }),
                }
            }
            SearchPathEntry::Directory(path) => read_file(&join_relative(path, name)),
        }
    }

    /// The `(mtime, size)` that compiled artifacts of `name` are validated against.
    pub fn stamp(&self, name: &str) -> Result<SourceStamp, ImportError> {
        match self {
            SearchPathEntry::Archive { bundle, .. } => {
                let found = self
                    .archive_path(name)
                    .and_then(|path| bundle.lookup_file(&path));
                match found {
                    Some((_, entry)) => Ok(SourceStamp {
                        mtime: entry.mtime(),
                        size: entry.size(),
                    }),
                    None => Err(ImportError::FileNotFound {
                        path: self.logical_path_of(name),
                    }),
                }
            }
            SearchPathEntry::Directory(path) => {
                let path = join_relative(path, name);
                let meta = fs::metadata(&path).map_err(|source| io_error(&path, source))?;
                Ok(SourceStamp {
                    mtime: FileTime::from_last_modification_time(&meta).unix_seconds(),
                    size: meta.len(),
                })
            }
        }
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, ImportError> {
    fs::read(path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> ImportError {
    if source.kind() == io::ErrorKind::NotFound {
        ImportError::FileNotFound {
            path: path.to_path_buf(),
        }
    } else {
        ImportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The ordered top-level search path.
///
/// Order is resolution priority and is preserved exactly as built.
#[derive(Clone, Debug, Default)]
pub struct BundleSearchPath {
    entries: Vec<SearchPathEntry>,
}

impl BundleSearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bundle(&mut self, bundle: Arc<Bundle>) {
        self.entries.push(SearchPathEntry::bundle_root(bundle));
    }

    pub fn push_directory(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(SearchPathEntry::Directory(path.into()));
    }

    pub fn entries(&self) -> &[SearchPathEntry] {
        &self.entries
    }

    /// Bundles on the search path, once each, in order.
    pub fn bundles(&self) -> impl Iterator<Item = &Arc<Bundle>> {
        self.entries.iter().filter_map(|entry| match entry {
            SearchPathEntry::Archive { bundle, subpath } if subpath.is_empty() => Some(bundle),
            _ => None,
        })
    }

    pub fn bundle(&self, name: &str) -> Option<&Arc<Bundle>> {
        self.bundles().find(|bundle| bundle.name() == name)
    }

    /// Open every bundle named by `config`.
    ///
    /// Archives with the same mount name are grouped into one [`Bundle`], in declaration
    /// order, placed where the first of them was declared. Directories listed by a bundle's
    /// top-level `.pth` files follow that bundle directly.
    pub fn from_config(config: &PyAssetConfig) -> Result<Self, ImportError> {
        enum Slot {
            Bundle(Bundle),
            Directory(PathBuf),
        }

        let mut slots: Vec<Slot> = Vec::new();
        for entry in &config.search_path {
            match entry.source()? {
                SearchPathSource::Directory(path) => slots.push(Slot::Directory(path.to_path_buf())),
                SearchPathSource::Bundle(path) => {
                    let name = match entry.name.clone().or_else(|| mount_name_for(path)) {
                        Some(name) => name,
                        None => {
                            return Err(ImportError::Config(ConfigError::Invalid(format!(
                                "cannot derive a mount name from {}",
                                path.display()
                            ))))
                        }
                    };
                    let existing = slots.iter_mut().find_map(|slot| match slot {
                        Slot::Bundle(bundle) if bundle.name() == name => Some(bundle),
                        _ => None,
                    });
                    match existing {
                        Some(bundle) => {
                            // One non-relocatable archive pins the whole group.
                            if !entry.relocatable {
                                bundle.set_relocatable(false);
                            }
                            bundle.open_archive(path)?;
                        }
                        None => {
                            let mut bundle = Bundle::new(name, &config.extract_root)
                                .with_relocatable(entry.relocatable);
                            bundle.open_archive(path)?;
                            slots.push(Slot::Bundle(bundle));
                        }
                    }
                }
            }
        }

        let mut search_path = Self::new();
        for slot in slots {
            match slot {
                Slot::Bundle(bundle) => {
                    let root = SearchPathEntry::bundle_root(Arc::new(bundle));
                    let extra = pth_entries(&root);
                    search_path.entries.push(root);
                    search_path.entries.extend(extra);
                }
                Slot::Directory(path) => search_path.push_directory(path),
            }
        }
        Ok(search_path)
    }
}

/// Directories named by the `.pth` files at the top of a bundle.
///
/// Relative lines name directories inside the bundle and absolute lines name filesystem
/// directories. Blank lines, comments, `import` lines and paths that do not exist are skipped.
fn pth_entries(root: &SearchPathEntry) -> Vec<SearchPathEntry> {
    let mut entries: Vec<SearchPathEntry> = Vec::new();
    for name in root.list_children("") {
        if !name.ends_with(".pth") || !root.is_file(&name) {
            continue;
        }
        let text = match root.read(&name) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    target: "pyasset.import",
                    file = %root.logical_path_of(&name).display(),
                    error = %err,
                    "failed to read path configuration file"
                );
                continue;
            }
        };
        for line in String::from_utf8_lossy(&text).lines() {
            let line = line.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with("import ")
                || line.starts_with("import\t")
            {
                continue;
            }
            let entry = if Path::new(line).is_absolute() {
                let path = PathBuf::from(line);
                path.is_dir().then(|| SearchPathEntry::Directory(path))
            } else {
                root.is_dir(line).then(|| root.child(line))
            };
            match entry {
                Some(entry) if !entries.contains(&entry) => entries.push(entry),
                Some(_) => {}
                None => tracing::debug!(
                    target: "pyasset.import",
                    file = %root.logical_path_of(&name).display(),
                    line,
                    "skipping missing path configuration entry"
                ),
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_paths_join_subpath() {
        let bundle = Arc::new(Bundle::new("app", Path::new("/assets")));
        let root = SearchPathEntry::bundle_root(bundle.clone());
        assert_eq!(root.archive_path("pkg").as_deref(), Some("pkg"));

        let pkg = root.child("pkg");
        assert_eq!(pkg.archive_path("mod.py").as_deref(), Some("pkg/mod.py"));
        assert_eq!(pkg.archive_path("").as_deref(), Some("pkg"));
        assert_eq!(pkg.logical_path(), PathBuf::from("/assets/app/pkg"));
        assert_eq!(
            pkg.logical_path_of("sub/data.txt"),
            PathBuf::from("/assets/app/pkg/sub/data.txt")
        );
    }

    #[test]
    fn entries_compare_by_bundle_identity_and_subpath() {
        let a = Arc::new(Bundle::new("app", Path::new("/assets")));
        let b = Arc::new(Bundle::new("app", Path::new("/assets")));
        let root = SearchPathEntry::bundle_root(a.clone());

        assert_eq!(root.child("pkg"), root.child("pkg"));
        assert_ne!(root.child("pkg"), root.child("other"));
        // Separately opened bundles with the same mount are the same directory.
        assert_eq!(root, SearchPathEntry::bundle_root(b.clone()));
        assert_eq!(root.child("pkg"), SearchPathEntry::bundle_root(b).child("pkg"));
        assert_ne!(root, SearchPathEntry::Directory(PathBuf::from("/assets/app")));
    }

    #[test]
    fn bundles_with_other_names_or_roots_differ() {
        let root = SearchPathEntry::bundle_root(Arc::new(Bundle::new("app", Path::new("/assets"))));
        let renamed =
            SearchPathEntry::bundle_root(Arc::new(Bundle::new("requirements", Path::new("/assets"))));
        let moved = SearchPathEntry::bundle_root(Arc::new(Bundle::new("app", Path::new("/other"))));
        assert_ne!(root, renamed);
        assert_ne!(root, moved);
    }
}
