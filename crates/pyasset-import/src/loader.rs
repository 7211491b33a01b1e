use std::fmt;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;

use pyasset_cache::{cache_path_for, BytecodeCache, CodeObject, ExtractionCache};

use crate::bundle::relative_to;
use crate::error::ImportError;
use crate::resolver::{FileFormat, ModuleResolver, ResolvedModule};
use crate::search_path::{read_file, SearchPathEntry};

/// State shared by an importer and every loader it hands out.
pub(crate) struct LoaderContext {
    pub(crate) resolver: ModuleResolver,
    pub(crate) bytecode: BytecodeCache,
    pub(crate) extraction: ExtractionCache,
    pub(crate) cache_tag: String,
}

/// Loads modules from one directory of the search path.
///
/// Loaders compare equal when they serve the same directory of the same bundle.
#[derive(Clone)]
pub struct AssetLoader {
    container: SearchPathEntry,
    ctx: Arc<LoaderContext>,
}

impl PartialEq for AssetLoader {
    fn eq(&self, other: &Self) -> bool {
        self.container == other.container
    }
}

impl Eq for AssetLoader {}

impl fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetLoader({:?})", self.container.logical_path())
    }
}

impl AssetLoader {
    pub(crate) fn new(container: SearchPathEntry, ctx: Arc<LoaderContext>) -> Self {
        Self { container, ctx }
    }

    pub fn container(&self) -> &SearchPathEntry {
        &self.container
    }

    fn find(&self, fullname: &str) -> Result<ResolvedModule, ImportError> {
        self.ctx
            .resolver
            .resolve(fullname, slice::from_ref(&self.container))
            .filter(|module| module.file.is_some())
            .ok_or_else(|| ImportError::NotFound {
                name: fullname.to_owned(),
            })
    }

    pub fn is_package(&self, fullname: &str) -> Result<bool, ImportError> {
        Ok(self.find(fullname)?.is_package())
    }

    /// Source text, or `None` for compiled-only and native modules.
    pub fn get_source(&self, fullname: &str) -> Result<Option<String>, ImportError> {
        let module = self.find(fullname)?;
        match module.file {
            Some(file) if file.format == FileFormat::Source => {
                let bytes = self.container.read(&file.relative_path)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            _ => Ok(None),
        }
    }

    /// Code for the module, or `None` for native modules.
    ///
    /// Source modules go through the bytecode cache; compiled-only modules are used as
    /// shipped.
    pub fn get_code(&self, fullname: &str) -> Result<Option<CodeObject>, ImportError> {
        let module = self.find(fullname)?;
        let Some(file) = module.file else {
            return Ok(None);
        };
        let logical = self.container.logical_path_of(&file.relative_path);

        match file.format {
            FileFormat::Native => Ok(None),
            FileFormat::Compiled => {
                let bytes = self.container.read(&file.relative_path)?;
                let code = self
                    .ctx
                    .bytecode
                    .load_compiled(&bytes, &logical.display().to_string())?;
                Ok(Some(code))
            }
            FileFormat::Source => {
                let stamp = self.container.stamp(&file.relative_path)?;
                let cache_path = self.cache_path(&logical)?;
                let fresh = self.ctx.bytecode.ensure_fresh(
                    stamp,
                    &logical.display().to_string(),
                    &cache_path,
                    || {
                        self.container
                            .read(&file.relative_path)
                            .map_err(into_cache_error)
                    },
                )?;
                tracing::trace!(
                    target: "pyasset.import",
                    module = fullname,
                    status = ?fresh.status,
                    "loaded code"
                );
                Ok(Some(fresh.code))
            }
        }
    }

    /// The module's `__file__`: its logical path, with `.pyc` reported as `.py`.
    pub fn get_filename(&self, fullname: &str) -> Result<PathBuf, ImportError> {
        let module = self.find(fullname)?;
        let Some(file) = module.file else {
            return Err(ImportError::NotFound {
                name: fullname.to_owned(),
            });
        };
        let logical = self.container.logical_path_of(&file.relative_path);
        Ok(match file.format {
            FileFormat::Compiled => logical.with_extension("py"),
            FileFormat::Source | FileFormat::Native => logical,
        })
    }

    /// Logical path of the file the module is actually loaded from (its spec origin).
    pub fn origin(&self, fullname: &str) -> Result<PathBuf, ImportError> {
        let module = self.find(fullname)?;
        match module.file {
            Some(file) => Ok(self.container.logical_path_of(&file.relative_path)),
            None => Err(ImportError::NotFound {
                name: fullname.to_owned(),
            }),
        }
    }

    /// Where compiled source for `fullname` is cached, if it is a source module.
    pub fn cached(&self, fullname: &str) -> Result<Option<PathBuf>, ImportError> {
        let module = self.find(fullname)?;
        match module.file {
            Some(file) if file.format == FileFormat::Source => {
                let logical = self.container.logical_path_of(&file.relative_path);
                Ok(Some(self.cache_path(&logical)?))
            }
            _ => Ok(None),
        }
    }

    /// Bytes of the file at `path`, which must lie under this loader's bundle (or
    /// directory) root.
    ///
    /// Paths are resolved against the bundle first; files that only exist on disk under the
    /// root (extracted data, `__pycache__` artifacts) are read from disk.
    pub fn get_data(&self, path: &Path) -> Result<Vec<u8>, ImportError> {
        let root = self.root();
        let Some(relative) = relative_to(&root, path) else {
            return Err(ImportError::PathOutsideLoader {
                loader: self.container.logical_path(),
                path: path.to_path_buf(),
            });
        };

        match &self.container {
            SearchPathEntry::Archive { bundle, .. } => match bundle.lookup_file(&relative) {
                Some((archive, entry)) => Ok(archive.read(entry)?),
                None if path.is_file() => read_file(path),
                None => Err(ImportError::FileNotFound {
                    path: path.to_path_buf(),
                }),
            },
            SearchPathEntry::Directory(_) => read_file(path),
        }
    }

    /// The root that [`AssetLoader::get_data`] accepts paths under.
    pub fn root(&self) -> PathBuf {
        match &self.container {
            SearchPathEntry::Archive { bundle, .. } => bundle.root().to_path_buf(),
            SearchPathEntry::Directory(path) => path.clone(),
        }
    }

    fn cache_path(&self, logical: &Path) -> Result<PathBuf, ImportError> {
        cache_path_for(logical, &self.ctx.cache_tag).ok_or_else(|| ImportError::FileNotFound {
            path: logical.to_path_buf(),
        })
    }
}

fn into_cache_error(err: ImportError) -> pyasset_cache::CacheError {
    match err {
        ImportError::Archive(err) => err.into(),
        ImportError::Io { source, .. } => source.into(),
        other => std::io::Error::new(std::io::ErrorKind::NotFound, other.to_string()).into(),
    }
}
