use std::path::PathBuf;
use std::sync::Arc;

use pyasset_cache::{
    BytecodeCache, CodeObject, Compiler, ExtractOutcome, ExtractionCache, InvalidationMode,
};
use pyasset_config::{InvalidationSetting, PyAssetConfig};

use crate::error::ImportError;
use crate::loader::{AssetLoader, LoaderContext};
use crate::resolver::{FileFormat, ModuleKind, ModuleResolver};
use crate::search_path::{BundleSearchPath, SearchPathEntry};

#[derive(Clone, Debug)]
pub struct ImporterOptions {
    pub extract_root: PathBuf,
    pub cache_tag: String,
    pub native_suffixes: Vec<String>,
    pub invalidation: InvalidationMode,
}

impl ImporterOptions {
    pub fn from_config(config: &PyAssetConfig) -> Self {
        Self {
            extract_root: config.extract_root.clone(),
            cache_tag: config.cache_tag.clone(),
            native_suffixes: config.native_suffixes.clone(),
            invalidation: match config.invalidation {
                InvalidationSetting::Timestamp => InvalidationMode::Timestamp,
                InvalidationSetting::CheckedHash => InvalidationMode::CheckedHash,
            },
        }
    }
}

/// What the host needs to create a module before executing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub kind: ModuleKind,
    /// Logical path of the file the module is loaded from. `None` for namespace packages.
    pub origin: Option<PathBuf>,
    /// Bytecode cache location, for source modules.
    pub cached: Option<PathBuf>,
    /// `None` for namespace packages, which have nothing to load.
    pub loader: Option<AssetLoader>,
    /// Sub-module search path, for packages.
    pub submodule_search_locations: Option<Vec<SearchPathEntry>>,
}

impl ModuleSpec {
    pub fn is_package(&self) -> bool {
        self.submodule_search_locations.is_some()
    }
}

/// A module ready for execution by the host.
#[derive(Clone, Debug)]
pub struct LoadedModule {
    pub name: String,
    pub kind: ModuleKind,
    /// `__file__`. `None` for namespace packages.
    pub file: Option<PathBuf>,
    /// `__package__`.
    pub package: String,
    /// `__path__`, as logical directory paths.
    pub path: Option<Vec<PathBuf>>,
    /// Code to execute. `None` for native modules and namespace packages.
    pub code: Option<CodeObject>,
    pub spec: ModuleSpec,
}

impl LoadedModule {
    /// Search path for this package's sub-modules.
    pub fn search_path(&self) -> Option<&[SearchPathEntry]> {
        self.spec.submodule_search_locations.as_deref()
    }
}

/// The single finder installed into the host's import machinery.
pub struct Importer {
    ctx: Arc<LoaderContext>,
    search_path: BundleSearchPath,
}

impl Importer {
    pub fn new(
        search_path: BundleSearchPath,
        compiler: Arc<dyn Compiler>,
        options: ImporterOptions,
    ) -> Self {
        let ctx = LoaderContext {
            resolver: ModuleResolver::new(options.native_suffixes),
            bytecode: BytecodeCache::new(compiler).with_mode(options.invalidation),
            extraction: ExtractionCache::new(options.extract_root),
            cache_tag: options.cache_tag,
        };
        Self {
            ctx: Arc::new(ctx),
            search_path,
        }
    }

    /// Open every bundle in `config` and build an importer over them.
    pub fn from_config(config: &PyAssetConfig, compiler: Arc<dyn Compiler>) -> Result<Self, ImportError> {
        let search_path = BundleSearchPath::from_config(config)?;
        Ok(Self::new(
            search_path,
            compiler,
            ImporterOptions::from_config(config),
        ))
    }

    pub fn search_path(&self) -> &BundleSearchPath {
        &self.search_path
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.ctx.resolver
    }

    pub fn extraction(&self) -> &ExtractionCache {
        &self.ctx.extraction
    }

    /// Find `name` on `path`, or on the top-level search path when `path` is `None`.
    ///
    /// Only the final component of `name` is looked up; the host passes the parent
    /// package's search path for dotted names.
    pub fn find_spec(&self, name: &str, path: Option<&[SearchPathEntry]>) -> Option<ModuleSpec> {
        let path = path.unwrap_or_else(|| self.search_path.entries());
        let module = self.ctx.resolver.resolve(name, path)?;

        let loader = module
            .container
            .clone()
            .map(|container| AssetLoader::new(container, self.ctx.clone()));
        let (origin, cached) = match (&loader, &module.file) {
            (Some(loader), Some(file)) => {
                let origin = loader.container().logical_path_of(&file.relative_path);
                let cached = match file.format {
                    FileFormat::Source => loader.cached(name).ok().flatten(),
                    FileFormat::Compiled | FileFormat::Native => None,
                };
                (Some(origin), cached)
            }
            _ => (None, None),
        };

        tracing::trace!(
            target: "pyasset.import",
            module = name,
            kind = ?module.kind,
            origin = ?origin,
            "resolved module"
        );
        Some(ModuleSpec {
            name: name.to_owned(),
            kind: module.kind,
            origin,
            cached,
            loader,
            submodule_search_locations: module.search_path_for_subpackages,
        })
    }

    /// Resolve a dotted name by walking its parent packages, without loading anything.
    pub fn find_module(&self, name: &str) -> Result<ModuleSpec, ImportError> {
        let not_found = || ImportError::NotFound {
            name: name.to_owned(),
        };
        let mut parent: Option<ModuleSpec> = None;
        let mut prefix = String::new();
        for part in name.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);

            let path = match &parent {
                None => None,
                Some(spec) => match spec.submodule_search_locations.as_deref() {
                    Some(path) => Some(path),
                    None => {
                        return Err(ImportError::NotAPackage {
                            name: spec.name.clone(),
                        })
                    }
                },
            };
            parent = Some(self.find_spec(&prefix, path).ok_or_else(not_found)?);
        }
        parent.ok_or_else(not_found)
    }

    /// Import `name`, loading each parent package on the way like the host would.
    pub fn import(&self, name: &str) -> Result<LoadedModule, ImportError> {
        let mut loaded: Option<LoadedModule> = None;
        let mut prefix = String::new();
        for part in name.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);

            let path = match &loaded {
                None => None,
                Some(parent) => match parent.search_path() {
                    Some(path) => Some(path),
                    None => {
                        return Err(ImportError::NotAPackage {
                            name: parent.name.clone(),
                        })
                    }
                },
            };
            let spec = self
                .find_spec(&prefix, path)
                .ok_or_else(|| ImportError::NotFound {
                    name: prefix.clone(),
                })?;
            loaded = Some(self.load(spec)?);
        }
        loaded.ok_or_else(|| ImportError::NotFound {
            name: name.to_owned(),
        })
    }

    /// Materialize everything `spec` needs and return the module for execution.
    ///
    /// Native modules are extracted. A top-level package also extracts its data files.
    pub fn load(&self, spec: ModuleSpec) -> Result<LoadedModule, ImportError> {
        let name = spec.name.clone();
        self.load_as(spec, &name)
    }

    /// Like [`Importer::load`], but registers the module under `new_name`.
    ///
    /// Modules from non-relocatable bundles cannot be renamed.
    pub fn load_as(&self, spec: ModuleSpec, new_name: &str) -> Result<LoadedModule, ImportError> {
        let Some(loader) = spec.loader.clone() else {
            return Ok(namespace_module(spec, new_name));
        };

        if new_name != spec.name {
            let relocatable = loader
                .container()
                .bundle()
                .map_or(true, |bundle| bundle.is_relocatable());
            if !relocatable {
                return Err(ImportError::RenameUnsupported {
                    real: spec.name.clone(),
                    requested: new_name.to_owned(),
                });
            }
        }

        let file = match spec.kind {
            ModuleKind::Native => Some(self.materialize_native(&loader, &spec)?),
            _ => Some(loader.get_filename(&spec.name)?),
        };
        let code = loader.get_code(&spec.name)?;

        if spec.kind == ModuleKind::Package && !spec.name.contains('.') {
            if let Some(package_dir) = spec
                .submodule_search_locations
                .as_deref()
                .and_then(<[_]>::first)
            {
                self.extract_package_data(package_dir)?;
            }
        }

        tracing::debug!(
            target: "pyasset.import",
            module = new_name,
            kind = ?spec.kind,
            "loaded module"
        );

        let path = spec
            .submodule_search_locations
            .as_ref()
            .map(|entries| entries.iter().map(SearchPathEntry::logical_path).collect());
        Ok(LoadedModule {
            name: new_name.to_owned(),
            kind: spec.kind,
            file,
            package: package_name(new_name, spec.is_package()),
            path,
            code,
            spec,
        })
    }

    fn materialize_native(&self, loader: &AssetLoader, spec: &ModuleSpec) -> Result<PathBuf, ImportError> {
        let origin = loader.origin(&spec.name)?;
        match loader.container().bundle() {
            Some(bundle) => {
                let relative = bundle
                    .relative_path(&origin)
                    .ok_or_else(|| ImportError::FileNotFound {
                        path: origin.clone(),
                    })?;
                let (archive, entry) = bundle
                    .lookup_file(&relative)
                    .ok_or_else(|| ImportError::FileNotFound {
                        path: origin.clone(),
                    })?;
                let outcome = self
                    .ctx
                    .extraction
                    .ensure_extracted(archive, entry, &origin)?;
                Ok(outcome.into_path())
            }
            // Filesystem modules are used in place.
            None => Ok(origin),
        }
    }

    /// Extract every non-importable file under an archive package directory, across all
    /// archives of its bundle. Filesystem directories need no extraction.
    pub fn extract_package_data(&self, package_dir: &SearchPathEntry) -> Result<Vec<ExtractOutcome>, ImportError> {
        let mut outcomes = Vec::new();
        if package_dir.bundle().is_some() {
            self.extract_tree(package_dir, "", &mut outcomes)?;
            tracing::debug!(
                target: "pyasset.import",
                package = %package_dir.logical_path().display(),
                files = outcomes.len(),
                extracted = outcomes.iter().filter(|o| o.was_extracted()).count(),
                "checked package data"
            );
        }
        Ok(outcomes)
    }

    pub(crate) fn extract_tree(
        &self,
        dir: &SearchPathEntry,
        relative: &str,
        outcomes: &mut Vec<ExtractOutcome>,
    ) -> Result<(), ImportError> {
        let Some(bundle) = dir.bundle() else {
            return Ok(());
        };
        for child in dir.list_children(relative) {
            let child_relative = if relative.is_empty() {
                child.clone()
            } else {
                format!("{relative}/{child}")
            };
            if dir.is_dir(&child_relative) {
                self.extract_tree(dir, &child_relative, outcomes)?;
                continue;
            }
            if self.ctx.resolver.is_importable(&child) {
                continue;
            }
            let Some(archive_path) = dir.archive_path(&child_relative) else {
                continue;
            };
            if let Some((archive, entry)) = bundle.lookup_file(&archive_path) {
                let dest = bundle.logical_path(&archive_path);
                outcomes.push(self.ctx.extraction.ensure_extracted(archive, entry, &dest)?);
            }
        }
        Ok(())
    }

    /// Loader for an arbitrary search-path directory.
    pub fn loader_for(&self, container: SearchPathEntry) -> AssetLoader {
        AssetLoader::new(container, self.ctx.clone())
    }
}

fn namespace_module(spec: ModuleSpec, name: &str) -> LoadedModule {
    let path = spec
        .submodule_search_locations
        .as_ref()
        .map(|entries| entries.iter().map(SearchPathEntry::logical_path).collect());
    LoadedModule {
        name: name.to_owned(),
        kind: ModuleKind::Namespace,
        file: None,
        package: name.to_owned(),
        path,
        code: None,
        spec,
    }
}

fn package_name(name: &str, is_package: bool) -> String {
    if is_package {
        name.to_owned()
    } else {
        name.rsplit_once('.')
            .map(|(parent, _)| parent.to_owned())
            .unwrap_or_default()
    }
}
