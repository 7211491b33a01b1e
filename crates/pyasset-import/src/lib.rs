//! Module resolution and loading from archive-packed asset bundles.
//!
//! An [`Importer`] owns an ordered [`BundleSearchPath`] and turns dotted module names into
//! [`ModuleSpec`]s and [`LoadedModule`]s. Archive entries appear to live under
//! `<extract_root>/<mount>/...` (their *logical* path) whether or not they were ever
//! extracted; only native modules and data resources are materialized on disk.
//!
//! Code execution, hook registration and tracebacks belong to the host. The host supplies
//! a [`pyasset_cache::Compiler`] and executes the returned code objects.

mod bundle;
mod discovery;
mod error;
mod importer;
mod loader;
mod resolver;
mod resources;
mod search_path;

pub use bundle::{mount_name_for, Bundle};
pub use discovery::{iter_modules, walk_packages, ModuleInfo};
pub use error::ImportError;
pub use importer::{Importer, ImporterOptions, LoadedModule, ModuleSpec};
pub use loader::AssetLoader;
pub use resolver::{FileFormat, ModuleFile, ModuleKind, ModuleResolver, ResolvedModule};
pub use search_path::{BundleSearchPath, SearchPathEntry};
