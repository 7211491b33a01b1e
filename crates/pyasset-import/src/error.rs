use std::path::PathBuf;

use pyasset_archive::ArchiveError;
use pyasset_cache::{CacheError, CompileError};
use pyasset_config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("No module named '{name}'")]
    NotFound { name: String },

    #[error("'{name}' is not a package")]
    NotAPackage { name: String },

    #[error("cannot load module '{real}' under a different name '{requested}'")]
    RenameUnsupported { real: String, requested: String },

    #[error("AssetLoader('{loader}') can't access '{path}'")]
    PathOutsideLoader { loader: PathBuf, path: PathBuf },

    #[error("No such file or directory: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Compile(CompileError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Cache(CacheError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<CacheError> for ImportError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Compile(err) => ImportError::Compile(err),
            CacheError::Archive(err) => ImportError::Archive(err),
            other => ImportError::Cache(other),
        }
    }
}

impl From<CompileError> for ImportError {
    fn from(err: CompileError) -> Self {
        ImportError::Compile(err)
    }
}
