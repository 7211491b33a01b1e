//! TOML configuration for pyasset hosts and the `pyasset` CLI.

mod logging;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{init_tracing, LoggingConfig};

/// Overrides [`PyAssetConfig::extract_root`] when set.
pub const EXTRACT_DIR_ENV: &str = "PYASSET_EXTRACT_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a snippet of the input; keep only the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

/// How compiled-code artifacts are validated against their source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationSetting {
    #[default]
    Timestamp,
    CheckedHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchPathConfig {
    /// Path to a zip bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<PathBuf>,

    /// Path to a plain directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Mount name for a bundle. Defaults to the archive stem up to the first `-`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Whether modules from this bundle may be imported under a different name.
    #[serde(default = "default_true")]
    pub relocatable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPathSource<'a> {
    Bundle(&'a Path),
    Directory(&'a Path),
}

impl SearchPathConfig {
    pub fn bundle(path: impl Into<PathBuf>) -> Self {
        Self {
            bundle: Some(path.into()),
            directory: None,
            name: None,
            relocatable: true,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            bundle: None,
            directory: Some(path.into()),
            name: None,
            relocatable: true,
        }
    }

    pub fn source(&self) -> Result<SearchPathSource<'_>, ConfigError> {
        match (&self.bundle, &self.directory) {
            (Some(bundle), None) => Ok(SearchPathSource::Bundle(bundle)),
            (None, Some(directory)) => Ok(SearchPathSource::Directory(directory)),
            _ => Err(ConfigError::Invalid(
                "search_path entries need exactly one of `bundle` or `directory`".to_owned(),
            )),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PyAssetConfig {
    /// Writable root for extracted files and bytecode caches.
    #[serde(default = "PyAssetConfig::default_extract_root")]
    pub extract_root: PathBuf,

    /// Interpreter cache tag used in `__pycache__/<stem>.<tag>.pyc`.
    #[serde(default = "PyAssetConfig::default_cache_tag")]
    pub cache_tag: String,

    /// Filename suffixes recognized as native extension modules, in priority order.
    #[serde(default = "PyAssetConfig::default_native_suffixes")]
    pub native_suffixes: Vec<String>,

    #[serde(default)]
    pub invalidation: InvalidationSetting,

    /// Ordered import search path. Earlier entries win.
    #[serde(default)]
    pub search_path: Vec<SearchPathConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PyAssetConfig {
    fn default() -> Self {
        Self {
            extract_root: Self::default_extract_root(),
            cache_tag: Self::default_cache_tag(),
            native_suffixes: Self::default_native_suffixes(),
            invalidation: InvalidationSetting::default(),
            search_path: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PyAssetConfig {
    fn default_extract_root() -> PathBuf {
        std::env::temp_dir().join("pyasset")
    }

    fn default_cache_tag() -> String {
        "cpython-38".to_owned()
    }

    fn default_native_suffixes() -> Vec<String> {
        vec![".so".to_owned()]
    }

    /// Load a config file. Relative paths are resolved against the file's directory and
    /// environment overrides are applied.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::load_from_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate TOML text. Paths are left as written.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: PyAssetConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, entry) in self.search_path.iter().enumerate() {
            entry
                .source()
                .map_err(|err| ConfigError::Invalid(format!("search_path[{i}]: {err}")))?;
            if entry.directory.is_some() && (entry.name.is_some() || !entry.relocatable) {
                return Err(ConfigError::Invalid(format!(
                    "search_path[{i}]: `name` and `relocatable` only apply to bundles"
                )));
            }
        }
        if self.cache_tag.is_empty() {
            return Err(ConfigError::Invalid("cache_tag must not be empty".to_owned()));
        }
        if let Some(bad) = self.native_suffixes.iter().find(|s| !s.starts_with('.')) {
            return Err(ConfigError::Invalid(format!(
                "native suffix {bad:?} must start with `.`"
            )));
        }
        Ok(())
    }

    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.extract_root);
        for entry in &mut self.search_path {
            if let Some(bundle) = entry.bundle.as_mut() {
                resolve(bundle);
            }
            if let Some(directory) = entry.directory.as_mut() {
                resolve(directory);
            }
        }
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os(EXTRACT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.extract_root = PathBuf::from(dir);
        }
    }
}
