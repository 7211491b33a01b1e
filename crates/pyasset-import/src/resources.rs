//! Package resource access: listing, existence checks, bytes, and real filenames.
//!
//! Resource names are `/`-separated paths relative to a package directory.

use std::path::PathBuf;

use crate::error::ImportError;
use crate::importer::Importer;
use crate::resolver::is_valid_component;
use crate::search_path::SearchPathEntry;

impl Importer {
    /// The directory holding `package`'s resources.
    fn package_dir(&self, package: &str) -> Result<SearchPathEntry, ImportError> {
        let spec = self.find_module(package)?;
        spec.submodule_search_locations
            .and_then(|entries| entries.into_iter().next())
            .ok_or_else(|| ImportError::NotAPackage {
                name: package.to_owned(),
            })
    }

    fn resource_target(
        &self,
        package: &str,
        resource: &str,
    ) -> Result<(SearchPathEntry, String), ImportError> {
        let dir = self.package_dir(package)?;
        let resource = checked_resource_name(&dir, resource)?;
        Ok((dir, resource))
    }

    /// Names directly inside `subdir` of `package` (`""` for the package itself).
    pub fn resource_listdir(&self, package: &str, subdir: &str) -> Result<Vec<String>, ImportError> {
        let (dir, subdir) = self.resource_target(package, subdir)?;
        if !dir.is_dir(&subdir) {
            return Err(ImportError::FileNotFound {
                path: dir.logical_path_of(&subdir),
            });
        }
        Ok(dir.list_children(&subdir).into_iter().collect())
    }

    pub fn resource_exists(&self, package: &str, resource: &str) -> Result<bool, ImportError> {
        let (dir, resource) = self.resource_target(package, resource)?;
        Ok(dir.exists(&resource))
    }

    pub fn resource_isdir(&self, package: &str, resource: &str) -> Result<bool, ImportError> {
        let (dir, resource) = self.resource_target(package, resource)?;
        Ok(!resource.is_empty() && dir.is_dir(&resource))
    }

    /// Whether `resource` names a file (not a directory) in `package`.
    pub fn is_resource(&self, package: &str, resource: &str) -> Result<bool, ImportError> {
        let (dir, resource) = self.resource_target(package, resource)?;
        Ok(dir.is_file(&resource))
    }

    /// Immediate children of the package directory.
    pub fn contents(&self, package: &str) -> Result<Vec<String>, ImportError> {
        self.resource_listdir(package, "")
    }

    /// Contents of a resource file, read from the bundle.
    pub fn resource_bytes(&self, package: &str, resource: &str) -> Result<Vec<u8>, ImportError> {
        let (dir, resource) = self.resource_target(package, resource)?;
        dir.read(&resource)
    }

    /// A real filesystem path for `resource`.
    ///
    /// Data files (and directories, recursively) are extracted on demand. Importable files
    /// are not extracted; their logical path is returned as is.
    pub fn resource_filename(&self, package: &str, resource: &str) -> Result<PathBuf, ImportError> {
        let (dir, resource) = self.resource_target(package, resource)?;
        let logical = dir.logical_path_of(&resource);

        if dir.is_dir(&resource) {
            let mut outcomes = Vec::new();
            self.extract_tree(&dir, &resource, &mut outcomes)?;
            return Ok(logical);
        }
        if !dir.is_file(&resource) {
            return Err(ImportError::FileNotFound { path: logical });
        }

        let file_name = resource.rsplit('/').next().unwrap_or(&resource);
        if self.resolver().is_importable(file_name) {
            return Ok(logical);
        }

        match (dir.bundle(), dir.archive_path(&resource)) {
            (Some(bundle), Some(archive_path)) => match bundle.lookup_file(&archive_path) {
                Some((archive, entry)) => Ok(self
                    .extraction()
                    .ensure_extracted(archive, entry, &logical)?
                    .into_path()),
                None => Err(ImportError::FileNotFound { path: logical }),
            },
            // Filesystem resources already have a real path.
            _ => Ok(logical),
        }
    }
}

fn checked_resource_name(dir: &SearchPathEntry, resource: &str) -> Result<String, ImportError> {
    let parts: Vec<&str> = resource.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|part| !is_valid_component(part)) {
        return Err(ImportError::PathOutsideLoader {
            loader: dir.logical_path(),
            path: PathBuf::from(resource),
        });
    }
    Ok(parts.join("/"))
}
