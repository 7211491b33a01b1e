use std::collections::HashSet;

use crate::importer::Importer;
use crate::resolver::{ModuleResolver, PACKAGE_INIT_NAMES};
use crate::search_path::SearchPathEntry;

/// A module found by [`iter_modules`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub is_package: bool,
    /// The search-path entry the module was found in.
    pub location: SearchPathEntry,
}

/// Modules directly on `search_path`, named `<prefix><name>`.
///
/// Entries are scanned in order and a name found in an earlier entry hides later ones.
/// Directories count only if they contain an `__init__`.
pub fn iter_modules(resolver: &ModuleResolver, search_path: &[SearchPathEntry], prefix: &str) -> Vec<ModuleInfo> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in search_path {
        for child in entry.list_children("") {
            let (name, is_package) = if entry.is_dir(&child) {
                let has_init = PACKAGE_INIT_NAMES
                    .iter()
                    .any(|init| entry.is_file(&format!("{child}/{init}")));
                if !has_init {
                    continue;
                }
                (child.as_str(), true)
            } else {
                match resolver.classify(&child) {
                    Some((stem, _)) => (stem, false),
                    None => continue,
                }
            };
            if name == "__init__" || name.contains('.') {
                continue;
            }
            if seen.insert(name.to_owned()) {
                out.push(ModuleInfo {
                    name: format!("{prefix}{name}"),
                    is_package,
                    location: entry.clone(),
                });
            }
        }
    }
    out
}

/// Every module reachable from `search_path`, recursing into packages.
///
/// Each package is listed before its contents.
pub fn walk_packages(resolver: &ModuleResolver, search_path: &[SearchPathEntry], prefix: &str) -> Vec<ModuleInfo> {
    let mut out = Vec::new();
    for info in iter_modules(resolver, search_path, prefix) {
        let subpath = info
            .is_package
            .then(|| resolver.resolve(&info.name, std::slice::from_ref(&info.location)))
            .flatten()
            .and_then(|module| module.search_path_for_subpackages);
        let sub_prefix = format!("{}.", info.name);
        out.push(info);
        if let Some(subpath) = subpath {
            out.extend(walk_packages(resolver, &subpath, &sub_prefix));
        }
    }
    out
}

impl Importer {
    /// [`iter_modules`] over `path`, or the top-level search path.
    pub fn iter_modules(&self, path: Option<&[SearchPathEntry]>, prefix: &str) -> Vec<ModuleInfo> {
        let path = path.unwrap_or_else(|| self.search_path().entries());
        iter_modules(self.resolver(), path, prefix)
    }

    /// [`walk_packages`] over `path`, or the top-level search path.
    pub fn walk_packages(&self, path: Option<&[SearchPathEntry]>, prefix: &str) -> Vec<ModuleInfo> {
        let path = path.unwrap_or_else(|| self.search_path().entries());
        walk_packages(self.resolver(), path, prefix)
    }
}
