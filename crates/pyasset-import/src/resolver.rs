use crate::search_path::SearchPathEntry;

const SOURCE_SUFFIX: &str = ".py";
const COMPILED_SUFFIX: &str = ".pyc";
/// File names that make a directory a regular package.
pub(crate) const PACKAGE_INIT_NAMES: [&str; 2] = ["__init__.py", "__init__.pyc"];
const PACKAGE_INITS: [(&str, FileFormat); 2] = [
    ("__init__.py", FileFormat::Source),
    ("__init__.pyc", FileFormat::Compiled),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    Source,
    Compiled,
    Native,
    Package,
    Namespace,
}

/// How a module file is turned into a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Source,
    Compiled,
    Native,
}

/// The file a module is loaded from, relative to its container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleFile {
    /// `/`-separated path relative to the container, e.g. `about.pyc` or `pkg/__init__.py`.
    pub relative_path: String,
    pub format: FileFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedModule {
    pub name: String,
    pub kind: ModuleKind,
    /// The search-path entry the module was found in. `None` for namespace packages.
    pub container: Option<SearchPathEntry>,
    /// `None` for namespace packages.
    pub file: Option<ModuleFile>,
    /// For packages: where sub-modules are looked up.
    pub search_path_for_subpackages: Option<Vec<SearchPathEntry>>,
}

impl ResolvedModule {
    pub fn is_package(&self) -> bool {
        matches!(self.kind, ModuleKind::Package | ModuleKind::Namespace)
    }

    /// The final component of the dotted name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Maps dotted names to files on an ordered search path.
///
/// Within one entry a package directory (with an `__init__`) wins over `.py`, which wins
/// over `.pyc`, which wins over native suffixes in the configured order. The first entry
/// with any match wins; later entries are not consulted. Directories without an `__init__`
/// are collected as namespace portions and only used if nothing else matches.
#[derive(Clone, Debug)]
pub struct ModuleResolver {
    native_suffixes: Vec<String>,
}

impl ModuleResolver {
    pub fn new(native_suffixes: Vec<String>) -> Self {
        Self { native_suffixes }
    }

    pub fn native_suffixes(&self) -> &[String] {
        &self.native_suffixes
    }

    pub fn resolve(&self, qualified_name: &str, search_path: &[SearchPathEntry]) -> Option<ResolvedModule> {
        if !qualified_name.split('.').all(is_valid_component) {
            return None;
        }
        let tail = qualified_name.rsplit('.').next()?;

        let mut portions = Vec::new();
        for entry in search_path {
            let is_dir = entry.is_dir(tail);
            if is_dir {
                for (init, format) in PACKAGE_INITS {
                    let init_path = format!("{tail}/{init}");
                    if entry.is_file(&init_path) {
                        return Some(ResolvedModule {
                            name: qualified_name.to_owned(),
                            kind: ModuleKind::Package,
                            container: Some(entry.clone()),
                            file: Some(ModuleFile {
                                relative_path: init_path,
                                format,
                            }),
                            search_path_for_subpackages: Some(vec![entry.child(tail)]),
                        });
                    }
                }
            }

            for (suffix, format) in self.suffixes() {
                let file_name = format!("{tail}{suffix}");
                if entry.is_file(&file_name) {
                    let kind = match format {
                        FileFormat::Source => ModuleKind::Source,
                        FileFormat::Compiled => ModuleKind::Compiled,
                        FileFormat::Native => ModuleKind::Native,
                    };
                    return Some(ResolvedModule {
                        name: qualified_name.to_owned(),
                        kind,
                        container: Some(entry.clone()),
                        file: Some(ModuleFile {
                            relative_path: file_name,
                            format,
                        }),
                        search_path_for_subpackages: None,
                    });
                }
            }

            if is_dir {
                portions.push(entry.child(tail));
            }
        }

        if portions.is_empty() {
            return None;
        }
        Some(ResolvedModule {
            name: qualified_name.to_owned(),
            kind: ModuleKind::Namespace,
            container: None,
            file: None,
            search_path_for_subpackages: Some(portions),
        })
    }

    /// Classify a file name as an importable module file: `(module name, format)`.
    pub fn classify<'a>(&self, file_name: &'a str) -> Option<(&'a str, FileFormat)> {
        // Longest suffix first, so `.cpython-38.so` is not mistaken for `.so`.
        let mut suffixes: Vec<_> = self.suffixes().collect();
        suffixes.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
        suffixes.into_iter().find_map(|(suffix, format)| {
            file_name
                .strip_suffix(suffix)
                .filter(|stem| !stem.is_empty())
                .map(|stem| (stem, format))
        })
    }

    /// Whether `file_name` would be imported rather than read as data.
    pub fn is_importable(&self, file_name: &str) -> bool {
        self.classify(file_name).is_some()
    }

    fn suffixes(&self) -> impl Iterator<Item = (&str, FileFormat)> {
        [
            (SOURCE_SUFFIX, FileFormat::Source),
            (COMPILED_SUFFIX, FileFormat::Compiled),
        ]
        .into_iter()
        .chain(
            self.native_suffixes
                .iter()
                .map(|suffix| (suffix.as_str(), FileFormat::Native)),
        )
    }
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new(vec![".so".to_owned()])
    }
}

pub(crate) fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\'])
}
