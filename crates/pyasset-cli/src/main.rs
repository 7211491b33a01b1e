use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pyasset_cache::{CompileError, Compiler, ExtractOutcome};
use pyasset_config::{PyAssetConfig, SearchPathConfig};
use pyasset_import::{ImportError, Importer, ModuleInfo, ModuleKind, ModuleSpec};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "pyasset",
    version,
    about = "Inspect and materialize archive-packed Python bundles"
)]
struct Cli {
    /// Config file describing the search path and extraction root
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Append a bundle archive to the search path (repeatable)
    #[arg(long = "bundle", global = true)]
    bundles: Vec<PathBuf>,
    /// Directory that bundles are mounted under
    #[arg(long, global = true)]
    extract_root: Option<PathBuf>,
    /// Emit JSON suitable for scripts
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a dotted module name without loading it
    Resolve(ResolveArgs),
    /// List importable modules, top-level or inside a package
    Modules(ModulesArgs),
    /// List resources in a package directory
    List(ListArgs),
    /// Extract a package's data files, one resource, or a native module
    Extract(ExtractArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// Dotted module name, e.g. `murmurhash.about`
    module: String,
}

#[derive(Args)]
struct ModulesArgs {
    /// Package to list (defaults to the top level)
    package: Option<String>,
    /// Recurse into sub-packages
    #[arg(long)]
    recursive: bool,
}

#[derive(Args)]
struct ListArgs {
    package: String,
    /// `/`-separated directory inside the package
    #[arg(default_value = "")]
    subdir: String,
}

#[derive(Args)]
struct ExtractArgs {
    /// Package or native module
    target: String,
    /// Single resource inside the package
    resource: Option<String>,
}

/// Magic number of CPython 3.8 bytecode.
const CPYTHON_38_MAGIC: [u8; 4] = [0x55, 0x0d, 0x0d, 0x0a];

/// The CLI never executes modules, so there is no interpreter to compile source with.
struct NoCompiler;

impl Compiler for NoCompiler {
    fn magic(&self) -> [u8; 4] {
        CPYTHON_38_MAGIC
    }

    fn compile(&self, _source: &[u8], filename: &str) -> Result<Vec<u8>, CompileError> {
        Err(CompileError {
            filename: filename.to_owned(),
            line: None,
            message: "compiling source requires a host interpreter".to_owned(),
        })
    }
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    pyasset_config::init_tracing(&config.logging);
    let importer = Importer::from_config(&config, Arc::new(NoCompiler))
        .context("failed to open bundles")?;
    tracing::debug!(
        target: "pyasset.cli",
        entries = importer.search_path().entries().len(),
        extract_root = %config.extract_root.display(),
        "opened search path"
    );

    match cli.command {
        Command::Resolve(args) => {
            let spec = importer.find_module(&args.module)?;
            let report = ResolveReport::new(&spec)?;
            print_output(&report, cli.json)?;
        }
        Command::Modules(args) => {
            let (path, prefix) = match &args.package {
                Some(package) => {
                    let spec = importer.find_module(package)?;
                    let Some(path) = spec.submodule_search_locations else {
                        return Err(ImportError::NotAPackage {
                            name: package.clone(),
                        }
                        .into());
                    };
                    (Some(path), format!("{package}."))
                }
                None => (None, String::new()),
            };
            let modules = if args.recursive {
                importer.walk_packages(path.as_deref(), &prefix)
            } else {
                importer.iter_modules(path.as_deref(), &prefix)
            };
            let rows: Vec<ModuleRow> = modules.iter().map(ModuleRow::from).collect();
            print_output(&rows, cli.json)?;
        }
        Command::List(args) => {
            let names = importer.resource_listdir(&args.package, &args.subdir)?;
            print_output(&names, cli.json)?;
        }
        Command::Extract(args) => {
            let report = match &args.resource {
                Some(resource) => {
                    let path = importer.resource_filename(&args.target, resource)?;
                    ExtractReport {
                        paths: vec![path],
                        extracted: None,
                    }
                }
                None => extract_module(&importer, &args.target)?,
            };
            print_output(&report, cli.json)?;
        }
    }
    Ok(0)
}

fn load_config(cli: &Cli) -> Result<PyAssetConfig> {
    let mut config = match &cli.config {
        Some(path) => PyAssetConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let mut config = PyAssetConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    config
        .search_path
        .extend(cli.bundles.iter().cloned().map(SearchPathConfig::bundle));
    if let Some(root) = &cli.extract_root {
        config.extract_root = root.clone();
    }
    if config.search_path.is_empty() {
        bail!("search path is empty (pass --config or --bundle)");
    }
    Ok(config)
}

fn extract_module(importer: &Importer, name: &str) -> Result<ExtractReport> {
    let spec = importer.find_module(name)?;
    match spec.kind {
        ModuleKind::Native => {
            let module = importer.load(spec)?;
            Ok(ExtractReport {
                paths: module.file.into_iter().collect(),
                extracted: None,
            })
        }
        ModuleKind::Package | ModuleKind::Namespace => {
            let mut outcomes: Vec<ExtractOutcome> = Vec::new();
            for dir in spec.submodule_search_locations.iter().flatten() {
                outcomes.extend(importer.extract_package_data(dir)?);
            }
            Ok(ExtractReport {
                extracted: Some(outcomes.iter().filter(|o| o.was_extracted()).count()),
                paths: outcomes.into_iter().map(ExtractOutcome::into_path).collect(),
            })
        }
        ModuleKind::Source | ModuleKind::Compiled => {
            bail!(
                "'{name}' is a {} module and is imported from the bundle directly",
                kind_name(spec.kind)
            )
        }
    }
}

fn kind_name(kind: ModuleKind) -> &'static str {
    match kind {
        ModuleKind::Source => "source",
        ModuleKind::Compiled => "compiled",
        ModuleKind::Native => "native",
        ModuleKind::Package => "package",
        ModuleKind::Namespace => "namespace",
    }
}

#[derive(Serialize)]
struct ResolveReport {
    name: String,
    kind: &'static str,
    /// `__file__` as the module would see it.
    file: Option<PathBuf>,
    origin: Option<PathBuf>,
    cached: Option<PathBuf>,
    search_locations: Option<Vec<PathBuf>>,
}

impl ResolveReport {
    fn new(spec: &ModuleSpec) -> Result<Self> {
        let file = match &spec.loader {
            Some(loader) => Some(loader.get_filename(&spec.name)?),
            None => None,
        };
        Ok(Self {
            name: spec.name.clone(),
            kind: kind_name(spec.kind),
            file,
            origin: spec.origin.clone(),
            cached: spec.cached.clone(),
            search_locations: spec
                .submodule_search_locations
                .as_ref()
                .map(|entries| entries.iter().map(|entry| entry.logical_path()).collect()),
        })
    }
}

#[derive(Serialize)]
struct ModuleRow {
    name: String,
    is_package: bool,
    location: PathBuf,
}

impl From<&ModuleInfo> for ModuleRow {
    fn from(info: &ModuleInfo) -> Self {
        Self {
            name: info.name.clone(),
            is_package: info.is_package,
            location: info.location.logical_path(),
        }
    }
}

#[derive(Serialize)]
struct ExtractReport {
    paths: Vec<PathBuf>,
    /// How many files were (re)written. `None` when not tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted: Option<usize>,
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for key types. Everything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(report) = any.downcast_ref::<ResolveReport>() {
        println!("{}: {}", report.name, report.kind);
        if let Some(file) = &report.file {
            println!("  file: {}", file.display());
        }
        if let Some(origin) = &report.origin {
            println!("  origin: {}", origin.display());
        }
        if let Some(cached) = &report.cached {
            println!("  cached: {}", cached.display());
        }
        for location in report.search_locations.iter().flatten() {
            println!("  path: {}", location.display());
        }
    } else if let Some(rows) = any.downcast_ref::<Vec<ModuleRow>>() {
        for row in rows {
            let suffix = if row.is_package { " (package)" } else { "" };
            println!("{}{suffix}", row.name);
        }
    } else if let Some(names) = any.downcast_ref::<Vec<String>>() {
        for name in names {
            println!("{name}");
        }
    } else if let Some(report) = any.downcast_ref::<ExtractReport>() {
        for path in &report.paths {
            println!("{}", path.display());
        }
        if let Some(extracted) = report.extracted {
            println!(
                "summary: {extracted} extracted, {} up to date",
                report.paths.len() - extracted
            );
        }
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}
