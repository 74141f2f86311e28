//! Shipyard - CMS package deployment
//!
//! Usage:
//!   shipyard export --descriptor pkg.json --out pkg.zip   # Build an archive
//!   shipyard inspect pkg.zip                              # Show archive contents
//!   shipyard validate pkg.zip                             # Dry-run against this server
//!   shipyard install pkg.zip                              # Validate and import
//!   shipyard idmap <server>                               # Show identifier mappings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use semver::Version;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipyard_core::archive::Archive;
use shipyard_core::config::EngineConfig;
use shipyard_core::context::DeployContext;
use shipyard_core::dependency::Dependency;
use shipyard_core::descriptor::{ExportDescriptor, ImportDescriptor};
use shipyard_core::idtype::IdType;
use shipyard_core::installer::PackageInstaller;
use shipyard_core::job::{
    ExportJob, ExportReport, ImportReport, JobMonitor, PackageOutcome, ValidationJob, run_job,
};
use shipyard_core::repository::FsObjectStore;
use shipyard_core::types::DependencyKey;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "CMS package deployment", long_about = None)]
struct Cli {
    /// Engine configuration file (shipyard.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Object repository root
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Server name used when no configuration file is given
    #[arg(long, global = true, default_value = "localhost:9992")]
    server: String,

    /// Product version used when no configuration file is given
    #[arg(long, global = true, default_value = "8.1.0")]
    product_version: String,

    /// Override the state directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export packages described by a descriptor into an archive
    Export {
        /// Export descriptor (JSON)
        #[arg(long, short)]
        descriptor: PathBuf,

        /// Archive to write
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Show an archive's packages and files
    Inspect {
        /// Archive to read
        archive: PathBuf,
    },

    /// Validate an archive against this server without installing
    Validate {
        /// Archive to validate
        archive: PathBuf,
    },

    /// Validate and install an archive
    Install {
        /// Archive to install
        archive: PathBuf,

        /// Do not check the archive's compatible product-version window
        #[arg(long)]
        skip_version_check: bool,
    },

    /// Show the identifier map kept for a source server
    Idmap {
        /// Source server name (host:port)
        server: String,
    },

    /// Show the stored id types of an object
    Idtypes {
        /// Dependency key, e.g. ContentType-1
        key: String,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipyard=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let ctx = build_context(&cli)?;

    match cli.command {
        Commands::Export { descriptor, out } => run_export(&ctx, &descriptor, &out, cli.format),
        Commands::Inspect { archive } => run_inspect(&archive, cli.format),
        Commands::Validate { archive } => run_validate(&ctx, &archive, cli.format),
        Commands::Install {
            archive,
            skip_version_check,
        } => run_install(&ctx, &archive, !skip_version_check, cli.format),
        Commands::Idmap { server } => run_idmap(&ctx, &server, cli.format),
        Commands::Idtypes { key } => run_idtypes(&ctx, &key, cli.format),
    }
}

fn build_context(cli: &Cli) -> Result<DeployContext> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let version = Version::parse(&cli.product_version)
                .with_context(|| format!("Invalid product version: {}", cli.product_version))?;
            EngineConfig::new(cli.server.clone(), version)
        }
    };
    if let Some(dir) = &cli.state_dir {
        config = config.with_state_dir(dir.clone());
    }

    tracing::debug!(repo = %cli.repo.display(), server = %config.server_name, "opening context");
    let store = FsObjectStore::new(cli.repo.clone());
    DeployContext::new(config, Box::new(store)).context("Failed to open deployment state")
}

fn run_export(
    ctx: &DeployContext,
    descriptor: &Path,
    out: &Path,
    format: OutputFormat,
) -> Result<()> {
    let descriptor = ExportDescriptor::load(descriptor)?;
    let monitor = JobMonitor::new();
    let job = ExportJob::new(ctx, descriptor, out);
    let report = run_job(&monitor, "export", |m| job.run(m))?;

    match format {
        OutputFormat::Table => print_export(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_export(report: &ExportReport) {
    if report.cancelled {
        println!("{} Export cancelled", style("•").yellow());
        return;
    }
    println!(
        "{} Exported {} package(s) to {}",
        style("✓").green(),
        report.packages,
        report.archive.display()
    );
    println!(
        "  {} dependencies ({} discovered), {} files",
        report.dependencies, report.auto_dependencies, report.files
    );
}

fn run_inspect(path: &Path, format: OutputFormat) -> Result<()> {
    let archive = Archive::open(path)?;
    let info = archive.info()?;
    let manifest = archive.manifest()?;

    match format {
        OutputFormat::Table => {
            println!("Archive: {}", path.display());
            println!("Source:  {} ({})", info.server_name, info.product_version);
            println!("Created: {}", info.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(detail) = &info.detail {
                println!();
                println!("Packages ({}):", detail.packages.len());
                for package in &detail.packages {
                    print_tree(&package.root, 1, &|key| detail.included.contains(key));
                }
            }
            println!();
            println!("Files ({}):", manifest.file_count());
            for key in manifest.keys() {
                for file in manifest.files(key) {
                    println!("  {}", file.path);
                }
            }
        }
        OutputFormat::Json => {
            let files: Vec<_> = manifest
                .keys()
                .flat_map(|key| manifest.files(key))
                .map(|file| file.path.as_str())
                .collect();
            let output = serde_json::json!({
                "info": info,
                "files": files,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_tree(dependency: &Dependency, depth: usize, included: &dyn Fn(&DependencyKey) -> bool) {
    let key = dependency.key();
    let marker = if included(&key) {
        style("+").green()
    } else {
        style("-").dim()
    };
    let auto = if dependency.is_auto { " (auto)" } else { "" };
    println!(
        "{}{} {} {} [{}]{}",
        "  ".repeat(depth),
        marker,
        key,
        dependency.display_name,
        dependency.kind,
        auto
    );
    for child in &dependency.children {
        print_tree(child, depth + 1, included);
    }
}

fn run_validate(ctx: &DeployContext, archive: &Path, format: OutputFormat) -> Result<()> {
    let monitor = JobMonitor::new();
    let job = ValidationJob::new(ctx, archive);
    let descriptor = run_job(&monitor, "validate", |m| job.run(m))?;

    match format {
        OutputFormat::Table => print_validation(&descriptor),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptor)?),
    }

    if descriptor.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_validation(descriptor: &ImportDescriptor) {
    for package in &descriptor.packages {
        let results = &package.validation_results;
        if results.is_empty() {
            println!("{} {} ({})", style("✓").green(), package.name, package.key);
            continue;
        }

        let mark = if results.has_errors() {
            style("✗").red()
        } else {
            style("⚠").yellow()
        };
        println!("{} {} ({})", mark, package.name, package.key);
        for result in results.iter() {
            let label = if result.is_error {
                style("error").red()
            } else {
                style("warning").yellow()
            };
            println!("    {}: {} {}", label, result.key, result.message);
        }
    }
}

fn run_install(
    ctx: &DeployContext,
    archive: &Path,
    validate_version: bool,
    format: OutputFormat,
) -> Result<()> {
    let installer = PackageInstaller::new(ctx);
    let report = installer.install_package(archive, validate_version)?;

    match format {
        OutputFormat::Table => print_install(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_install(report: &ImportReport) {
    for package in &report.packages {
        match package.outcome {
            PackageOutcome::Installed => println!(
                "{} Installed '{}' ({} created, {} updated, {} skipped)",
                style("✓").green(),
                package.name,
                package.created,
                package.updated,
                package.skipped
            ),
            PackageOutcome::Aborted => {
                println!("{} Aborted '{}'", style("✗").red(), package.name)
            }
            PackageOutcome::NotStarted => {
                println!("{} Not started '{}'", style("•").dim(), package.name)
            }
        }
    }
    if report.cancelled {
        println!("  {}", style("Import cancelled").yellow());
    }
    println!("  Transaction log: {}", report.archive_log_id);
}

fn run_idmap(ctx: &DeployContext, server: &str, format: OutputFormat) -> Result<()> {
    let map = ctx.id_maps().get_idmap(server)?;

    match format {
        OutputFormat::Table => {
            if map.is_empty() {
                println!("No mappings for {}", server);
                return Ok(());
            }
            println!("Mappings from {} ({}):", server, map.len());
            println!(
                "  {:<16} {:<10} {:<24} {:<10}",
                "TYPE", "SOURCE", "NAME", "TARGET"
            );
            for mapping in &map.mappings {
                let target = match (&mapping.target_id, mapping.is_new_object) {
                    (Some(id), _) => id.clone(),
                    (None, true) => "(new)".to_string(),
                    (None, false) => "?".to_string(),
                };
                println!(
                    "  {:<16} {:<10} {:<24} {:<10}",
                    mapping.type_code, mapping.source_id, mapping.source_name, target
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&map)?),
    }
    Ok(())
}

fn run_idtypes(ctx: &DeployContext, key: &str, format: OutputFormat) -> Result<()> {
    let key = DependencyKey::parse(key)
        .with_context(|| format!("Invalid dependency key: {} (expected <type>-<id>)", key))?;
    let Some(id_types) = ctx.id_types().load(&key)? else {
        anyhow::bail!("No id types recorded for {}", key);
    };

    match format {
        OutputFormat::Table => {
            println!("Id types of {}:", key);
            for mapping in &id_types.mappings {
                let kind = match &mapping.id_type {
                    IdType::Undefined => style("undefined".to_string()).yellow(),
                    IdType::Ignore => style("ignore".to_string()).dim(),
                    IdType::Reference { type_code } => style(format!("-> {}", type_code)).green(),
                };
                println!("  {:<32} {:<10} {}", mapping.context, mapping.value, kind);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&id_types)?),
    }
    Ok(())
}
