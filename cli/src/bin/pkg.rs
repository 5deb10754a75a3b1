use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ybox::engine::ExecResult;
use ybox_cli::common::{self, CommonOpts};

/// Distribution-agnostic package management inside one container.
#[derive(Parser, Debug)]
#[command(name = "ybox-pkg", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Container to operate on.
    container: String,

    #[command(subcommand)]
    command: PkgCommand,
}

#[derive(Subcommand, Debug)]
enum PkgCommand {
    /// Installs a package.
    Install {
        package: String,
        /// Optional dependencies (by name, comma-separated) to pull in
        /// alongside the package.
        #[arg(long = "with-opt-deps", value_delimiter = ',')]
        with_opt_deps: Vec<String>,
    },
    /// Uninstalls a package.
    Uninstall {
        package: String,
        #[arg(long)]
        purge: bool,
        #[arg(long = "keep-deps")]
        keep_deps: bool,
    },
    /// Refreshes package metadata, or a single package if named.
    Update { package: Option<String> },
    /// Lists installed packages.
    List {
        /// Include packages pulled in only as dependencies.
        #[arg(short = 'a', long)]
        all: bool,
        /// List only packages with no remaining dependents.
        #[arg(short = 'o', long)]
        orphans: bool,
        /// Long listing (version, size, etc. as the distribution reports it).
        #[arg(short = 'v', long)]
        verbose: bool,
    },
    /// Lists files owned by a package.
    ListFiles { package: String },
    /// Shows package metadata, or searches the full repository with `-a`.
    Info {
        package: Option<String>,
        #[arg(short = 'a', long)]
        all: bool,
    },
    /// Searches for packages by name/description.
    Search {
        term: String,
        /// Search the full repository instead of installed packages.
        #[arg(short = 'a', long)]
        all: bool,
        /// Match whole words only.
        #[arg(short = 'w', long)]
        word: bool,
    },
    /// Marks a package explicit or as an automatically installed dependency.
    Mark {
        package: String,
        #[arg(short = 'e', long, conflicts_with = "dependency")]
        explicit: bool,
        #[arg(short = 'd', long)]
        dependency: bool,
    },
    /// Removes cached package files.
    Clean,
    /// Repairs one package, or every tracked package with `--extensive`.
    Repair {
        package: Option<String>,
        #[arg(long)]
        extensive: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let cancelled = match common::bootstrap(cli.common.quiet) {
        Ok(flag) => flag,
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(2);
        }
    };
    common::finish(run(cli, &cancelled));
}

fn run(cli: Cli, cancelled: &AtomicBool) -> anyhow::Result<()> {
    let home = common::open_home(cli.common.data_dir.as_deref())?;
    let mut store = home.state_store().context("opening state store")?;

    let record = store
        .container(&cli.container)?
        .filter(|r| !r.destroyed)
        .ok_or_else(|| ybox::Error::ContainerNotFound(cli.container.clone()))?;

    let config_home = common::config_home()?;
    let distro_ini = common::distro_ini_path(&config_home, &record.distribution);
    let placeholders = ybox::config::Placeholders::new();
    let resolved = ybox::config::load_file(&distro_ini, &placeholders)
        .with_context(|| format!("loading distribution {:?}", record.distribution))?;
    let templates = ybox::pkg::Templates::from_resolved(&resolved);

    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;
    let shared_root = (!record.shared_root.is_empty()).then(|| home.shared_root(&record.distribution));
    let wrapper_dirs = common::wrapper_dirs()?;

    let mut orch = ybox::pkg::Orchestrator {
        engine: &engine,
        store: &mut store,
        templates: &templates,
        container: cli.container.clone(),
        shared_root: shared_root.as_ref(),
        wrapper_dirs,
        cancelled,
    };

    match cli.command {
        PkgCommand::Install { package, with_opt_deps } => {
            let outcome = orch
                .install(&package, &with_opt_deps)
                .with_context(|| format!("installing {package:?}"))?;
            if outcome.already_installed {
                log::info!("{package} is already installed");
            } else {
                log::info!("installed {package}");
                for dep in outcome.optional_deps_offered {
                    println!("optional: {} ({})", dep.name, dep.description);
                }
            }
        }
        PkgCommand::Uninstall { package, purge, keep_deps } => {
            orch.uninstall(&package, purge, keep_deps)
                .with_context(|| format!("uninstalling {package:?}"))?;
            log::info!("uninstalled {package}");
        }
        PkgCommand::Update { package } => match &package {
            Some(pkg) => print_output(orch.run_raw("update", &[("pkg", pkg)])?)?,
            None => print_output(orch.run_raw("update_all", &[])?)?,
        },
        PkgCommand::List { all, orphans, verbose } => {
            let name = match (orphans, all, verbose) {
                (true, _, _) => "orphans",
                (false, true, true) => "list_all_long",
                (false, true, false) => "list_all",
                (false, false, true) => "list_long",
                (false, false, false) => "list",
            };
            print_output(orch.run_raw(name, &[])?)?;
        }
        PkgCommand::ListFiles { package } => {
            print_output(orch.run_raw("list_files", &[("pkg", &package)])?)?;
        }
        PkgCommand::Info { package, all } => {
            let name = if all { "info_all" } else { "info" };
            let vars: Vec<(&str, &str)> = package.as_deref().map(|p| vec![("pkg", p)]).unwrap_or_default();
            print_output(orch.run_raw(name, &vars)?)?;
        }
        PkgCommand::Search { term, all, word } => {
            let name = if all { "search_all" } else { "search" };
            let mut vars = vec![("pkg", term.as_str())];
            if word {
                vars.push(("word_start", r"\b"));
                vars.push(("word_end", r"\b"));
            }
            print_output(orch.run_raw(name, &vars)?)?;
        }
        PkgCommand::Mark { package, explicit, dependency } => {
            if !explicit && !dependency {
                anyhow::bail!("mark requires either -e (explicit) or -d (dependency)");
            }
            let mut record = orch
                .store
                .package(&package, &orch.container)?
                .ok_or_else(|| ybox::Error::PackageNotInstalled(package.clone()))?;
            record.explicit = explicit;
            orch.store.record_package(&record, orch.cancelled)?;
        }
        PkgCommand::Clean => {
            print_output(orch.run_raw("clean", &[])?)?;
        }
        PkgCommand::Repair { package, extensive } => {
            if extensive || package.is_none() {
                orch.repair_all().context("repairing all tracked packages")?;
            } else if let Some(package) = package {
                orch.repair(&package).with_context(|| format!("repairing {package:?}"))?;
            }
        }
    }
    Ok(())
}

fn print_output(result: ExecResult) -> anyhow::Result<()> {
    if !result.success() {
        anyhow::bail!(ybox::Error::PackageOpError(result.stderr.trim().to_owned()));
    }
    print!("{}", result.stdout);
    Ok(())
}
