use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;
use ybox_cli::common::{self, CommonOpts};

/// Creates a new ybox container from a distribution and profile.
#[derive(Parser, Debug)]
#[command(name = "ybox-create", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Name of the container to create.
    name: String,

    /// Distribution id, selecting `distros/<id>/distro.ini`.
    #[arg(short, long)]
    distribution: String,

    /// Profile name, selecting `profiles/<name>.ini`.
    #[arg(short, long, default_value = "basic")]
    profile: String,

    /// Bind-mount a `SHARED_ROOTS/<distribution>` tree shared with other
    /// containers of this distribution instead of a private root.
    #[arg(long)]
    shared_root: bool,
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
    let config_home = common::config_home()?;
    let distro_ini = common::distro_ini_path(&config_home, &cli.distribution);
    let profile_ini = common::profile_ini_path(&config_home, &cli.profile);
    let overrides = common::overrides_ini_path(&config_home);

    let mut placeholders = ybox::config::Placeholders::new();
    if let Ok(home_env) = std::env::var("HOME") {
        placeholders.set("HOME", home_env);
    }
    if let Ok(user) = std::env::var("USER") {
        placeholders.set("USER", user);
    }
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        placeholders.set("XDG_RUNTIME_DIR", xdg_runtime);
    }
    placeholders.set("XDG_DATA_HOME", home.data_dir().display().to_string());
    placeholders.set("XDG_CONFIG_HOME", config_home.display().to_string());
    placeholders.set("CONTAINER_NAME", &cli.name);

    let resolved = ybox::config::load_profile(&distro_ini, overrides.as_deref(), &profile_ini, &placeholders)
        .with_context(|| format!("loading profile {:?} for distribution {:?}", cli.profile, cli.distribution))?;

    let mut store = home.state_store().context("opening state store")?;
    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;
    let container = ybox::Container::new(&engine, home.data_dir(), &cli.name);

    let shared_root = cli.shared_root.then(|| home.shared_root(&cli.distribution));
    let user = (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw());
    let mut opts = ybox::container::CreateOptions::new(&cli.distribution, &resolved, user);
    opts.shared_root = shared_root.as_ref();

    container
        .create(&mut store, &opts, cancelled)
        .with_context(|| format!("creating container {:?}", cli.name))?;
    log::info!("created container {}", cli.name);
    Ok(())
}
