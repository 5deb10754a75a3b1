use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;
use ybox_cli::common::{self, CommonOpts};

/// Tears down a container, tombstoning its row if packages remain in a
/// shared root.
#[derive(Parser, Debug)]
#[command(name = "ybox-destroy", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Name of the container to destroy.
    name: String,

    /// Also remove the on-disk HOME/logs/scripts tree even if the container
    /// is tombstoned (packages remain attributed to the tombstone).
    #[arg(short, long)]
    force: bool,
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
    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;
    let container = ybox::Container::new(&engine, home.data_dir(), &cli.name);

    container
        .destroy(&mut store, cli.force, cancelled)
        .with_context(|| format!("destroying container {:?}", cli.name))?;
    log::info!("destroyed container {}", cli.name);
    Ok(())
}
