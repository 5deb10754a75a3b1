use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ybox_cli::common::{self, CommonOpts};

/// Starts, stops, or restarts an existing container.
#[derive(Parser, Debug)]
#[command(name = "ybox-control", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Name of the container to control.
    name: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
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
    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;
    let container = ybox::Container::new(&engine, home.data_dir(), &cli.name);

    match cli.action {
        Action::Start => container.start(cancelled).context("starting container")?,
        Action::Stop => container.stop().context("stopping container")?,
        Action::Restart => container.restart(cancelled).context("restarting container")?,
    }
    log::info!("{:?} {} done", cli.action, cli.name);
    Ok(())
}
