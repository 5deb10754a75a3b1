use anyhow::Context;
use clap::Parser;
use ybox::engine::Engine;
use ybox_cli::common::{self, CommonOpts};

/// Prints a container's engine-captured logs.
#[derive(Parser, Debug)]
#[command(name = "ybox-logs", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Name of the container whose logs to print.
    name: String,

    /// Keep streaming new log lines instead of exiting once existing output
    /// has been printed.
    #[arg(short, long)]
    follow: bool,
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

fn run(cli: Cli, cancelled: &std::sync::atomic::AtomicBool) -> anyhow::Result<()> {
    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;
    let output = engine
        .logs(&cli.name, cli.follow, cancelled)
        .with_context(|| format!("reading logs for container {:?}", cli.name))?;
    print!("{output}");
    Ok(())
}
