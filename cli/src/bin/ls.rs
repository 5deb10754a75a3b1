use anyhow::Context;
use clap::Parser;
use ybox_cli::common::{self, CommonOpts};
use ybox_cli::logger::style_bool;

/// Lists containers known to the state store, with their live status.
#[derive(Parser, Debug)]
#[command(name = "ybox-ls", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

fn main() {
    let cli = Cli::parse();
    let _cancelled = match common::bootstrap(cli.common.quiet) {
        Ok(flag) => flag,
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(2);
        }
    };
    common::finish(run(cli));
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let home = common::open_home(cli.common.data_dir.as_deref())?;
    let store = home.state_store().context("opening state store")?;
    let engine = ybox::engine::ProcessEngine::detect().context("locating container engine")?;

    let mut containers = store.list_containers().context("listing containers")?;
    containers.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{:<24} {:<12} {:<10} destroyed", "NAME", "DISTRIBUTION", "STATE");
    for record in containers {
        let container = ybox::Container::new(&engine, home.data_dir(), &record.name);
        let state = container.state(&store).unwrap_or(ybox::container::ContainerState::Absent);
        println!(
            "{:<24} {:<12} {:<10} {}",
            record.name,
            record.distribution,
            format!("{:?}", state),
            style_bool(record.destroyed),
        );
    }
    Ok(())
}
