use std::process::Command;

use anyhow::Context;
use clap::Parser;
use ybox_cli::common::{self, CommonOpts};

/// Execs a command inside a running container with stdio inherited directly
/// from the caller. This is the trampoline wrapper-generated `.desktop`
/// files and exec shims invoke; unlike [`ybox::engine::Engine::exec`], which
/// captures output for package templates, an interactive GUI/CLI program
/// needs its stdio passed through untouched.
#[derive(Parser, Debug)]
#[command(name = "ybox-cmd", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Name of the container to exec into.
    container: String,

    /// Command and arguments to run inside the container.
    #[arg(last = true, required = true)]
    command: Vec<String>,
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
    let result = run(cli);
    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => common::finish(Err(err)),
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let binary = ybox::engine::detect_engine().context("locating container engine")?;
    let status = Command::new(binary)
        .arg("exec")
        .arg("-it")
        .arg(&cli.container)
        .args(&cli.command)
        .status()
        .with_context(|| format!("exec into container {:?}", cli.container))?;
    Ok(status.code().unwrap_or(2))
}
