use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use axe::cli::{run_check, run_test, Cli, Command};

fn main() -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_env("AXE_LOG"))
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let ok = match &cli.command {
        Command::Check(args) => run_check(args)?,
        Command::Test(args) => run_test(args)?,
    };

    std::process::exit(if ok { 0 } else { 1 });
}
