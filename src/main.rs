//! Entry point: banner, configuration, crawl, error trace.

use airwalk::config::{CliArgs, Config, APPLICATION_NAME};
use airwalk::crawler::Crawler;
use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn show_banner() {
    println!(
        "{} V{}",
        APPLICATION_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!("AX.25/NET-ROM network discovery tool");
    println!();
}

fn main() -> ExitCode {
    show_banner();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Innermost causes last, matching the chain top-down.
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let config = Config::from_args(args).context("invalid configuration")?;

    let mut crawler = Crawler::new(config).context("opening crawler state")?;
    crawler
        .run(std::io::stdin().lock())
        .context("crawl failed")?;
    Ok(())
}
