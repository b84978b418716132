use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod catalog;
mod cli;
mod config;
mod error;
mod gateway;
mod runner;
mod summary;
mod verify;
mod workflow;

use cli::{Command, RootArgs};

/// At least one step or check failed; the run itself completed.
const EXIT_PARTIAL: u8 = 1;
/// Login, configuration, or catalog errors; nothing (more) was attempted.
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    let verbose = match &args.command {
        Command::Run(run) => run.output.verbose,
        Command::Verify(verify) => verify.output.verbose,
        Command::Catalog(_) => false,
    };
    init_tracing(verbose);

    let result = match args.command {
        Command::Run(args) => workflow::run_provision(args).map(|summary| summary.has_failures()),
        Command::Verify(args) => workflow::run_verify(args).map(|summary| summary.has_failures()),
        Command::Catalog(args) => workflow::run_catalog(args).map(|()| false),
    };
    match result {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(EXIT_PARTIAL),
        Err(err) => {
            eprintln!("❌ {err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("erp_bootstrap=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
