//! Benchmark harness comparing a baseline agent toolchain against an
//! augmented one over a corpus of task fixtures.
//!
//! Runs each task under both modes in isolated workspaces, verifies the
//! outcome, aggregates a scorecard, and tunes pass/fail thresholds from
//! historical results.

mod cli;
mod config;
mod executor;
mod harness;
mod io;
mod logging;
mod results;
mod scheduler;
mod scorecard;
mod stats;
mod task;
mod tune;
mod verify;
mod workspace;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cli::cmd_run(&args),
        Command::Scorecard(args) => {
            let overall = cli::cmd_scorecard(&args)?;
            if args.enforce_thresholds && !overall {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Tune(args) => cli::cmd_tune(&args),
    }
}
