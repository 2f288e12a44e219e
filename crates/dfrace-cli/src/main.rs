//! # dfrace CLI
//!
//! Drives the double-fetch race harness against a file-range target.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dfrace_config::logging::{init_logging, LogLevel};
use dfrace_config::{log_cli_error, Config};

mod race;

use race::RaceArgs;

/// dfrace - double-fetch race trigger harness
#[derive(Parser)]
#[command(name = "dfrace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Entries in the request's variable-length tail (the valid count)
    #[arg(value_name = "ELEMENTS")]
    elements: usize,

    /// Value the mutator writes into the count field during the window
    #[arg(value_name = "OVERFLOW")]
    overflow: u16,

    /// Number of race iterations
    #[arg(value_name = "ITERATIONS")]
    iterations: u64,

    /// Starting calibration delay in microseconds
    #[arg(value_name = "DELAY_US")]
    initial_delay_us: u64,

    /// Config file layered over ~/.dfrace/config.toml and .dfrace/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    init_logging(LogLevel::Warn);

    let cli = Cli::parse();
    let config = Config::load_with(cli.config.as_deref()).context("Failed to load configuration")?;

    let args = RaceArgs {
        elements: cli.elements,
        overflow: cli.overflow,
        iterations: cli.iterations,
        initial_delay_us: cli.initial_delay_us,
    };

    match race::execute(&args, &config) {
        Ok(report) => {
            race::print_report(&report);
            Ok(())
        }
        Err(e) => {
            log_cli_error!("Race aborted", error = tracing::field::display(&e));
            Err(e)
        }
    }
}
