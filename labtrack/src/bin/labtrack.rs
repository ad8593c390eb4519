//! labtrack
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use labtrack::mylog::init_log;
use labtrack::utils::print_error_chain;
use labtrack::Cli;
use std::process::ExitCode;

fn inner_main() -> Result<ExitCode> {
    init_log();
    Cli::parse().run()?;
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
