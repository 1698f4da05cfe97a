//! Passhold - a personal credential manager
//!
//! Passwords are encrypted with GnuPG and stored one file per credential,
//! in a directory, an archive or a git repository.

use clap::Parser;
use std::process::ExitCode;

use passhold::cli::{run_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose || std::env::var("PASSHOLD_DEBUG").is_ok() {
        "debug"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run_command(cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31m✗ Error:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}
