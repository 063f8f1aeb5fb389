//! museforge CLI
//!
//! ```bash
//! museforge ./data
//! ```

use clap::Parser;
use museforge::cli::{run, Cli};
use museforge::logging::init_tracing;
use std::process::ExitCode;

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
