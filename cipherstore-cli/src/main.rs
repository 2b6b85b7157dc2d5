//! Main entry point for the cipherstore CLI.
//!
//! Support tooling for the encrypted database:
//! - `status`: Open the database and report its lifecycle state
//! - `check`: Run `PRAGMA quick_check`
//! - `migrations`: List applied migrations
//! - `reset`: Delete the database and its key
//! - `export`: Write a password-protected copy of the key
//! - `show-data-dir`: Print the resolved data directory

use cipherstore_cli::cli::{Cli, Command};
use cipherstore_cli::utils::GlobalOptions;
use clap::Parser;

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let _level = cipherstore::init_logger(cli.verbose, cli.quiet);

    let global = GlobalOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        data_dir: cli.data_dir,
        busy_timeout: cli.busy_timeout,
        keychain: cli.keychain,
    };

    let result = match cli.command {
        Command::Status(cmd) => cmd.execute(&global),
        Command::Check(cmd) => cmd.execute(&global),
        Command::Migrations(cmd) => cmd.execute(&global),
        Command::Reset(cmd) => cmd.execute(&global),
        Command::Export(cmd) => cmd.execute(&global),
        Command::ShowDataDir(cmd) => cmd.execute(&global),
    };

    // Handle errors and set exit code
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
