//! CLI structure and command definitions.
//!
//! This module defines the main CLI structure using clap's derive macros,
//! including global options and subcommands.

use crate::commands::{
    CheckCommand, ExportCommand, MigrationsCommand, ResetCommand, ShowDataDirCommand,
    StatusCommand,
};
use crate::utils::KeychainKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect, check and reset a cipherstore database.
#[derive(Parser)]
#[command(name = "cipherstore")]
#[command(version, about = "Inspect, check and reset a cipherstore database", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Override the data directory location
    #[arg(long, value_name = "PATH", global = true, env = "CIPHERSTORE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Override the busy timeout (in seconds)
    #[arg(long, value_name = "SECONDS", global = true)]
    pub busy_timeout: Option<u64>,

    /// Where the database key is kept
    #[arg(
        long,
        value_enum,
        global = true,
        default_value = "system",
        env = "CIPHERSTORE_KEYCHAIN"
    )]
    pub keychain: KeychainKind,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Command {
    /// Open the database and show its state
    Status(StatusCommand),

    /// Run an integrity check on the database
    Check(CheckCommand),

    /// List applied migrations
    Migrations(MigrationsCommand),

    /// Delete the database files and the key
    Reset(ResetCommand),

    /// Write a password-protected copy of the key next to the database
    Export(ExportCommand),

    /// Show the resolved data directory path
    ShowDataDir(ShowDataDirCommand),
}
