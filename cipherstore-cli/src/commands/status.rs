//! Status command implementation.
//!
//! Configures the handle and prints where the database lives, whether it
//! opened, which of its files exist and how many migrations it has seen.

use crate::error::CliError;
use crate::utils::{build_storage, shorten_path, GlobalOptions};
use cipherstore::migration::applied_migrations;
use clap::Args;
use serde::Serialize;

/// Open the database and show its state.
#[derive(Args)]
pub struct StatusCommand {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Status {
    data_dir: String,
    database: String,
    state: String,
    valid: bool,
    startup_error: Option<String>,
    files: Vec<FileStatus>,
    applied_migrations: Option<usize>,
}

#[derive(Serialize)]
struct FileStatus {
    path: String,
    exists: bool,
}

impl StatusCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        let storage = build_storage(global)?;
        let configured = storage.configure();

        let applied_migrations = if configured.is_ok() {
            Some(storage.try_read(|conn| applied_migrations(conn))?.len())
        } else {
            None
        };
        let startup_error = storage.startup_error();

        let status = Status {
            data_dir: storage.config().data_dir.display().to_string(),
            database: storage.database_path().display().to_string(),
            state: storage.state().to_string(),
            valid: storage.is_valid(),
            startup_error: startup_error.as_ref().map(ToString::to_string),
            files: storage
                .file_paths()
                .all()
                .iter()
                .map(|path| FileStatus {
                    path: shorten_path(path),
                    exists: path.exists(),
                })
                .collect(),
            applied_migrations,
        };

        if self.json {
            let json = serde_json::to_string_pretty(&status)
                .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
            println!("{json}");
        } else {
            print_human(&status);
        }

        match startup_error {
            Some(cause) => Err(CliError::from_startup(&cause)),
            None => Ok(()),
        }
    }
}

fn print_human(status: &Status) {
    println!("data dir:  {}", status.data_dir);
    println!("database:  {}", status.database);
    println!("state:     {}", status.state);
    if let Some(error) = &status.startup_error {
        println!("error:     {error}");
    }
    for file in &status.files {
        let marker = if file.exists { "present" } else { "missing" };
        println!("file:      {} ({marker})", file.path);
    }
    if let Some(count) = status.applied_migrations {
        println!("migrations applied: {count}");
    }
}
