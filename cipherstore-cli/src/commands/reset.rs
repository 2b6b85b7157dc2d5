//! Reset command implementation.
//!
//! Deletes the database, its WAL/SHM files and the key. The next open
//! starts from an empty database with a fresh key.

use crate::error::CliError;
use crate::utils::{build_storage, GlobalOptions};
use clap::Args;

/// Delete the database files and the key.
#[derive(Args)]
pub struct ResetCommand {
    /// Confirm that all data should be destroyed
    #[arg(long)]
    pub yes: bool,
}

impl ResetCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        if !self.yes {
            return Err(CliError::InvalidArguments(
                "reset destroys all data; pass --yes to confirm".to_string(),
            ));
        }

        let storage = build_storage(global)?;
        storage.reset_all_storage();

        if let Some(path) = storage.file_paths().existing().first() {
            return Err(CliError::SemanticFailure(format!(
                "could not remove {}",
                path.display()
            )));
        }
        if !global.quiet {
            eprintln!("Removed database at {}", storage.database_path().display());
        }
        Ok(())
    }
}
