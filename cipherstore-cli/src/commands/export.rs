//! Export command implementation.

use crate::error::CliError;
use crate::utils::{open_storage, GlobalOptions};
use clap::Args;

/// Write a password-protected copy of the key next to the database.
#[derive(Args)]
pub struct ExportCommand {
    /// Password protecting the exported key
    #[arg(long, env = "CIPHERSTORE_EXPORT_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl ExportCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        if self.password.is_empty() {
            return Err(CliError::InvalidArguments(
                "password must not be empty".to_string(),
            ));
        }

        let storage = open_storage(global)?;
        let (database, key) = storage.export_encrypted_snapshot(&self.password)?;

        println!("database: {}", database.display());
        println!("key:      {}", key.display());
        Ok(())
    }
}
