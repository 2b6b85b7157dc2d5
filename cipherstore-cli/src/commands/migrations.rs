//! Migrations command implementation.

use crate::error::CliError;
use crate::utils::{format_timestamp, open_storage, GlobalOptions};
use cipherstore::migration::applied_migrations;
use clap::Args;

/// List applied migrations.
#[derive(Args)]
pub struct MigrationsCommand {
    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,
}

impl MigrationsCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        let storage = open_storage(global)?;
        let applied = storage.try_read(|conn| applied_migrations(conn))?;

        if self.json {
            let json = serde_json::to_string_pretty(&applied)
                .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
            println!("{json}");
            return Ok(());
        }

        if applied.is_empty() {
            if !global.quiet {
                eprintln!("No migrations applied");
            }
            return Ok(());
        }
        println!("APPLIED_AT\tKEY");
        for migration in &applied {
            println!("{}\t{}", format_timestamp(migration.applied_at), migration.key);
        }
        Ok(())
    }
}
