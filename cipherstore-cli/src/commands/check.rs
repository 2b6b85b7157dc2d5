//! Check command implementation.
//!
//! Runs `PRAGMA quick_check` through a read transaction. Any result other
//! than a single `ok` row is a semantic failure.

use crate::error::CliError;
use crate::utils::{open_storage, GlobalOptions};
use clap::Args;

/// Run an integrity check on the database.
#[derive(Args)]
pub struct CheckCommand {
    /// Run the full `integrity_check` instead of `quick_check`
    #[arg(long)]
    pub full: bool,
}

impl CheckCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        let storage = open_storage(global)?;
        let pragma = if self.full {
            "PRAGMA integrity_check"
        } else {
            "PRAGMA quick_check"
        };

        let problems: Vec<String> = storage.try_read(|conn| {
            let mut stmt = conn.prepare(pragma)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        if problems.len() == 1 && problems[0] == "ok" {
            if !global.quiet {
                println!("ok");
            }
            return Ok(());
        }
        for problem in &problems {
            println!("{problem}");
        }
        Err(CliError::SemanticFailure(format!(
            "integrity check reported {} problem(s)",
            problems.len()
        )))
    }
}
