//! CLI command implementations.
//!
//! - `status`: Open the database and show its state
//! - `check`: Run an integrity check
//! - `migrations`: List applied migrations
//! - `reset`: Delete the database files and the key
//! - `export`: Write a password-protected copy of the key
//! - `show_data_dir`: Show resolved data directory path

pub mod check;
pub mod export;
pub mod migrations;
pub mod reset;
pub mod show_data_dir;
pub mod status;

pub use check::CheckCommand;
pub use export::ExportCommand;
pub use migrations::MigrationsCommand;
pub use reset::ResetCommand;
pub use show_data_dir::ShowDataDirCommand;
pub use status::StatusCommand;
