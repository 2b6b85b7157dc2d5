//! Library exports for cipherstore-cli.
//!
//! The binary in `main.rs` is a thin wrapper; everything lives here so the
//! command structure can be reused by tests and documentation tooling.

pub mod cli;
pub mod commands;
pub mod error;
pub mod utils;

pub use cli::Cli;
