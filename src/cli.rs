//! CLI argument parsing and command dispatch

pub mod args;
pub mod common;
pub mod decompile;
pub mod init;
pub mod macros;

// Re-export types for convenient access
pub use args::{Cli, ColorChoice, Command, DecompileArgs, OutputFormat};
