#![forbid(unsafe_code)]

//! sepolicy-decompile: turn compiled SELinux CIL back into policy source
//!
//! A compiled policy has every m4 macro call expanded into the plain rules it
//! produced. This crate reads the compiled CIL together with the macro
//! definitions and policy sources it was built from, finds the groups of
//! rules that match a macro body, and replaces them with the macro call.
//! What remains is consolidated and printed as `.te` source.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod macros;
pub mod output;
pub mod policy;
pub mod types;

// Re-export error types for convenient access
pub use error::{ConfigError, DecompileError, InvariantViolation, ParseError, ParseErrorKind};

// Re-export core domain types for convenient access
pub use engine::{Decompilation, DecompileReport, Decompiler};
pub use macros::MacroLibrary;
pub use types::{ClassSet, ConditionalType, Rule, RulePart, RuleType};
