//! CLI argument parsing using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for decompile commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Policy source text
    Human,
    /// JSON Lines format (one JSON object per line)
    Jsonl,
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Automatically detect if terminal supports color
    Auto,
    /// Always use color
    Always,
    /// Never use color
    Never,
}

/// sepolicy-decompile CLI main entry point
#[derive(Parser, Debug)]
#[command(name = "sepolicy-decompile")]
#[command(about = "Reconstruct SELinux policy macro calls from compiled CIL")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Output coloring
    #[arg(long, global = true)]
    pub color: Option<ColorChoice>,

    /// Log every pass in detail (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decompile a compiled policy into macro calls and rules
    Decompile(DecompileArgs),

    /// Write a commented decompile.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the macros and named groups found in macro sources
    Macros {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Macro files or directories (replaces the configured ones)
        #[arg(short, long = "macros")]
        macros: Vec<PathBuf>,

        /// Class and permission declarations
        #[arg(long)]
        access_vectors: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "human")]
        format: OutputFormat,
    },
}

/// Inputs and overrides of the decompile command
///
/// Lists given on the command line replace the configured lists.
#[derive(Args, Debug, Clone, Default)]
pub struct DecompileArgs {
    /// Configuration file (defaults to ./decompile.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Compiled CIL files or directories to decompile
    #[arg(short, long = "policy")]
    pub policy: Vec<PathBuf>,

    /// Compiled platform CIL whose rules are already known
    #[arg(long = "platform")]
    pub platform: Vec<PathBuf>,

    /// Macro files or directories
    #[arg(short, long = "macros")]
    pub macros: Vec<PathBuf>,

    /// Policy source files or directories whose rules are already known
    #[arg(short, long = "rules")]
    pub rules: Vec<PathBuf>,

    /// Source genfs_contexts files
    #[arg(long = "genfs-contexts")]
    pub genfs_contexts: Vec<PathBuf>,

    /// Context files of the compiled policy, or directories holding them
    #[arg(long = "contexts")]
    pub contexts: Vec<PathBuf>,

    /// Extra source context files, or directories holding them
    #[arg(long = "source-contexts")]
    pub source_contexts: Vec<PathBuf>,

    /// Class and permission declarations
    #[arg(long)]
    pub access_vectors: Option<PathBuf>,

    /// Version suffix of generated type names, e.g. 202404
    #[arg(long)]
    pub policy_version: Option<String>,

    /// Also merge rules differing only in target
    #[arg(long)]
    pub merge_target_domains: bool,

    /// Skip every consolidation pass
    #[arg(long, conflicts_with = "merge_target_domains")]
    pub no_consolidate: bool,

    /// Output format
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// Write the decompiled policy here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
