//! sepolicy-decompile CLI entry point

use clap::Parser;
use sepolicy_decompile::cli::common::{EXIT_ERROR, EXIT_SUCCESS};
use sepolicy_decompile::cli::{Command, args::Cli};
use std::process;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match cli.command {
        Command::Init { force } => match sepolicy_decompile::cli::init::run_init(force) {
            Ok(result) => {
                for path in &result.created {
                    println!("Created {}. Point it at your policy and macro sources.", path);
                }
                for path in &result.overwritten {
                    println!("Overwrote {}.", path);
                }
                for path in &result.skipped {
                    println!("{} already exists; use --force to overwrite it.", path);
                }
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                EXIT_ERROR
            }
        },
        Command::Decompile(args) => {
            sepolicy_decompile::cli::decompile::run_decompile(&args, cli.color)
        }
        Command::Macros {
            config,
            macros,
            access_vectors,
            format,
        } => sepolicy_decompile::cli::macros::run_macros(
            config.as_deref(),
            &macros,
            access_vectors.as_deref(),
            format,
        ),
    };

    process::exit(exit_code);
}
