//! Decompile command implementation
//!
//! This module implements the `decompile` command, which:
//! - Merges command-line inputs over decompile.toml
//! - Reads and decodes the policy, macro and source inputs
//! - Runs the matching and consolidation passes
//! - Writes the decompiled policy (human or JSONL)
//! - Prints a summary of the run to stderr

use std::fs;
use std::io::{self, Write};

use tracing::warn;

use crate::cli::args::{ColorChoice, DecompileArgs};
use crate::cli::common::{EXIT_SUCCESS, color_choice, decompile_config, exit_code};
use crate::config::OutputFormat;
use crate::error::DecompileError;
use crate::input::loader;
use crate::output::{HumanFormatter, JsonlFormatter};

/// Run the decompile command
///
/// # Returns
///
/// Exit code:
/// - 0: Success
/// - 2: Error (configuration, I/O or matching error)
/// - 3: Parse error (malformed configuration or policy input)
pub fn run_decompile(args: &DecompileArgs, color: Option<ColorChoice>) -> i32 {
    match run_decompile_inner(args, color) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code(&e)
        }
    }
}

fn run_decompile_inner(args: &DecompileArgs, color: Option<ColorChoice>) -> Result<(), DecompileError> {
    let config = decompile_config(args)?;

    let inputs = loader::load(&config.decompile)?;
    if !inputs.unresolved_types.is_empty() {
        warn!(
            "{} generated types are never defined and stay as names",
            inputs.unresolved_types.len()
        );
    }

    let result = inputs.into_decompiler(config.passes).run()?;

    let formatter = HumanFormatter::new(color_choice(color, config.output.color));
    let text = match config.output.format {
        OutputFormat::Human => formatter.format(&result),
        OutputFormat::Jsonl => JsonlFormatter::new().format(&result),
    };

    match &args.output {
        Some(path) => fs::write(path, text)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }

    // The JSONL stream carries its own summary record
    if config.output.format == OutputFormat::Human {
        formatter.print_summary(&result.report)?;
    }

    Ok(())
}
