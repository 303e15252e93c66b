//! Common helper functions shared across CLI commands
//!
//! This module provides shared functionality for locating and loading the
//! configuration and for merging command-line overrides into it.

use crate::cli::args::{ColorChoice, DecompileArgs, OutputFormat};
use crate::config::{self, ColorOption, Config, DecompileSection, PassesConfig};
use crate::error::{ConfigError, DecompileError};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// Process exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 2;
pub const EXIT_PARSE_ERROR: i32 = 3;

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG: &str = "decompile.toml";

/// Exit code for an error
///
/// Malformed configuration or policy input gets its own code.
pub(crate) fn exit_code(error: &DecompileError) -> i32 {
    match error {
        DecompileError::Parse(_) | DecompileError::Config(ConfigError::Parse(_)) => {
            EXIT_PARSE_ERROR
        }
        _ => EXIT_ERROR,
    }
}

/// Load the configuration file, if there is one
///
/// An explicit path must exist. Without one, `./decompile.toml` is used when
/// present. Relative input paths are resolved against the file's directory.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Option<Config>, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                return Ok(None);
            }
            default
        }
    };

    let config = Config::load(&path)?;
    let base = path.parent().unwrap_or(Path::new(""));
    Ok(Some(config.rebase(base)))
}

fn replace_if_given<T: Clone>(target: &mut Vec<T>, given: &[T]) {
    if !given.is_empty() {
        *target = given.to_vec();
    }
}

/// Merge command-line inputs over the configuration file
///
/// Without a configuration file the command line must name the policy and
/// the macro sources.
pub(crate) fn decompile_config(args: &DecompileArgs) -> Result<Config, ConfigError> {
    let mut config = load_config(args.config.as_deref())?.unwrap_or_else(|| Config {
        decompile: DecompileSection {
            version: "1".to_string(),
            policy: Vec::new(),
            platform: Vec::new(),
            policy_version: None,
            macros: Vec::new(),
            rules: Vec::new(),
            genfs_contexts: Vec::new(),
            contexts: Vec::new(),
            source_contexts: Vec::new(),
            access_vectors: None,
            generated_type_prefix: crate::policy::resolver::GENERATED_TYPE_PREFIX.to_string(),
            exclude: Vec::new(),
        },
        passes: PassesConfig::default(),
        output: config::OutputConfig::default(),
    });

    let section = &mut config.decompile;
    replace_if_given(&mut section.policy, &args.policy);
    replace_if_given(&mut section.platform, &args.platform);
    replace_if_given(&mut section.macros, &args.macros);
    replace_if_given(&mut section.rules, &args.rules);
    replace_if_given(&mut section.genfs_contexts, &args.genfs_contexts);
    replace_if_given(&mut section.contexts, &args.contexts);
    replace_if_given(&mut section.source_contexts, &args.source_contexts);
    if let Some(path) = &args.access_vectors {
        section.access_vectors = Some(path.clone());
    }
    if let Some(version) = &args.policy_version {
        section.policy_version = Some(version.clone());
    }

    if args.no_consolidate {
        config.passes = PassesConfig {
            merge_ioctls: false,
            merge_typeattributes: false,
            replace_perms: false,
            replace_ioctls: false,
            merge_class_sets: false,
            merge_target_domains: false,
        };
    } else if args.merge_target_domains {
        config.passes.merge_target_domains = true;
    }

    if let Some(format) = args.format {
        config.output.format = match format {
            OutputFormat::Human => config::OutputFormat::Human,
            OutputFormat::Jsonl => config::OutputFormat::Jsonl,
        };
    }

    config.validate()?;
    Ok(config)
}

/// Resolve the effective color choice for termcolor
///
/// The command line wins over the configuration. `auto` colors only a
/// terminal stderr.
pub(crate) fn color_choice(cli: Option<ColorChoice>, configured: ColorOption) -> termcolor::ColorChoice {
    let option = match cli {
        Some(ColorChoice::Auto) => ColorOption::Auto,
        Some(ColorChoice::Always) => ColorOption::Always,
        Some(ColorChoice::Never) => ColorOption::Never,
        None => configured,
    };
    match option {
        ColorOption::Always => termcolor::ColorChoice::Always,
        ColorOption::Never => termcolor::ColorChoice::Never,
        ColorOption::Auto if std::io::stderr().is_terminal() => termcolor::ColorChoice::Auto,
        ColorOption::Auto => termcolor::ColorChoice::Never,
    }
}
