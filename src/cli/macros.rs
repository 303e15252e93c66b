//! Macros command implementation
//!
//! Lists what the matcher will work with: every rule template with its arity
//! and size, and the named permission, class and ioctl groups.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::cli::common::{EXIT_SUCCESS, exit_code, load_config};
use crate::error::{ConfigError, DecompileError};
use crate::input::file_walker::{InputKind, resolve_inputs};
use crate::input::loader::{load_classmap, load_definitions};
use crate::macros::{MacroLibrary, NamedGroup};

/// Run the macros command
///
/// # Returns
///
/// Exit code:
/// - 0: Success
/// - 2: Error
/// - 3: Parse error
pub fn run_macros(
    config: Option<&Path>,
    macros: &[PathBuf],
    access_vectors: Option<&Path>,
    format: OutputFormat,
) -> i32 {
    match run_macros_inner(config, macros, access_vectors) {
        Ok(library) => {
            let output = match format {
                OutputFormat::Human => format_human(&library),
                OutputFormat::Jsonl => format_jsonl(&library),
            };
            print!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code(&e)
        }
    }
}

fn run_macros_inner(
    config: Option<&Path>,
    macros: &[PathBuf],
    access_vectors: Option<&Path>,
) -> Result<MacroLibrary, DecompileError> {
    let section = load_config(config)?.map(|config| config.decompile);

    let (macro_paths, exclude) = match (&section, macros.is_empty()) {
        (_, false) => (macros.to_vec(), Vec::new()),
        (Some(section), true) => (section.macros.clone(), section.exclude.clone()),
        (None, true) => {
            return Err(ConfigError::Validation(
                "no macro sources given; pass --macros or write a decompile.toml".to_string(),
            )
            .into());
        }
    };
    let access_vectors = access_vectors
        .map(Path::to_path_buf)
        .or_else(|| section.and_then(|s| s.access_vectors));

    let classmap = access_vectors.as_deref().map(load_classmap).transpose()?;
    let files = resolve_inputs(&macro_paths, InputKind::Macros, &exclude)?;
    let definitions = load_definitions(&files)?;
    Ok(MacroLibrary::from_definitions(definitions, classmap.as_ref()))
}

fn push_groups(output: &mut String, heading: &str, groups: &[NamedGroup]) {
    if groups.is_empty() {
        return;
    }
    output.push_str(&format!("\n{} ({}):\n", heading, groups.len()));
    for group in groups {
        output.push_str(&format!("  {} ({})\n", group.name, group.members.len()));
    }
}

/// One line per template, then one section per group kind
fn format_human(library: &MacroLibrary) -> String {
    let mut output = String::new();

    let name_width = library
        .templates
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);
    output.push_str(&format!("Templates ({}):\n", library.templates.len()));
    for template in &library.templates {
        output.push_str(&format!(
            "  {:<width$}  {} args  {} rules\n",
            template.name,
            template.arity,
            template.rules.len(),
            width = name_width
        ));
    }

    push_groups(&mut output, "Permission sets", &library.perms);
    push_groups(&mut output, "Class sets", &library.class_sets);
    push_groups(&mut output, "Ioctl sets", &library.ioctls);
    if !library.ioctl_defines.is_empty() {
        output.push_str(&format!(
            "\nIoctl defines: {}\n",
            library.ioctl_defines.len()
        ));
    }

    output
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MacroRecord<'a> {
    Template {
        name: &'a str,
        arity: usize,
        rules: Vec<String>,
    },
    Perms {
        name: &'a str,
        members: Vec<&'a str>,
    },
    ClassSet {
        name: &'a str,
        members: Vec<&'a str>,
    },
    Ioctls {
        name: &'a str,
        members: Vec<&'a str>,
    },
    IoctlDefine {
        name: &'a str,
        value: &'a str,
    },
}

fn members(group: &NamedGroup) -> Vec<&str> {
    group.members.iter().map(String::as_str).collect()
}

fn format_jsonl(library: &MacroLibrary) -> String {
    let templates = library.templates.iter().map(|t| MacroRecord::Template {
        name: &t.name,
        arity: t.arity,
        rules: t.rules.iter().map(ToString::to_string).collect(),
    });
    let perms = library.perms.iter().map(|g| MacroRecord::Perms {
        name: &g.name,
        members: members(g),
    });
    let class_sets = library.class_sets.iter().map(|g| MacroRecord::ClassSet {
        name: &g.name,
        members: members(g),
    });
    let ioctls = library.ioctls.iter().map(|g| MacroRecord::Ioctls {
        name: &g.name,
        members: members(g),
    });
    let defines = library
        .ioctl_defines
        .iter()
        .map(|(value, name)| MacroRecord::IoctlDefine { name, value });

    let mut output = String::new();
    for record in templates
        .chain(perms)
        .chain(class_sets)
        .chain(ioctls)
        .chain(defines)
    {
        if let Ok(json) = serde_json::to_string(&record) {
            output.push_str(&json);
            output.push('\n');
        }
    }
    output
}
