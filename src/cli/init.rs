//! Initialize a decompile configuration
//!
//! Writes a commented decompile.toml describing every input.

use std::fs;
use std::path::Path;

use crate::cli::common::DEFAULT_CONFIG;

/// Default content for decompile.toml
const DEFAULT_DECOMPILE_TOML: &str = r#"[decompile]
version = "1"

# Compiled policy to decompile (files or directories of .cil files)
policy = ["vendor/etc/selinux/vendor_sepolicy.cil"]

# Compiled platform policy; its rules are removed as already known
# platform = ["vendor/etc/selinux/plat_pub_versioned.cil"]

# Version suffix of generated type names (see plat_sepolicy_vers.txt)
# policy_version = "202404"

# Expanded macro files, or directories holding *_macros and ioctl_defines
macros = ["system/sepolicy/public"]

# Policy sources (.te files and context files); their rules are removed as already known
# rules = ["system/sepolicy/vendor"]

# Extra genfs_contexts files
# genfs_contexts = []

# Context files of the compiled policy (vendor_file_contexts, ...), or their directory
# contexts = ["vendor/etc/selinux"]

# Extra source context files
# source_contexts = []

# Class and permission declarations, used to name permission sets
# access_vectors = "system/sepolicy/private/access_vectors"

# Paths skipped while walking input directories
# exclude = ["**/test/**"]

[passes]
# merge_ioctls = true
# merge_typeattributes = true
# replace_perms = true
# replace_ioctls = true
# merge_class_sets = true
# merge_target_domains = false

[output]
format = "human"
"#;

/// Error type for init command
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path error
    #[error("Path error: {0}")]
    Path(String),
}

/// Result of init command
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InitResult {
    /// Files that were created
    pub created: Vec<String>,
    /// Files that were skipped (already existed)
    pub skipped: Vec<String>,
    /// Files that were overwritten
    pub overwritten: Vec<String>,
}

/// Run the init command in the working directory
pub fn run_init(force: bool) -> Result<InitResult, InitError> {
    run_init_in(Path::new("."), force)
}

/// Write decompile.toml into `dir`
///
/// An existing file is kept unless `force` is set.
pub fn run_init_in(dir: &Path, force: bool) -> Result<InitResult, InitError> {
    if !dir.is_dir() {
        return Err(InitError::Path(format!(
            "Path '{}' is not a directory",
            dir.display()
        )));
    }

    let mut result = InitResult::default();
    handle_file(
        &dir.join(DEFAULT_CONFIG),
        DEFAULT_DECOMPILE_TOML,
        force,
        &mut result,
    )?;
    Ok(result)
}

/// Handle creation of a single file
fn handle_file(
    path: &Path,
    content: &str,
    force: bool,
    result: &mut InitResult,
) -> Result<(), InitError> {
    let path_str = path_to_string(path)?;

    if path.exists() {
        if force {
            fs::write(path, content)?;
            result.overwritten.push(path_str);
        } else {
            result.skipped.push(path_str);
        }
    } else {
        fs::write(path, content)?;
        result.created.push(path_str);
    }

    Ok(())
}

/// Convert a path to a string representation
fn path_to_string(path: &Path) -> Result<String, InitError> {
    path.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| InitError::Path(format!("Invalid UTF-8 in path: {:?}", path)))
}
