//! Parsing and validation for decompile.toml configuration files

use crate::error::ConfigError;
use crate::policy::resolver::GENERATED_TYPE_PREFIX;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration struct for decompile.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Input locations
    pub decompile: DecompileSection,

    /// Consolidation passes to run after macro replacement
    #[serde(default)]
    pub passes: PassesConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.decompile.version != "1" {
            return Err(ConfigError::Validation(format!(
                "Unsupported configuration version '{}'. Expected '1'",
                self.decompile.version
            )));
        }

        if self.decompile.policy.is_empty() {
            return Err(ConfigError::Validation(
                "No policy files configured. Add the compiled CIL to decompile.policy.".to_string(),
            ));
        }

        if self.decompile.macros.is_empty() {
            return Err(ConfigError::Validation(
                "No macro sources configured. Add macro files or directories to decompile.macros."
                    .to_string(),
            ));
        }

        if let Some(version) = &self.decompile.policy_version
            && (version.is_empty() || version.contains(char::is_whitespace))
        {
            return Err(ConfigError::InvalidValue {
                field: "decompile.policy_version".to_string(),
                message: format!("'{version}' is not a policy version"),
            });
        }

        if self.decompile.generated_type_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "decompile.generated_type_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        // Validate glob patterns by attempting to compile them with globset
        for pattern in &self.decompile.exclude {
            globset::Glob::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid exclude glob pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }

    /// Resolve relative input paths against `base`
    ///
    /// Paths in a config file are relative to the file, not to the working
    /// directory.
    pub fn rebase(mut self, base: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        let section = &mut self.decompile;
        section.policy.iter_mut().for_each(join);
        section.platform.iter_mut().for_each(join);
        section.macros.iter_mut().for_each(join);
        section.rules.iter_mut().for_each(join);
        section.genfs_contexts.iter_mut().for_each(join);
        section.contexts.iter_mut().for_each(join);
        section.source_contexts.iter_mut().for_each(join);
        section.access_vectors.iter_mut().for_each(join);
        self
    }
}

/// Input section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompileSection {
    /// Configuration version (must be "1")
    pub version: String,

    /// Compiled CIL files to decompile
    pub policy: Vec<PathBuf>,

    /// Compiled platform CIL whose rules are already known
    #[serde(default)]
    pub platform: Vec<PathBuf>,

    /// Version suffix carried by generated type names, e.g. "202404"
    #[serde(default)]
    pub policy_version: Option<String>,

    /// Macro definition files or directories
    #[serde(default)]
    pub macros: Vec<PathBuf>,

    /// Policy source files or directories whose rules are already known
    #[serde(default)]
    pub rules: Vec<PathBuf>,

    /// Source genfs_contexts files
    #[serde(default)]
    pub genfs_contexts: Vec<PathBuf>,

    /// Context files of the compiled policy, or directories holding them
    #[serde(default)]
    pub contexts: Vec<PathBuf>,

    /// Extra source context files, or directories holding them
    #[serde(default)]
    pub source_contexts: Vec<PathBuf>,

    /// Class and permission declarations
    #[serde(default)]
    pub access_vectors: Option<PathBuf>,

    /// Name prefix of compiler-generated type attributes
    #[serde(default = "default_generated_type_prefix")]
    pub generated_type_prefix: String,

    /// Paths skipped while walking input directories
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_generated_type_prefix() -> String {
    GENERATED_TYPE_PREFIX.to_string()
}

/// Consolidation pass toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassesConfig {
    /// Collapse xperm rules differing in one ioctl value
    pub merge_ioctls: bool,

    /// Fold `typeattribute` facts into `type` declarations
    pub merge_typeattributes: bool,

    /// Name permission sets after permission macros
    pub replace_perms: bool,

    /// Name ioctl sets after ioctl macros and defines
    pub replace_ioctls: bool,

    /// Collapse rules differing only in class
    pub merge_class_sets: bool,

    /// Collapse rules differing only in target
    pub merge_target_domains: bool,
}

impl Default for PassesConfig {
    fn default() -> Self {
        Self {
            merge_ioctls: true,
            merge_typeattributes: true,
            replace_perms: true,
            replace_ioctls: true,
            merge_class_sets: true,
            merge_target_domains: false,
        }
    }
}

/// Output configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (human or jsonl)
    #[serde(default)]
    pub format: OutputFormat,

    /// Color output option
    #[serde(default)]
    pub color: ColorOption,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Human,
            color: ColorOption::Auto,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Policy text
    #[default]
    Human,
    /// JSON Lines format
    Jsonl,
}

/// Color output options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorOption {
    /// Auto-detect based on terminal capabilities
    #[default]
    Auto,
    /// Always use color
    Always,
    /// Never use color
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
[decompile]
version = "1"
policy = ["vendor/etc/selinux/vendor_sepolicy.cil"]
platform = ["vendor/etc/selinux/plat_pub_versioned.cil"]
policy_version = "202404"
macros = ["system/sepolicy/public"]
rules = ["system/sepolicy/vendor"]
access_vectors = "system/sepolicy/private/access_vectors"
contexts = ["vendor/etc/selinux"]
exclude = ["**/test/**"]

[passes]
merge_target_domains = true
replace_ioctls = false

[output]
format = "jsonl"
color = "never"
"#;

    #[test]
    fn test_valid_config_parsing() {
        let config = Config::parse(VALID_CONFIG).unwrap();

        assert_eq!(config.decompile.version, "1");
        assert_eq!(config.decompile.policy.len(), 1);
        assert_eq!(config.decompile.platform.len(), 1);
        assert_eq!(config.decompile.policy_version.as_deref(), Some("202404"));
        assert_eq!(config.decompile.generated_type_prefix, "base_typeattr_");
        assert_eq!(
            config.decompile.access_vectors,
            Some(PathBuf::from("system/sepolicy/private/access_vectors"))
        );

        assert!(config.passes.merge_target_domains);
        assert!(!config.passes.replace_ioctls);
        assert!(config.passes.merge_class_sets);

        assert_eq!(config.output.format, OutputFormat::Jsonl);
        assert_eq!(config.output.color, ColorOption::Never);
    }

    #[test]
    fn test_minimal_config() {
        let minimal = r#"
[decompile]
version = "1"
policy = ["a.cil"]
macros = ["te_macros"]
"#;

        let config = Config::parse(minimal).unwrap();
        assert!(config.decompile.platform.is_empty());
        assert!(config.decompile.contexts.is_empty());
        assert!(config.decompile.source_contexts.is_empty());
        assert_eq!(config.passes, PassesConfig::default());
        assert_eq!(config.output, OutputConfig::default());
    }

    #[test]
    fn test_invalid_version() {
        let config = r#"
[decompile]
version = "2"
policy = ["a.cil"]
macros = ["te_macros"]
"#;
        let err = Config::parse(config).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("Unsupported configuration version"));
    }

    #[test]
    fn test_missing_policy() {
        let config = r#"
[decompile]
version = "1"
policy = []
macros = ["te_macros"]
"#;
        assert!(matches!(Config::parse(config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_glob() {
        let config = r#"
[decompile]
version = "1"
policy = ["a.cil"]
macros = ["te_macros"]
exclude = ["[invalid"]
"#;
        let err = Config::parse(config).unwrap_err();
        assert!(err.to_string().contains("Invalid exclude glob pattern"));
    }

    #[test]
    fn test_invalid_policy_version() {
        let config = r#"
[decompile]
version = "1"
policy = ["a.cil"]
macros = ["te_macros"]
policy_version = "20 24"
"#;
        assert!(matches!(
            Config::parse(config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_syntax_error() {
        let err = Config::parse("[decompile\nversion = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rebase_joins_relative_paths() {
        let config = Config::parse(VALID_CONFIG)
            .unwrap()
            .rebase(Path::new("/dump"));
        assert_eq!(
            config.decompile.policy[0],
            PathBuf::from("/dump/vendor/etc/selinux/vendor_sepolicy.cil")
        );
        assert_eq!(
            config.decompile.access_vectors,
            Some(PathBuf::from("/dump/system/sepolicy/private/access_vectors"))
        );
        assert_eq!(
            config.decompile.contexts,
            vec![PathBuf::from("/dump/vendor/etc/selinux")]
        );
    }
}
