//! Macro library loading
//!
//! Reads expanded `define(`name', `body')` blocks and sorts them into rule
//! templates, named permission / class / ioctl groups and ioctl defines.
//! Template bodies are decoded with the source-syntax decoder, so `$N`
//! placeholders survive as literal text inside rule parts.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{ParseError, ParseErrorKind};
use crate::policy::cil::parse_hex;
use crate::policy::classmap::Classmap;
use crate::policy::significant_lines;
use crate::policy::source::{call_statement, parse_statement, split_statements};
use crate::policy::tokenizer::{UnpackOptions, flatten, unpack};
use crate::types::Rule;

const MACRO_START: &str = "define(`";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([1-9][0-9]*)").expect("valid regex"));

/// One `define` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub name: String,
    pub body: String,
    pub line: usize,
}

/// What a definition is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    Rules,
    ClassSet,
    Perms,
    Ioctls,
    IoctlDefine,
}

impl MacroDefinition {
    /// Categorize by body and name
    pub fn kind(&self) -> MacroKind {
        if self.body.starts_with("0x") {
            MacroKind::IoctlDefine
        } else if self.name.contains("_class_set") {
            MacroKind::ClassSet
        } else if self.name.contains("_perms") {
            MacroKind::Perms
        } else if self.name.contains("_ioctls") {
            MacroKind::Ioctls
        } else {
            MacroKind::Rules
        }
    }

    /// Highest `$N` used in the body
    pub fn arity(&self) -> usize {
        PLACEHOLDER
            .captures_iter(&self.body)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .max()
            .unwrap_or(0)
    }
}

/// A macro whose body is a list of rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroTemplate {
    pub name: String,
    pub arity: usize,
    pub rules: Vec<Rule>,
}

/// A named set of permissions, classes or ioctl values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedGroup {
    pub name: String,
    pub members: BTreeSet<String>,
}

impl NamedGroup {
    pub fn new<I>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Every macro the matcher and group passes can use
#[derive(Debug, Clone, Default)]
pub struct MacroLibrary {
    pub templates: Vec<MacroTemplate>,
    pub class_sets: Vec<NamedGroup>,
    /// Sorted largest first
    pub perms: Vec<NamedGroup>,
    pub ioctls: Vec<NamedGroup>,
    /// Ioctl value to define name
    pub ioctl_defines: BTreeMap<String, String>,
}

/// Split text into top-level `define` blocks
pub fn split_definitions(text: &str, source_name: &str) -> Result<Vec<MacroDefinition>, ParseError> {
    let mut definitions = Vec::new();
    let mut level: i32 = 0;
    let mut block = String::new();
    let mut block_line = 0;

    for (line, content) in significant_lines(text) {
        if level == 0 {
            if !content.starts_with(MACRO_START) {
                continue;
            }
            block_line = line;
        }

        for c in content.chars().chain(std::iter::once('\n')) {
            let last_level = level;
            match c {
                '(' | '`' => level += 1,
                ')' | '\'' => level -= 1,
                _ => {}
            }

            block.push(c);

            if level == 0 && last_level != 0 {
                let definition = name_body(block.trim())
                    .map_err(|kind| ParseError::new(source_name, block_line, kind))?;
                definitions.push(MacroDefinition {
                    line: block_line,
                    ..definition
                });
                block.clear();
                break;
            }
        }
    }

    if level != 0 {
        return Err(ParseError::new(
            source_name,
            block_line,
            ParseErrorKind::shape("define", "unterminated definition"),
        ));
    }

    Ok(definitions)
}

/// `define(`name', `body')` to its name and normalized body
fn name_body(block: &str) -> Result<MacroDefinition, ParseErrorKind> {
    let inner = block
        .strip_prefix(MACRO_START)
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| ParseErrorKind::shape("define", "expected define(`name', ...)"))?;
    let (name, rest) = inner
        .split_once('\'')
        .ok_or_else(|| ParseErrorKind::shape("define", "unterminated macro name"))?;
    let body = rest
        .trim_start()
        .strip_prefix(',')
        .ok_or_else(|| ParseErrorKind::shape("define", format!("missing body for '{name}'")))?
        .trim();
    let body = body
        .strip_prefix('`')
        .and_then(|b| b.strip_suffix('\''))
        .unwrap_or(body);

    let squashed = body.split_whitespace().collect::<Vec<_>>().join(" ");

    Ok(MacroDefinition {
        name: name.to_string(),
        body: squashed.replace("; ", ";\n"),
        line: 0,
    })
}

fn group_members(body: &str) -> Result<Vec<String>, ParseErrorKind> {
    let tokens = unpack(body, &UnpackOptions::SOURCE_WORDS)?;
    Ok(flatten(&tokens).into_iter().map(str::to_string).collect())
}

fn ioctl_members(body: &str) -> Result<BTreeSet<String>, ParseErrorKind> {
    let mut values = BTreeSet::new();
    for member in group_members(body)? {
        match member.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_hex(start)?, parse_hex(end)?);
                values.extend((start..=end).map(|n| format!("{n:#x}")));
            }
            None => {
                values.insert(format!("{:#x}", parse_hex(&member)?));
            }
        }
    }
    Ok(values)
}

/// Decode a rule macro body
///
/// Call statements (m4 branches and unexpanded macro calls) are dropped.
fn template_rules(
    definition: &MacroDefinition,
    classmap: Option<&Classmap>,
) -> Result<Vec<Rule>, ParseErrorKind> {
    let lines = definition.body.lines().enumerate().map(|(i, l)| (i + 1, l));
    let statements = split_statements(lines).map_err(|(_, kind)| kind)?;

    let mut seen = HashSet::new();
    let mut rules = Vec::new();
    for statement in statements {
        if let Some((call, _)) = call_statement(&statement.text) {
            warn!(
                "Macro {}: dropping '{}(...)' statement that cannot be matched",
                definition.name, call
            );
            continue;
        }

        for rule in parse_statement(&statement.text, classmap)? {
            if seen.insert(rule.clone()) {
                rules.push(rule);
            }
        }
    }
    Ok(rules)
}

impl MacroLibrary {
    /// Parse every `define` block of an expanded macro file
    pub fn parse(text: &str, source_name: &str, classmap: Option<&Classmap>) -> Result<Self, ParseError> {
        let definitions = split_definitions(text, source_name)?;
        Ok(Self::from_definitions(definitions, classmap))
    }

    /// Categorize and decode definitions
    ///
    /// Empty and undecodable macros are skipped with a warning.
    pub fn from_definitions(definitions: Vec<MacroDefinition>, classmap: Option<&Classmap>) -> Self {
        let mut library = MacroLibrary::default();
        let mut empty = HashSet::new();
        let mut invalid = BTreeSet::new();
        let mut unique_templates = HashSet::new();
        let mut duplicate_defines = HashSet::new();

        for definition in definitions {
            if definition.body.is_empty() {
                if empty.insert(definition.name.clone()) {
                    warn!("Empty macro {}", definition.name);
                }
                continue;
            }

            let kind = definition.kind();
            match kind {
                MacroKind::IoctlDefine => {
                    let value = match parse_hex(&definition.body) {
                        Ok(n) => format!("{n:#x}"),
                        Err(e) => {
                            warn!("Invalid ioctl define {}: {}", definition.name, e);
                            continue;
                        }
                    };
                    match library.ioctl_defines.get(&value) {
                        None => {
                            library.ioctl_defines.insert(value, definition.name);
                        }
                        Some(existing) if *existing == definition.name => {}
                        Some(existing) => {
                            if duplicate_defines.insert(value.clone()) {
                                warn!(
                                    "Ioctl {}={} already defined as {}",
                                    definition.name, value, existing
                                );
                            }
                        }
                    }
                }
                MacroKind::ClassSet | MacroKind::Perms => match group_members(&definition.body) {
                    Ok(members) => {
                        let group = NamedGroup::new(definition.name, members);
                        if kind == MacroKind::ClassSet {
                            library.class_sets.push(group);
                        } else {
                            library.perms.push(group);
                        }
                    }
                    Err(e) => {
                        warn!("Invalid macro {}: {}", definition.name, e);
                    }
                },
                MacroKind::Ioctls => match ioctl_members(&definition.body) {
                    Ok(members) => library.ioctls.push(NamedGroup {
                        name: definition.name,
                        members,
                    }),
                    Err(e) => warn!("Invalid macro {}: {}", definition.name, e),
                },
                MacroKind::Rules => match template_rules(&definition, classmap) {
                    Ok(rules) if rules.is_empty() => {
                        debug!("Macro {} has no matchable rules", definition.name);
                    }
                    Ok(rules) => {
                        let identity: BTreeSet<Rule> = rules.iter().cloned().collect();
                        if !unique_templates.insert((definition.name.clone(), identity)) {
                            continue;
                        }
                        if library.templates.iter().any(|t| t.name == definition.name) {
                            debug!("Macro {} has multiple variants", definition.name);
                        }
                        library.templates.push(MacroTemplate {
                            arity: definition.arity(),
                            name: definition.name,
                            rules,
                        });
                    }
                    Err(e) => {
                        debug!("Macro {} cannot be decoded: {}", definition.name, e);
                        invalid.insert(definition.name);
                    }
                },
            }
        }

        for name in &invalid {
            warn!("Invalid macro {}", name);
        }

        library
            .perms
            .sort_by(|a, b| b.members.len().cmp(&a.members.len()));

        library
    }

    /// Merge another library into this one
    pub fn extend(&mut self, other: MacroLibrary) {
        self.templates.extend(other.templates);
        self.class_sets.extend(other.class_sets);
        self.perms.extend(other.perms);
        self.perms
            .sort_by(|a, b| b.members.len().cmp(&a.members.len()));
        self.ioctls.extend(other.ioctls);
        for (value, name) in other.ioctl_defines {
            self.ioctl_defines.entry(value).or_insert(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
            && self.class_sets.is_empty()
            && self.perms.is_empty()
            && self.ioctls.is_empty()
            && self.ioctl_defines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RulePart, RuleType};

    const MACROS: &str = "\
# te_macros
define(`r_file_perms', `{ getattr open read ioctl lock map watch watch_reads }')
define(`rw_file_perms', `{ getattr open read ioctl lock map watch watch_reads write append }')
define(`dir_file_class_set', `{ file lnk_file }')
define(`TCGETS', `0x00005401')
define(`tty_ioctls', `{ 0x5401-0x5402 }')
define(`empty_macro', `')
define(`empty_macro', `')
define(`binder_call', `
allow $1 $2:binder { call transfer };
allow $2 $1:binder transfer;
allow $1 $2:fd use;
')
define(`broken', `
frob $1;
')
";

    #[test]
    fn test_split_definitions() {
        let definitions = split_definitions(MACROS, "te_macros").unwrap();
        assert_eq!(definitions.len(), 9);
        assert_eq!(definitions[0].name, "r_file_perms");
        assert_eq!(definitions[0].line, 2);
        assert_eq!(
            definitions[7].body,
            "allow $1 $2:binder { call transfer };\nallow $2 $1:binder transfer;\nallow $1 $2:fd use;"
        );
    }

    #[test]
    fn test_categorize() {
        let definitions = split_definitions(MACROS, "te_macros").unwrap();
        let kinds: Vec<_> = definitions.iter().map(MacroDefinition::kind).collect();
        assert_eq!(kinds[0], MacroKind::Perms);
        assert_eq!(kinds[2], MacroKind::ClassSet);
        assert_eq!(kinds[3], MacroKind::IoctlDefine);
        assert_eq!(kinds[4], MacroKind::Ioctls);
        assert_eq!(kinds[7], MacroKind::Rules);
        assert_eq!(definitions[7].arity(), 2);
    }

    #[test]
    fn test_library_contents() {
        let library = MacroLibrary::parse(MACROS, "te_macros", None).unwrap();

        assert_eq!(library.templates.len(), 1);
        let template = &library.templates[0];
        assert_eq!(template.name, "binder_call");
        assert_eq!(template.arity, 2);
        assert_eq!(template.rules.len(), 3);
        assert_eq!(
            template.rules[0],
            Rule::new(
                RuleType::Allow,
                vec![
                    RulePart::literal("$1"),
                    RulePart::literal("$2"),
                    RulePart::literal("binder")
                ],
                ["call", "transfer"]
            )
        );

        assert_eq!(library.perms[0].name, "rw_file_perms");
        assert_eq!(library.class_sets[0].members.len(), 2);
        assert_eq!(library.ioctl_defines.get("0x5401").map(String::as_str), Some("TCGETS"));
        assert_eq!(
            library.ioctls[0].members.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["0x5401", "0x5402"]
        );
    }

    #[test]
    fn test_duplicate_variants_are_deduplicated() {
        let text = "define(`m', `allow $1 x:file read;')\ndefine(`m', `allow $1 x:file read;')\n";
        let library = MacroLibrary::parse(text, "m", None).unwrap();
        assert_eq!(library.templates.len(), 1);
    }

    #[test]
    fn test_branch_statements_are_dropped() {
        let text = "define(`m', `allow $1 x:file read; ifelse(`$2', `', `', `allow $1 $2:file write;')')\n";
        let library = MacroLibrary::parse(text, "m", None).unwrap();
        assert_eq!(library.templates[0].rules.len(), 1);
    }

    #[test]
    fn test_unterminated_definition() {
        let err = split_definitions("define(`m', `allow a b:file read;'\n", "m").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
