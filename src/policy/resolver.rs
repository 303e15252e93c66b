//! Type-name normalization and generated-type resolution
//!
//! Compiled policies replace inline type expressions with generated
//! attribute names (`base_typeattr_12`) and suffix public types with the
//! policy version (`foo_30_0`). Decoders strip the suffix through a
//! [`TypeNaming`] and leave generated names as [`RulePart::Unresolved`];
//! the [`TypeResolver`] then swaps them for the expressions collected from
//! every decoded file.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::error::ParseErrorKind;
use crate::types::{ConditionalType, Rule, RulePart};

/// Default prefix of compiler-generated attribute names
pub const GENERATED_TYPE_PREFIX: &str = "base_typeattr_";

/// Naming conventions of the compiled policy
pub trait TypeNaming: Send + Sync {
    /// Strip any version decoration from a type name
    fn normalize<'a>(&self, name: &'a str) -> &'a str;

    /// Whether the name was generated by the policy compiler
    fn is_generated(&self, name: &str) -> bool;
}

/// Version-suffix and generated-prefix naming
#[derive(Debug, Clone)]
pub struct VersionedNaming {
    suffix: Option<String>,
    generated_prefix: String,
}

impl VersionedNaming {
    /// `policy_version` `30.0` strips the suffix `_30_0`
    pub fn new(policy_version: Option<&str>) -> Self {
        Self {
            suffix: policy_version.map(|v| format!("_{}", v.replace('.', "_"))),
            generated_prefix: GENERATED_TYPE_PREFIX.to_string(),
        }
    }

    pub fn with_generated_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.generated_prefix = prefix.into();
        self
    }
}

impl Default for VersionedNaming {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TypeNaming for VersionedNaming {
    fn normalize<'a>(&self, name: &'a str) -> &'a str {
        match &self.suffix {
            Some(suffix) => name.strip_suffix(suffix.as_str()).unwrap_or(name),
            None => name,
        }
    }

    fn is_generated(&self, name: &str) -> bool {
        name.starts_with(&self.generated_prefix)
    }
}

/// Map of generated type names to the expressions they stand for
#[derive(Debug, Default)]
pub struct TypeResolver {
    definitions: HashMap<String, ConditionalType>,
    unresolved: BTreeSet<String>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a generated type
    ///
    /// Redefining a name with the same expression is accepted.
    pub fn define(&mut self, name: String, expr: ConditionalType) -> Result<(), ParseErrorKind> {
        match self.definitions.get(&name) {
            Some(existing) if *existing != expr => Err(ParseErrorKind::DuplicateDefinition(name)),
            Some(_) => Ok(()),
            None => {
                self.definitions.insert(name, expr);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&ConditionalType> {
        self.definitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Names that were referenced but never defined
    pub fn unresolved_names(&self) -> impl Iterator<Item = &str> {
        self.unresolved.iter().map(String::as_str)
    }

    /// Replace an unresolved part with its expression
    ///
    /// Undefined names degrade to literals, with one warning per name.
    pub fn resolve_part(&mut self, part: RulePart) -> RulePart {
        let RulePart::Unresolved(name) = part else {
            return part;
        };

        if let Some(expr) = self.definitions.get(&name) {
            return RulePart::TypeExpr(expr.clone());
        }

        if self.unresolved.insert(name.clone()) {
            warn!("Generated type '{}' has no definition; keeping the name", name);
        }
        RulePart::Literal(name)
    }

    pub fn resolve_rule(&mut self, rule: Rule) -> Rule {
        let Rule {
            rule_type,
            parts,
            varargs,
        } = rule;
        let parts = parts.into_iter().map(|p| self.resolve_part(p)).collect();
        Rule {
            rule_type,
            parts,
            varargs,
        }
    }

    pub fn resolve_all(&mut self, rules: Vec<Rule>) -> Vec<Rule> {
        rules.into_iter().map(|r| self.resolve_rule(r)).collect()
    }
}
