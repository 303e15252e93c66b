#![forbid(unsafe_code)]

//! Core domain types for policy rules
//!
//! A [`Rule`] is a rule-type tag, a fixed-arity list of [`RulePart`]s and an
//! unordered set of varargs (permissions, ioctl values, attributes). Identity
//! covers all three; the order of parts matters, the order of varargs does not.

use std::collections::BTreeSet;
use std::fmt;

/// Prefix of the `u:object_r:<type>:s0` label wrapped around genfscon types
pub const GENFSCON_LABEL_START: &str = "u:object_r:";

/// Suffix of the `u:object_r:<type>:s0` label wrapped around genfscon types
pub const GENFSCON_LABEL_END: &str = ":s0";

/// Rule-type tag
///
/// Every known policy statement has its own variant. Rules synthesized from a
/// macro match carry the macro name in [`RuleType::Macro`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    Allow,
    AllowXperm,
    Attribute,
    AuditAllow,
    DontAudit,
    DontAuditXperm,
    ExpandAttribute,
    Genfscon,
    NeverAllow,
    NeverAllowXperm,
    Type,
    TypeTransition,
    TypeAttribute,
    Macro(String),
}

impl RuleType {
    /// Access-vector rule types that decode to `(source, target, class)`
    pub const ALLOW_FAMILY: [RuleType; 4] = [
        RuleType::Allow,
        RuleType::NeverAllow,
        RuleType::AuditAllow,
        RuleType::DontAudit,
    ];

    /// Extended-permission rule types that decode to `(source, target, class, operation)`
    pub const XPERM_FAMILY: [RuleType; 3] = [
        RuleType::AllowXperm,
        RuleType::NeverAllowXperm,
        RuleType::DontAuditXperm,
    ];

    /// Look up a source-syntax keyword
    ///
    /// Returns `None` for anything that is not a known rule keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let rule_type = match keyword {
            "allow" => RuleType::Allow,
            "allowxperm" => RuleType::AllowXperm,
            "attribute" => RuleType::Attribute,
            "auditallow" => RuleType::AuditAllow,
            "dontaudit" => RuleType::DontAudit,
            "dontauditxperm" => RuleType::DontAuditXperm,
            "expandattribute" => RuleType::ExpandAttribute,
            "genfscon" => RuleType::Genfscon,
            "neverallow" => RuleType::NeverAllow,
            "neverallowxperm" => RuleType::NeverAllowXperm,
            "type" => RuleType::Type,
            "type_transition" => RuleType::TypeTransition,
            "typeattribute" => RuleType::TypeAttribute,
            _ => return None,
        };
        Some(rule_type)
    }

    /// Returns the source-syntax keyword, or the macro name for macro calls
    pub fn as_str(&self) -> &str {
        match self {
            RuleType::Allow => "allow",
            RuleType::AllowXperm => "allowxperm",
            RuleType::Attribute => "attribute",
            RuleType::AuditAllow => "auditallow",
            RuleType::DontAudit => "dontaudit",
            RuleType::DontAuditXperm => "dontauditxperm",
            RuleType::ExpandAttribute => "expandattribute",
            RuleType::Genfscon => "genfscon",
            RuleType::NeverAllow => "neverallow",
            RuleType::NeverAllowXperm => "neverallowxperm",
            RuleType::Type => "type",
            RuleType::TypeTransition => "type_transition",
            RuleType::TypeAttribute => "typeattribute",
            RuleType::Macro(name) => name,
        }
    }

    pub fn is_allow(&self) -> bool {
        Self::ALLOW_FAMILY.contains(self)
    }

    pub fn is_xperm(&self) -> bool {
        Self::XPERM_FAMILY.contains(self)
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, RuleType::Macro(_))
    }

    /// Number of positional parts a rule of this type carries
    ///
    /// Macro calls have no fixed arity.
    pub fn arity(&self) -> Option<usize> {
        match self {
            RuleType::Allow | RuleType::NeverAllow | RuleType::AuditAllow | RuleType::DontAudit => {
                Some(3)
            }
            RuleType::AllowXperm | RuleType::NeverAllowXperm | RuleType::DontAuditXperm => Some(4),
            RuleType::TypeTransition => Some(4),
            RuleType::Genfscon => Some(3),
            RuleType::Attribute | RuleType::Type => Some(1),
            RuleType::TypeAttribute | RuleType::ExpandAttribute => Some(2),
            RuleType::Macro(_) => None,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type-set expression: "types in `positive` but not in `negative`", or all types
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionalType {
    pub positive: BTreeSet<String>,
    pub negative: BTreeSet<String>,
    pub is_all: bool,
}

impl ConditionalType {
    pub fn new<P, N>(positive: P, negative: N) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            positive: positive.into_iter().map(Into::into).collect(),
            negative: negative.into_iter().map(Into::into).collect(),
            is_all: false,
        }
    }

    /// The `*` expression
    pub fn all() -> Self {
        Self {
            is_all: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for ConditionalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all {
            return f.write_str("*");
        }

        if !self.positive.is_empty() {
            f.write_str("{")?;
            for t in &self.positive {
                write!(f, " {t}")?;
            }
            for t in &self.negative {
                write!(f, " -{t}")?;
            }
            return f.write_str(" }");
        }

        match self.negative.len() {
            0 => f.write_str("{ }"),
            1 => {
                let only = self.negative.iter().next().map(String::as_str).unwrap_or("");
                write!(f, "~{only}")
            }
            _ => {
                f.write_str("~{")?;
                for t in &self.negative {
                    write!(f, " {t}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

/// Object classes sharing every other field of one rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassSet(pub BTreeSet<String>);

impl ClassSet {
    pub fn new<I>(classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        ClassSet(classes.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return f.write_str(self.iter().next().unwrap_or(""));
        }
        write!(f, "{{ {} }}", self.iter().collect::<Vec<_>>().join(" "))
    }
}

/// One positional part of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RulePart {
    /// A plain name, possibly containing `$N` placeholders in templates
    Literal(String),
    /// A type-set expression
    TypeExpr(ConditionalType),
    /// A merged set of classes
    ClassSet(ClassSet),
    /// A compiler-generated type name whose expression is not known yet
    ///
    /// Only exists between decoding and type resolution.
    Unresolved(String),
}

impl RulePart {
    pub fn literal(s: impl Into<String>) -> Self {
        RulePart::Literal(s.into())
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            RulePart::Literal(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for RulePart {
    fn from(s: &str) -> Self {
        RulePart::Literal(s.to_string())
    }
}

impl From<String> for RulePart {
    fn from(s: String) -> Self {
        RulePart::Literal(s)
    }
}

impl From<ConditionalType> for RulePart {
    fn from(ct: ConditionalType) -> Self {
        RulePart::TypeExpr(ct)
    }
}

impl From<ClassSet> for RulePart {
    fn from(cs: ClassSet) -> Self {
        RulePart::ClassSet(cs)
    }
}

impl fmt::Display for RulePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePart::Literal(s) | RulePart::Unresolved(s) => f.write_str(s),
            RulePart::TypeExpr(ct) => ct.fmt(f),
            RulePart::ClassSet(cs) => cs.fmt(f),
        }
    }
}

/// One slot of a rule's index key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKey {
    Type(RuleType),
    Part(RulePart),
    Varargs(BTreeSet<String>),
}

/// A policy rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rule {
    pub rule_type: RuleType,
    pub parts: Vec<RulePart>,
    pub varargs: BTreeSet<String>,
}

impl Rule {
    pub fn new<I>(rule_type: RuleType, parts: Vec<RulePart>, varargs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            rule_type,
            parts,
            varargs: varargs.into_iter().map(Into::into).collect(),
        }
    }

    /// A synthetic macro-call rule
    pub fn macro_call(name: impl Into<String>, args: Vec<RulePart>) -> Self {
        Self {
            rule_type: RuleType::Macro(name.into()),
            parts: args,
            varargs: BTreeSet::new(),
        }
    }

    pub fn is_macro(&self) -> bool {
        self.rule_type.is_macro()
    }

    /// Index key: the rule type, every part, then the varargs set
    pub fn index_keys(&self) -> Vec<RuleKey> {
        let mut keys = Vec::with_capacity(self.parts.len() + 2);
        keys.push(RuleKey::Type(self.rule_type.clone()));
        keys.extend(self.parts.iter().cloned().map(RuleKey::Part));
        keys.push(RuleKey::Varargs(self.varargs.clone()));
        keys
    }

    /// Output ordering: type declarations first, then macro calls, then the rest
    pub fn sort_key(&self) -> (u8, Vec<String>) {
        let order = if self.rule_type == RuleType::Type {
            0
        } else if self.is_macro() {
            1
        } else {
            2
        };

        let mut values = Vec::with_capacity(self.parts.len() + 2);
        values.push(self.rule_type.to_string());
        values.extend(self.parts.iter().map(ToString::to_string));
        values.push(self.varargs.iter().cloned().collect::<Vec<_>>().join(" "));

        (order, values)
    }
}

fn join_varargs(varargs: &BTreeSet<String>) -> String {
    let joined = varargs.iter().cloned().collect::<Vec<_>>().join(" ");
    if varargs.len() > 1 {
        format!("{{ {joined} }}")
    } else {
        joined
    }
}

fn join_parts(parts: &[RulePart], separator: &str) -> String {
    parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rt = &self.rule_type;
        match (rt, self.parts.as_slice()) {
            (RuleType::Macro(name), parts) => write!(f, "{name}({})", join_parts(parts, ", ")),
            (_, [src, dst, class]) if rt.is_allow() => {
                write!(f, "{rt} {src} {dst}:{class} {};", join_varargs(&self.varargs))
            }
            (_, [src, dst, class, op]) if rt.is_xperm() => {
                write!(
                    f,
                    "{rt} {src} {dst}:{class} {op} {};",
                    join_varargs(&self.varargs)
                )
            }
            (RuleType::Type, [t]) => {
                if self.varargs.is_empty() {
                    write!(f, "type {t};")
                } else {
                    let attrs = self.varargs.iter().cloned().collect::<Vec<_>>().join(", ");
                    write!(f, "type {t}, {attrs};")
                }
            }
            (RuleType::TypeTransition, [src, dst, class, default]) => {
                let name = self
                    .varargs
                    .iter()
                    .next()
                    .map(|n| format!(" {n}"))
                    .unwrap_or_default();
                write!(f, "type_transition {src} {dst}:{class} {default}{name};")
            }
            (RuleType::Genfscon, [fs, path, context]) => {
                write!(
                    f,
                    "genfscon {fs} {path} {GENFSCON_LABEL_START}{context}{GENFSCON_LABEL_END}"
                )
            }
            (_, parts) => write!(f, "{rt} {};", join_parts(parts, " ")),
        }
    }
}
