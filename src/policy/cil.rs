//! Compiled CIL decoder
//!
//! Each line of a compiled policy is one parenthesized statement. Statements
//! without a source-level counterpart (roles, users, class declarations, ...)
//! are skipped. Generated attribute definitions are collected separately so
//! that they can be resolved across every decoded file.

use tracing::{debug, warn};

use crate::error::{ParseError, ParseErrorKind};
use crate::policy::resolver::TypeNaming;
use crate::policy::tokenizer::{Token, UnpackOptions, flatten_token, unpack};
use crate::types::{ConditionalType, Rule, RulePart, RuleType};

/// CIL statements that never map to a source rule
const IGNORED_TAGS: &[&str] = &[
    "category",
    "categoryorder",
    "class",
    "classcommon",
    "classorder",
    "common",
    "fsuse",
    "handleunknown",
    "mls",
    "mlsconstrain",
    "policycap",
    "role",
    "roleattribute",
    "roletype",
    "sensitivity",
    "sensitivitycategory",
    "sensitivityorder",
    "sid",
    "sidcontext",
    "sidorder",
    "type",
    "typealias",
    "typealiasactual",
    "typepermissive",
    "user",
    "userlevel",
    "userrange",
    "userrole",
];

/// A compiler-generated attribute and the expression it stands for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedType {
    pub name: String,
    pub expr: ConditionalType,
    pub line: usize,
}

/// Everything decoded from one CIL file
#[derive(Debug, Default)]
pub struct CilPolicy {
    /// Policy rules, generated types still unresolved
    pub rules: Vec<Rule>,
    /// `genfscon` labels
    pub genfs: Vec<Rule>,
    pub definitions: Vec<GeneratedType>,
}

impl CilPolicy {
    pub fn extend(&mut self, other: CilPolicy) {
        self.rules.extend(other.rules);
        self.genfs.extend(other.genfs);
        self.definitions.extend(other.definitions);
    }
}

/// Decode a whole CIL file
pub fn parse_cil(
    text: &str,
    source_name: &str,
    naming: &dyn TypeNaming,
) -> Result<CilPolicy, ParseError> {
    let mut policy = CilPolicy::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        decode_statement(line, index + 1, naming, &mut policy)
            .map_err(|kind| ParseError::new(source_name, index + 1, kind))?;
    }

    debug!(
        "{}: {} rules, {} genfscon, {} generated types",
        source_name,
        policy.rules.len(),
        policy.genfs.len(),
        policy.definitions.len()
    );

    Ok(policy)
}

fn atom<'a>(tokens: &'a [Token], index: usize, tag: &str) -> Result<&'a str, ParseErrorKind> {
    tokens
        .get(index)
        .and_then(Token::as_atom)
        .ok_or_else(|| ParseErrorKind::shape(tag, format!("field {index} must be a name")))
}

fn group<'a>(tokens: &'a [Token], index: usize, tag: &str) -> Result<&'a [Token], ParseErrorKind> {
    tokens
        .get(index)
        .and_then(Token::as_group)
        .ok_or_else(|| ParseErrorKind::shape(tag, format!("field {index} must be a group")))
}

fn type_part(name: &str, naming: &dyn TypeNaming) -> RulePart {
    let name = naming.normalize(name);
    if naming.is_generated(name) {
        RulePart::Unresolved(name.to_string())
    } else {
        RulePart::Literal(name.to_string())
    }
}

/// `allow X Y (process (sigchld))` comes from a parameter-dependent branch
fn is_process_sigchld(tokens: &[Token]) -> bool {
    let [_, _, _, Token::Group(class_perms)] = tokens else {
        return false;
    };
    match class_perms.as_slice() {
        [class, Token::Group(perms)] => {
            class.is_atom("process") && perms.len() == 1 && perms[0].is_atom("sigchld")
        }
        _ => false,
    }
}

fn decode_statement(
    line: &str,
    line_number: usize,
    naming: &dyn TypeNaming,
    policy: &mut CilPolicy,
) -> Result<(), ParseErrorKind> {
    let tokens = unpack(line, &UnpackOptions::CIL)?;
    let Some(first) = tokens.first() else {
        return Ok(());
    };
    let tag = first
        .as_atom()
        .ok_or_else(|| ParseErrorKind::shape("", "statement must start with a tag"))?;

    if IGNORED_TAGS.contains(&tag) {
        return Ok(());
    }

    if tag == "allow" && is_process_sigchld(&tokens) {
        return Ok(());
    }

    match tag {
        "allow" | "neverallow" | "auditallow" | "dontaudit" => {
            // (allow a b (class (perm ...)))
            if tokens.len() != 4 {
                return Err(ParseErrorKind::arity(tag, "4", tokens.len()));
            }
            let rule_type = RuleType::from_keyword(tag).ok_or_else(|| ParseErrorKind::UnknownTag(tag.to_string()))?;
            let class_perms = group(&tokens, 3, tag)?;
            let class = atom(class_perms, 0, tag)?;
            let perms = group(class_perms, 1, tag)?;
            let perms = perms
                .iter()
                .map(|p| p.as_atom().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| ParseErrorKind::shape(tag, "permissions must be names"))?;

            policy.rules.push(Rule::new(
                rule_type,
                vec![
                    type_part(atom(&tokens, 1, tag)?, naming),
                    type_part(atom(&tokens, 2, tag)?, naming),
                    RulePart::literal(class),
                ],
                perms,
            ));
        }
        "allowx" | "neverallowx" | "dontauditx" => {
            // (allowx a b (ioctl class (value (range lo hi) ...)))
            if tokens.len() != 4 {
                return Err(ParseErrorKind::arity(tag, "4", tokens.len()));
            }
            let rule_type = match tag {
                "allowx" => RuleType::AllowXperm,
                "neverallowx" => RuleType::NeverAllowXperm,
                _ => RuleType::DontAuditXperm,
            };
            let xperm = group(&tokens, 3, tag)?;
            if xperm.len() != 3 {
                return Err(ParseErrorKind::shape(tag, "expected (operation class (values))"));
            }
            let operation = atom(xperm, 0, tag)?;
            let class = atom(xperm, 1, tag)?;
            let values = unpack_ioctls(group(xperm, 2, tag)?)?;

            policy.rules.push(Rule::new(
                rule_type,
                vec![
                    type_part(atom(&tokens, 1, tag)?, naming),
                    type_part(atom(&tokens, 2, tag)?, naming),
                    RulePart::literal(class),
                    RulePart::literal(operation),
                ],
                values,
            ));
        }
        "typeattribute" => {
            // Source `attribute` statements compile to `typeattribute`
            if tokens.len() != 2 {
                return Err(ParseErrorKind::arity(tag, "2", tokens.len()));
            }
            let name = atom(&tokens, 1, tag)?;
            if naming.is_generated(name) {
                return Ok(());
            }
            policy.rules.push(Rule::new(
                RuleType::Attribute,
                vec![RulePart::literal(naming.normalize(name))],
                Vec::<String>::new(),
            ));
        }
        "typeattributeset" => {
            if tokens.len() != 3 {
                return Err(ParseErrorKind::arity(tag, "3", tokens.len()));
            }
            let name = naming.normalize(atom(&tokens, 1, tag)?);
            let members = group(&tokens, 2, tag)?;

            if is_conditional_expression(members) {
                match conditional_type(members, naming) {
                    Some(expr) => policy.definitions.push(GeneratedType {
                        name: name.to_string(),
                        expr,
                        line: line_number,
                    }),
                    None => warn!("Ignored conditional type for '{}': {}", name, line),
                }
                return Ok(());
            }

            // Source `typeattribute T a` and `type T, a` compile into the member list of `a`
            for member in members {
                let member = member
                    .as_atom()
                    .ok_or_else(|| ParseErrorKind::shape(tag, "members must be names"))?;
                policy.rules.push(Rule::new(
                    RuleType::TypeAttribute,
                    vec![
                        RulePart::literal(naming.normalize(member)),
                        RulePart::literal(name),
                    ],
                    Vec::<String>::new(),
                ));
            }
        }
        "genfscon" => {
            // (genfscon sysfs /kernel/aov (u object_r sysfs_aov ((s0) (s0))))
            if tokens.len() != 4 {
                return Err(ParseErrorKind::arity(tag, "4", tokens.len()));
            }
            let fs = atom(&tokens, 1, tag)?;
            let path = atom(&tokens, 2, tag)?;
            let path = path
                .strip_prefix('"')
                .and_then(|p| p.strip_suffix('"'))
                .unwrap_or(path);
            let context = atom(group(&tokens, 3, tag)?, 2, tag)?;

            policy.genfs.push(Rule::new(
                RuleType::Genfscon,
                vec![fs.into(), path.into(), context.into()],
                Vec::<String>::new(),
            ));
        }
        "typetransition" => {
            // (typetransition a b class default)
            // (typetransition a b class "name" default)
            if !(5..=6).contains(&tokens.len()) {
                return Err(ParseErrorKind::arity(tag, "5 or 6", tokens.len()));
            }
            let name = if tokens.len() == 6 {
                vec![atom(&tokens, 4, tag)?.to_string()]
            } else {
                Vec::new()
            };

            policy.rules.push(Rule::new(
                RuleType::TypeTransition,
                vec![
                    type_part(atom(&tokens, 1, tag)?, naming),
                    type_part(atom(&tokens, 2, tag)?, naming),
                    RulePart::literal(atom(&tokens, 3, tag)?),
                    RulePart::literal(naming.normalize(atom(&tokens, tokens.len() - 1, tag)?)),
                ],
                name,
            ));
        }
        "expandtypeattribute" => {
            // (expandtypeattribute (a) true)
            if tokens.len() != 3 {
                return Err(ParseErrorKind::arity(tag, "3", tokens.len()));
            }
            let names = group(&tokens, 1, tag)?;
            let [Token::Atom(attribute)] = names else {
                return Err(ParseErrorKind::shape(tag, "expected a single attribute"));
            };
            let value = atom(&tokens, 2, tag)?;

            policy.rules.push(Rule::new(
                RuleType::ExpandAttribute,
                vec![
                    RulePart::literal(naming.normalize(attribute)),
                    RulePart::literal(value),
                ],
                Vec::<String>::new(),
            ));
        }
        other => return Err(ParseErrorKind::UnknownTag(other.to_string())),
    }

    Ok(())
}

fn is_conditional_expression(tokens: &[Token]) -> bool {
    let head = match tokens.first() {
        Some(Token::Group(inner)) => inner.first(),
        other => other,
    };
    head.and_then(Token::as_atom)
        .is_some_and(|op| matches!(op, "and" | "not" | "all"))
}

/// Normalize `(and (...) (not (...)))`, `(not (...))` and `(all)`
///
/// Returns `None` for any other shape.
fn conditional_type(tokens: &[Token], naming: &dyn TypeNaming) -> Option<ConditionalType> {
    let mut expr = tokens;
    while let [Token::Group(inner)] = expr {
        expr = inner;
    }

    let names = |members: &[Token]| -> Option<Vec<String>> {
        members
            .iter()
            .map(|t| t.as_atom().map(|n| naming.normalize(n).to_string()))
            .collect()
    };

    match expr {
        [op] if op.is_atom("all") => Some(ConditionalType::all()),
        [op, Token::Group(negative)] if op.is_atom("not") => {
            Some(ConditionalType::new(Vec::<String>::new(), names(negative)?))
        }
        [op, Token::Group(positive)] if op.is_atom("and") => {
            Some(ConditionalType::new(names(positive)?, Vec::<String>::new()))
        }
        [op, Token::Group(positive), rest] if op.is_atom("and") => {
            let mut rest = std::slice::from_ref(rest);
            while let [Token::Group(inner)] = rest {
                rest = inner;
            }
            match rest {
                [not, Token::Group(negative)] if not.is_atom("not") => Some(ConditionalType::new(
                    names(positive)?,
                    names(negative)?,
                )),
                _ => None,
            }
        }
        [op, Token::Group(positive), not, Token::Group(negative)]
            if op.is_atom("and") && not.is_atom("not") =>
        {
            Some(ConditionalType::new(names(positive)?, names(negative)?))
        }
        _ => None,
    }
}

/// Expand ioctl values and `(range lo hi)` groups to hex strings
fn unpack_ioctls(tokens: &[Token]) -> Result<Vec<String>, ParseErrorKind> {
    let mut values = Vec::new();

    for token in tokens {
        if let Some(value) = token.as_atom() {
            values.push(format!("{:#x}", parse_hex(value)?));
            continue;
        }

        let mut range = token.as_group().unwrap_or_default();
        if let [Token::Group(inner)] = range {
            range = inner;
        }
        let [op, Token::Atom(start), Token::Atom(end)] = range else {
            return Err(ParseErrorKind::shape(
                "allowx",
                format!("unexpected ioctl value {:?}", flatten_token(token)),
            ));
        };
        if !op.is_atom("range") {
            return Err(ParseErrorKind::shape("allowx", "expected (range lo hi)"));
        }

        let (start, end) = (parse_hex(start)?, parse_hex(end)?);
        values.extend((start..=end).map(|n| format!("{n:#x}")));
    }

    Ok(values)
}

pub(crate) fn parse_hex(value: &str) -> Result<u32, ParseErrorKind> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(|_| ParseErrorKind::InvalidNumber(value.to_string()))
}
