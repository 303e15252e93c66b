//! Source-syntax rule decoder
//!
//! Used for the rules of the macro library and for the platform source
//! rules that must not be reported as decompiled output. Set expressions on
//! the source and target positions are expanded into one rule per member,
//! unless they contain negations, in which case they stay a single
//! [`ConditionalType`].

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{ParseError, ParseErrorKind, TokenizeError};
use crate::policy::cil::parse_hex;
use crate::policy::classmap::Classmap;
use crate::policy::significant_lines;
use crate::policy::tokenizer::{Token, UnpackOptions, flatten_token, unpack};
use crate::types::{
    ConditionalType, GENFSCON_LABEL_END, GENFSCON_LABEL_START, Rule, RulePart, RuleType,
};

/// Source statements that never reach the compiled policy in a matchable form
const IGNORED_TAGS: &[&str] = &["permissive", "typealias"];

/// m4 builtins that show up as call statements but are not macro calls
const M4_BUILTINS: &[&str] = &["define", "ifdef", "ifelse", "ifndef", "eval", "dnl"];

static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*;?$").expect("valid regex")
});

/// A statement paired with the line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub line: usize,
    pub text: String,
}

/// Split normalized lines into statements
///
/// A statement ends at a top-level `;` or at the `)` closing a call, with an
/// optional trailing `;` attached to the call.
pub fn split_statements<'a, I>(lines: I) -> Result<Vec<Statement>, (usize, ParseErrorKind)>
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut statements = Vec::new();
    let mut level: i32 = 0;
    let mut block = String::new();
    let mut block_line = 0;
    let mut after_call = false;
    let mut last_line = 0;

    let mut push = |block: &mut String, line: usize| {
        let text = block.trim();
        if !text.is_empty() {
            statements.push(Statement {
                line,
                text: text.to_string(),
            });
        }
        block.clear();
    };

    for (line, content) in lines {
        last_line = line;
        for c in content.chars().chain(std::iter::once('\n')) {
            match c {
                '{' | '(' | '`' => level += 1,
                '}' | ')' | '\'' => level -= 1,
                _ => {}
            }

            if after_call && c != ';' && !c.is_whitespace() {
                after_call = false;
                push(&mut block, block_line);
            }

            if block.trim().is_empty() {
                block_line = line;
            }
            block.push(c);

            if level == 0 && c == ')' {
                after_call = true;
                continue;
            }

            if level == 0 && c == ';' {
                after_call = false;
                push(&mut block, block_line);
            }
        }
    }

    if level != 0 {
        return Err((
            block_line,
            TokenizeError::UnclosedGroup {
                depth: level.unsigned_abs() as usize,
            }
            .into(),
        ));
    }

    if after_call {
        push(&mut block, block_line);
    }

    if !block.trim().is_empty() {
        return Err((
            last_line,
            ParseErrorKind::shape("", format!("unterminated statement '{}'", block.trim())),
        ));
    }

    Ok(statements)
}

/// Split a call statement `name(a, b)` into its name and arguments
///
/// Returns `None` for anything that is not a call.
pub fn call_statement(statement: &str) -> Option<(&str, Vec<String>)> {
    let captures = CALL.captures(statement.trim())?;
    let name = captures.get(1)?.as_str();
    let args = captures.get(2)?.as_str();

    let mut values = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in args.chars() {
        match c {
            '{' | '(' | '`' => depth += 1,
            '}' | ')' | '\'' => depth -= 1,
            ',' if depth == 0 => {
                values.push(unquote(&current));
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !values.is_empty() {
        values.push(unquote(&current));
    }

    Some((name, values))
}

fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    arg.strip_prefix('`')
        .and_then(|a| a.strip_suffix('\''))
        .unwrap_or(arg)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the statement is a call to an m4 builtin such as `ifelse`
pub fn is_m4_builtin(statement: &str) -> bool {
    call_statement(statement).is_some_and(|(name, _)| M4_BUILTINS.contains(&name))
}

/// Decode a source rule file
///
/// Macro calls become macro-call rules. Duplicate rules are dropped, first
/// occurrence wins.
pub fn parse_source(
    text: &str,
    source_name: &str,
    classmap: Option<&Classmap>,
) -> Result<Vec<Rule>, ParseError> {
    let statements = split_statements(significant_lines(text))
        .map_err(|(line, kind)| ParseError::new(source_name, line, kind))?;

    let mut seen = HashSet::new();
    let mut rules = Vec::new();

    for statement in statements {
        if let Some((name, args)) = call_statement(&statement.text) {
            if M4_BUILTINS.contains(&name) {
                debug!("{}:{}: skipping {}()", source_name, statement.line, name);
                continue;
            }
            let rule = Rule::macro_call(name, args.into_iter().map(RulePart::Literal).collect());
            if seen.insert(rule.clone()) {
                rules.push(rule);
            }
            continue;
        }

        let decoded = parse_statement(&statement.text, classmap)
            .map_err(|kind| ParseError::new(source_name, statement.line, kind))?;
        for rule in decoded {
            if seen.insert(rule.clone()) {
                rules.push(rule);
            }
        }
    }

    Ok(rules)
}

/// Decode a `genfs_contexts` file
pub fn parse_genfs_contexts(text: &str, source_name: &str) -> Result<Vec<Rule>, ParseError> {
    significant_lines(text)
        .map(|(line, content)| {
            parse_genfscon(content).map_err(|kind| ParseError::new(source_name, line, kind))
        })
        .collect()
}

/// `genfscon sysfs /kernel/aov u:object_r:sysfs_aov:s0`
pub fn parse_genfscon(statement: &str) -> Result<Rule, ParseErrorKind> {
    let tokens = unpack(statement, &UnpackOptions::SOURCE_WORDS)?;
    let atoms = tokens
        .iter()
        .map(Token::as_atom)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ParseErrorKind::shape("genfscon", "fields must be names"))?;

    let [tag, fs, path, label] = atoms.as_slice() else {
        return Err(ParseErrorKind::arity("genfscon", "4", atoms.len()));
    };
    if *tag != "genfscon" {
        return Err(ParseErrorKind::UnknownTag(tag.to_string()));
    }

    let context = label
        .strip_prefix(GENFSCON_LABEL_START)
        .and_then(|l| l.strip_suffix(GENFSCON_LABEL_END))
        .ok_or_else(|| {
            ParseErrorKind::shape(
                "genfscon",
                format!("label '{label}' is not {GENFSCON_LABEL_START}<type>{GENFSCON_LABEL_END}"),
            )
        })?;

    Ok(Rule::new(
        RuleType::Genfscon,
        vec![(*fs).into(), (*path).into(), context.into()],
        Vec::<String>::new(),
    ))
}

/// `allow X Y (process (sigchld))` comes from a parameter-dependent branch
fn is_process_sigchld(tokens: &[Token]) -> bool {
    tokens.len() == 5
        && tokens[0].is_atom("allow")
        && tokens[3].is_atom("process")
        && tokens[4].is_atom("sigchld")
}

/// Turn a source or target field into one or more parts
///
/// `*` and `~x` become expressions. A plain set without negations expands to
/// one literal per member.
fn type_parts(token: &Token, all_negative: bool) -> Result<Vec<RulePart>, ParseErrorKind> {
    if let Token::Atom(name) = token {
        if name == "*" {
            return Ok(vec![RulePart::TypeExpr(ConditionalType::all())]);
        }
        if let Some(negated) = name.strip_prefix('~') {
            return Ok(vec![RulePart::TypeExpr(ConditionalType::new(
                Vec::<String>::new(),
                [negated],
            ))]);
        }
        if all_negative {
            return Ok(vec![RulePart::TypeExpr(ConditionalType::new(
                Vec::<String>::new(),
                [name.as_str()],
            ))]);
        }
        return Ok(vec![RulePart::literal(name)]);
    }

    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut negate_next = false;

    for name in flatten_token(token) {
        if name == "-" {
            negate_next = true;
        } else if let Some(negated) = name.strip_prefix('-') {
            negative.push(negated.to_string());
        } else if negate_next {
            negative.push(name.to_string());
            negate_next = false;
        } else if name.starts_with(|c: char| c.is_alphabetic() || c == '$') {
            positive.push(name.to_string());
        } else {
            return Err(ParseErrorKind::shape("", format!("invalid type name '{name}'")));
        }
    }

    if all_negative {
        if !negative.is_empty() {
            return Err(ParseErrorKind::shape("", "double negation in type set"));
        }
        negative = std::mem::take(&mut positive);
    }

    if !positive.is_empty() && negative.is_empty() {
        return Ok(positive.into_iter().map(RulePart::Literal).collect());
    }

    Ok(vec![RulePart::TypeExpr(ConditionalType::new(positive, negative))])
}

fn names(token: &Token) -> Vec<String> {
    flatten_token(token).into_iter().map(str::to_string).collect()
}

/// Decode one source statement
pub fn parse_statement(
    statement: &str,
    classmap: Option<&Classmap>,
) -> Result<Vec<Rule>, ParseErrorKind> {
    let mut tokens = unpack(statement, &UnpackOptions::SOURCE)?;
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let tag = match tokens.first() {
        Some(Token::Atom(tag)) if tokens.len() > 1 => tag.clone(),
        _ => return Err(ParseErrorKind::shape("", format!("invalid statement '{statement}'"))),
    };

    if IGNORED_TAGS.contains(&tag.as_str()) || is_process_sigchld(&tokens) {
        return Ok(Vec::new());
    }

    if tag == "genfscon" {
        return Ok(vec![parse_genfscon(statement)?]);
    }

    let rule_type = RuleType::from_keyword(&tag).ok_or_else(|| ParseErrorKind::UnknownTag(tag.clone()))?;
    let mut rules = Vec::new();

    match rule_type {
        RuleType::Allow | RuleType::NeverAllow | RuleType::AuditAllow | RuleType::DontAudit => {
            // neverallow ~{ a b } c:d e;
            let negative_sources = tokens.len() > 5 && tokens[1].is_atom("~");
            if negative_sources {
                tokens.remove(1);
            }
            // neverallow a ~{ b c }:d e;
            let negative_targets = tokens.len() > 5 && tokens[2].is_atom("~");
            if negative_targets {
                tokens.remove(2);
            }
            // neverallow a b:c ~{ d e };
            let mut negative_perms = tokens.len() > 5 && tokens[4].is_atom("~");
            if negative_perms {
                tokens.remove(4);
            }
            // neverallow a b:c ~d;
            if tokens.len() == 5
                && let Token::Atom(perm) = &mut tokens[4]
                && perm.starts_with('~')
            {
                perm.remove(0);
                negative_perms = true;
            }

            if tokens.len() != 5 {
                return Err(ParseErrorKind::arity(&tag, "5", tokens.len()));
            }

            let sources = type_parts(&tokens[1], negative_sources)?;
            let targets = type_parts(&tokens[2], negative_targets)?;
            let classes = names(&tokens[3]);
            let perms = names(&tokens[4]);
            let expand = negative_perms || perms == ["*"];

            for source in &sources {
                for target in &targets {
                    for class in &classes {
                        let class_perms = if expand {
                            let classmap = classmap.ok_or_else(|| ParseErrorKind::MissingClassmap(class.clone()))?;
                            let mut all = classmap
                                .class_perms(class)
                                .ok_or_else(|| ParseErrorKind::UnknownClass(class.clone()))?
                                .clone();
                            if negative_perms {
                                for perm in &perms {
                                    all.remove(perm);
                                }
                            }
                            all
                        } else {
                            perms.iter().cloned().collect()
                        };

                        rules.push(Rule::new(
                            rule_type.clone(),
                            vec![source.clone(), target.clone(), RulePart::literal(class)],
                            class_perms,
                        ));
                    }
                }
            }
        }
        RuleType::TypeTransition => {
            if !(5..=6).contains(&tokens.len()) {
                return Err(ParseErrorKind::arity(&tag, "5 or 6", tokens.len()));
            }
            let default = tokens[4]
                .as_atom()
                .ok_or_else(|| ParseErrorKind::shape(&tag, "default type must be a name"))?;
            let name = match tokens.get(5) {
                Some(token) => vec![
                    token
                        .as_atom()
                        .ok_or_else(|| ParseErrorKind::shape(&tag, "object name must be a string"))?
                        .to_string(),
                ],
                None => Vec::new(),
            };

            for source in type_parts(&tokens[1], false)? {
                for target in type_parts(&tokens[2], false)? {
                    for class in names(&tokens[3]) {
                        rules.push(Rule::new(
                            RuleType::TypeTransition,
                            vec![
                                source.clone(),
                                target.clone(),
                                RulePart::Literal(class),
                                RulePart::literal(default),
                            ],
                            name.clone(),
                        ));
                    }
                }
            }
        }
        RuleType::AllowXperm | RuleType::NeverAllowXperm | RuleType::DontAuditXperm => {
            // neverallowxperm a b:c ioctl ~{ d };
            let negative = tokens.len() > 6 && tokens[5].is_atom("~");
            if negative {
                tokens.remove(5);
            }
            if tokens.len() != 6 {
                return Err(ParseErrorKind::arity(&tag, "6", tokens.len()));
            }
            let operation = tokens[4]
                .as_atom()
                .ok_or_else(|| ParseErrorKind::shape(&tag, "operation must be a name"))?
                .to_string();
            let values = unpack_ioctls(&names(&tokens[5]), negative)?;

            for source in type_parts(&tokens[1], false)? {
                for target in type_parts(&tokens[2], false)? {
                    for class in names(&tokens[3]) {
                        rules.push(Rule::new(
                            rule_type.clone(),
                            vec![
                                source.clone(),
                                target.clone(),
                                RulePart::Literal(class),
                                RulePart::literal(operation.as_str()),
                            ],
                            values.iter().cloned(),
                        ));
                    }
                }
            }
        }
        RuleType::Attribute => {
            let [_, Token::Atom(name)] = tokens.as_slice() else {
                return Err(ParseErrorKind::arity(&tag, "2", tokens.len()));
            };
            rules.push(Rule::new(
                RuleType::Attribute,
                vec![RulePart::literal(name)],
                Vec::<String>::new(),
            ));
        }
        RuleType::TypeAttribute | RuleType::Type => {
            // `type T, a, b;` is matched as `typeattribute T a; typeattribute T b;`
            let name = tokens[1]
                .as_atom()
                .ok_or_else(|| ParseErrorKind::shape(&tag, "type must be a name"))?;
            for attribute in &tokens[2..] {
                let attribute = attribute
                    .as_atom()
                    .ok_or_else(|| ParseErrorKind::shape(&tag, "attributes must be names"))?;
                rules.push(Rule::new(
                    RuleType::TypeAttribute,
                    vec![RulePart::literal(name), RulePart::literal(attribute)],
                    Vec::<String>::new(),
                ));
            }
        }
        RuleType::ExpandAttribute => {
            let [_, Token::Atom(attribute), Token::Atom(value)] = tokens.as_slice() else {
                return Err(ParseErrorKind::arity(&tag, "3", tokens.len()));
            };
            rules.push(Rule::new(
                RuleType::ExpandAttribute,
                vec![RulePart::literal(attribute), RulePart::literal(value)],
                Vec::<String>::new(),
            ));
        }
        RuleType::Genfscon | RuleType::Macro(_) => {
            return Err(ParseErrorKind::UnknownTag(tag));
        }
    }

    Ok(rules)
}

/// Only the type and number bytes of an ioctl command are kept
fn format_ioctl(value: u32) -> String {
    format!("{:#x}", value & 0xFFFF)
}

/// Expand `0x10`, `0x10-0x1f` and negated lists to hex strings
fn unpack_ioctls(values: &[String], negative: bool) -> Result<Vec<String>, ParseErrorKind> {
    if negative {
        let excluded = values
            .iter()
            .map(|v| parse_hex(v).map(|n| n & 0xFFFF))
            .collect::<Result<HashSet<_>, _>>()?;
        return Ok((0..=0xFFFF)
            .filter(|n| !excluded.contains(n))
            .map(format_ioctl)
            .collect());
    }

    let mut ioctls = Vec::new();
    for value in values {
        match value.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_hex(start)?, parse_hex(end)?);
                ioctls.extend((start..=end).map(format_ioctl));
            }
            None => ioctls.push(format_ioctl(parse_hex(value)?)),
        }
    }
    Ok(ioctls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classmap() -> Classmap {
        Classmap::from_classes([
            (
                "file".to_string(),
                ["read", "write", "open", "getattr"].map(String::from).to_vec(),
            ),
            ("dir".to_string(), ["search", "read"].map(String::from).to_vec()),
        ])
    }

    fn statement(text: &str) -> Vec<Rule> {
        parse_statement(text, Some(&classmap())).unwrap()
    }

    #[test]
    fn test_split_statements_on_semicolons_and_calls() {
        let text = "allow a b:file read;\nfoo(a, b)\nbar(c);\ntype t, a;";
        let statements = split_statements(significant_lines(text)).unwrap();
        let texts: Vec<_> = statements.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["allow a b:file read;", "foo(a, b)", "bar(c);", "type t, a;"]
        );
        assert_eq!(statements[1].line, 2);
    }

    #[test]
    fn test_split_statements_multiline() {
        let text = "allow a b:file {\n  read\n  open\n};";
        let statements = split_statements(significant_lines(text)).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].line, 1);
    }

    #[test]
    fn test_split_statements_unterminated() {
        let text = "allow a b:file read";
        assert!(split_statements(significant_lines(text)).is_err());
    }

    #[test]
    fn test_call_statement() {
        let (name, args) = call_statement("hal_client_domain(foo, `bar')").unwrap();
        assert_eq!(name, "hal_client_domain");
        assert_eq!(args, vec!["foo", "bar"]);
        assert!(call_statement("allow a b:file read;").is_none());
    }

    #[test]
    fn test_allow_expands_sets() {
        let rules = statement("allow { a b } c:{ file dir } read;");
        assert_eq!(rules.len(), 4);
        assert!(rules.contains(&Rule::new(
            RuleType::Allow,
            vec!["b".into(), "c".into(), "dir".into()],
            ["read"]
        )));
    }

    #[test]
    fn test_allow_with_negation_builds_expression() {
        let rules = statement("neverallow { domain -init } c:file write;");
        assert_eq!(
            rules[0].parts[0],
            RulePart::TypeExpr(ConditionalType::new(["domain"], ["init"]))
        );

        let rules = statement("neverallow ~{ init vold } c:file write;");
        assert_eq!(
            rules[0].parts[0],
            RulePart::TypeExpr(ConditionalType::new(Vec::<String>::new(), ["init", "vold"]))
        );
    }

    #[test]
    fn test_star_perms_use_classmap() {
        let rules = statement("allow a b:dir *;");
        assert_eq!(rules[0].varargs.len(), 2);
    }

    #[test]
    fn test_negated_perms() {
        let rules = statement("neverallow a b:file ~{ read write };");
        assert_eq!(
            rules[0].varargs.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["getattr", "open"]
        );
    }

    #[test]
    fn test_star_perms_without_classmap() {
        let err = parse_statement("allow a b:dir *;", None).unwrap_err();
        assert_eq!(err, ParseErrorKind::MissingClassmap("dir".into()));
    }

    #[test]
    fn test_xperm_ranges_trimmed() {
        let rules = statement("allowxperm a b:chr_file ioctl { 0x10-0x11 0x15401 };");
        assert_eq!(rules[0].parts[3], RulePart::literal("ioctl"));
        assert_eq!(
            rules[0].varargs.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["0x10", "0x11", "0x5401"]
        );
    }

    #[test]
    fn test_type_becomes_typeattributes() {
        let rules = statement("type foo_exec, exec_type, file_type;");
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.rule_type == RuleType::TypeAttribute));
        assert!(statement("type foo;").is_empty());
    }

    #[test]
    fn test_type_transition() {
        let rules = statement("type_transition a b:file c \"name\";");
        assert_eq!(rules[0].to_string(), "type_transition a b:file c \"name\";");
    }

    #[test]
    fn test_named_type_transition_reads_back() {
        let rules = statement("type_transition a b:anon_inode c \"[userfaultfd]\";");
        let text = rules[0].to_string();
        assert_eq!(statement(&text), rules);
        assert_eq!(rules[0].parts[3].to_string(), "c");
    }

    #[test]
    fn test_ignored_statements() {
        assert!(statement("permissive foo;").is_empty());
        assert!(statement("allow a b:process sigchld;").is_empty());
    }

    #[test]
    fn test_unknown_tag() {
        let err = parse_statement("role r;", None).unwrap_err();
        assert_eq!(err, ParseErrorKind::UnknownTag("role".into()));
    }

    #[test]
    fn test_parse_genfscon() {
        let rule = parse_genfscon("genfscon sysfs /kernel/aov u:object_r:sysfs_aov:s0").unwrap();
        assert_eq!(rule.parts[2], RulePart::literal("sysfs_aov"));
    }

    #[test]
    fn test_parse_source_dedups_and_keeps_calls() {
        let text = "allow a b:file read;\nallow a b:file read;\nfoo_domain(a)\nifelse(`x', `y')\n";
        let rules = parse_source(text, "a.te", None).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1], Rule::macro_call("foo_domain", vec!["a".into()]));
    }

    #[test]
    fn test_parse_source_reports_line() {
        let err = parse_source("allow a b:file read;\n\nbogus a b;\n", "a.te", None).unwrap_err();
        assert_eq!(err.line, 3);
    }
}
