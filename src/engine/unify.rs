//! Placeholder unification and substitution
//!
//! Template parts carry `$N` placeholders. A part that is exactly `$N`
//! captures any concrete part; a literal with embedded placeholders
//! (`$1_exec`) captures substrings; set-valued parts are unified member by
//! member after removing the members both sides must share.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::InvariantViolation;
use crate::types::{ConditionalType, Rule, RulePart};

/// Placeholder index to bound value
pub type Bindings = BTreeMap<usize, RulePart>;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([0-9]+)").expect("valid regex"));

/// `$N` and nothing else
pub fn placeholder_index(text: &str) -> Option<usize> {
    let digits = text.strip_prefix('$')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Every placeholder index appearing in `text`
pub fn placeholders_in(text: &str) -> impl Iterator<Item = usize> + '_ {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
}

pub fn part_placeholders(part: &RulePart) -> BTreeSet<usize> {
    match part {
        RulePart::Literal(s) | RulePart::Unresolved(s) => placeholders_in(s).collect(),
        RulePart::TypeExpr(ct) => ct
            .positive
            .iter()
            .chain(&ct.negative)
            .flat_map(|s| placeholders_in(s))
            .collect(),
        RulePart::ClassSet(_) => BTreeSet::new(),
    }
}

pub fn has_placeholders(part: &RulePart) -> bool {
    !part_placeholders(part).is_empty()
}

pub fn varargs_have_placeholders(varargs: &BTreeSet<String>) -> bool {
    varargs.iter().any(|v| PLACEHOLDER.is_match(v))
}

/// Distinct placeholders of a rule, parts and varargs
pub fn rule_placeholders(rule: &Rule) -> BTreeSet<usize> {
    let mut indices: BTreeSet<usize> = rule.parts.iter().flat_map(part_placeholders).collect();
    indices.extend(rule.varargs.iter().flat_map(|v| placeholders_in(v)));
    indices
}

/// Union of two binding maps, `None` if they disagree on an index
pub fn merge_bindings(a: &Bindings, b: &Bindings) -> Option<Bindings> {
    let mut merged = a.clone();
    for (index, value) in b {
        match merged.get(index) {
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => {
                merged.insert(*index, value.clone());
            }
        }
    }
    Some(merged)
}

/// A literal with embedded placeholders compiled to an anchored regex
#[derive(Debug)]
struct LiteralPattern {
    regex: Regex,
    indices: Vec<usize>,
}

impl LiteralPattern {
    fn compile(template: &str) -> Option<Self> {
        let mut pattern = String::from("^");
        let mut indices = Vec::new();
        let mut last = 0;

        for captures in PLACEHOLDER.captures_iter(template) {
            let whole = captures.get(0)?;
            pattern.push_str(&regex::escape(&template[last..whole.start()]));
            pattern.push_str("(.+)");
            indices.push(captures[1].parse().ok()?);
            last = whole.end();
        }
        if indices.is_empty() {
            return None;
        }
        pattern.push_str(&regex::escape(&template[last..]));
        pattern.push('$');

        Some(Self {
            regex: Regex::new(&pattern).ok()?,
            indices,
        })
    }
}

/// Unifies template parts with concrete parts
///
/// Compiled literal patterns are cached per template string.
#[derive(Debug, Default)]
pub struct Unifier {
    patterns: HashMap<String, Option<Rc<LiteralPattern>>>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn pattern(&mut self, template: &str) -> Option<Rc<LiteralPattern>> {
        if let Some(cached) = self.patterns.get(template) {
            return cached.clone();
        }
        let compiled = LiteralPattern::compile(template).map(Rc::new);
        self.patterns.insert(template.to_string(), compiled.clone());
        compiled
    }

    /// Unify a template string with a concrete part
    pub fn unify_literal(&mut self, template: &str, concrete: &RulePart) -> Option<Bindings> {
        if let Some(index) = placeholder_index(template) {
            return Some(Bindings::from([(index, concrete.clone())]));
        }

        let RulePart::Literal(value) = concrete else {
            return None;
        };

        let Some(pattern) = self.pattern(template) else {
            return (template == value.as_str()).then(Bindings::new);
        };

        let captures = pattern.regex.captures(value)?;
        let mut bindings = Bindings::new();
        for (group, index) in pattern.indices.iter().enumerate() {
            let captured = RulePart::literal(captures.get(group + 1)?.as_str());
            match bindings.get(index) {
                Some(existing) if *existing != captured => return None,
                Some(_) => {}
                None => {
                    bindings.insert(*index, captured);
                }
            }
        }
        Some(bindings)
    }

    /// Unify two name sets
    ///
    /// Placeholder-free template members must appear verbatim in the concrete
    /// set. The rest are tried in every pairing; more than one consistent
    /// pairing is an error.
    pub fn unify_set(
        &mut self,
        template: &BTreeSet<String>,
        concrete: &BTreeSet<String>,
    ) -> Result<Option<Bindings>, InvariantViolation> {
        if template.len() != concrete.len() {
            return Ok(None);
        }

        let mut open_templates = Vec::new();
        let mut remaining: BTreeSet<&String> = concrete.iter().collect();
        for member in template {
            if PLACEHOLDER.is_match(member) {
                open_templates.push(member.as_str());
            } else if !remaining.remove(member) {
                return Ok(None);
            }
        }
        let remaining: Vec<&str> = remaining.into_iter().map(String::as_str).collect();

        if open_templates.is_empty() {
            return Ok(Some(Bindings::new()));
        }

        let mut solutions = Vec::new();
        let mut used = vec![false; remaining.len()];
        self.assign(
            &open_templates,
            &remaining,
            &mut used,
            Bindings::new(),
            &mut solutions,
        );

        match solutions.len() {
            0 => Ok(None),
            1 => Ok(solutions.pop()),
            count => Err(InvariantViolation::AmbiguousSet {
                template: format!("{template:?}"),
                concrete: format!("{concrete:?}"),
                count,
            }),
        }
    }

    fn assign(
        &mut self,
        templates: &[&str],
        concrete: &[&str],
        used: &mut [bool],
        bindings: Bindings,
        solutions: &mut Vec<Bindings>,
    ) {
        let Some((first, rest)) = templates.split_first() else {
            if !solutions.contains(&bindings) {
                solutions.push(bindings);
            }
            return;
        };

        for (i, value) in concrete.iter().enumerate() {
            if used[i] {
                continue;
            }
            let Some(found) = self.unify_literal(first, &RulePart::literal(*value)) else {
                continue;
            };
            let Some(merged) = merge_bindings(&bindings, &found) else {
                continue;
            };
            used[i] = true;
            self.assign(rest, concrete, used, merged, solutions);
            used[i] = false;
        }
    }

    /// Unify a template part with a concrete part
    pub fn unify_part(
        &mut self,
        template: &RulePart,
        concrete: &RulePart,
    ) -> Result<Option<Bindings>, InvariantViolation> {
        match template {
            RulePart::Literal(t) => Ok(self.unify_literal(t, concrete)),
            RulePart::TypeExpr(t) => {
                let RulePart::TypeExpr(c) = concrete else {
                    return Ok(None);
                };
                if t.is_all != c.is_all {
                    return Ok(None);
                }
                let Some(positive) = self.unify_set(&t.positive, &c.positive)? else {
                    return Ok(None);
                };
                let Some(negative) = self.unify_set(&t.negative, &c.negative)? else {
                    return Ok(None);
                };
                Ok(merge_bindings(&positive, &negative))
            }
            RulePart::ClassSet(_) | RulePart::Unresolved(_) => {
                Ok((template == concrete).then(Bindings::new))
            }
        }
    }

    /// Unify parts position by position, then varargs as a set
    pub fn unify_rule(
        &mut self,
        template: &Rule,
        concrete: &Rule,
    ) -> Result<Option<Bindings>, InvariantViolation> {
        if template.rule_type != concrete.rule_type || template.parts.len() != concrete.parts.len() {
            return Ok(None);
        }

        let mut bindings = Bindings::new();
        for (t, c) in template.parts.iter().zip(&concrete.parts) {
            let Some(found) = self.unify_part(t, c)? else {
                return Ok(None);
            };
            let Some(merged) = merge_bindings(&bindings, &found) else {
                return Ok(None);
            };
            bindings = merged;
        }

        let Some(found) = self.unify_set(&template.varargs, &concrete.varargs)? else {
            return Ok(None);
        };
        Ok(merge_bindings(&bindings, &found))
    }
}

/// Substitute bound placeholders into a template string
///
/// Unbound placeholders stay in place. Fails if a non-literal value would
/// have to be embedded into text.
fn substitute_text(template: &str, bindings: &Bindings) -> Option<String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PLACEHOLDER.captures_iter(template) {
        let whole = captures.get(0)?;
        result.push_str(&template[last..whole.start()]);
        let index: usize = captures[1].parse().ok()?;
        match bindings.get(&index) {
            Some(RulePart::Literal(value)) => result.push_str(value),
            Some(_) => return None,
            None => result.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    result.push_str(&template[last..]);
    Some(result)
}

fn substitute_set(set: &BTreeSet<String>, bindings: &Bindings) -> Option<BTreeSet<String>> {
    set.iter().map(|s| substitute_text(s, bindings)).collect()
}

/// Substitute bound placeholders into a template part
pub fn substitute_part(part: &RulePart, bindings: &Bindings) -> Option<RulePart> {
    match part {
        RulePart::Literal(text) => {
            if let Some(index) = placeholder_index(text) {
                return Some(bindings.get(&index).cloned().unwrap_or_else(|| part.clone()));
            }
            substitute_text(text, bindings).map(RulePart::Literal)
        }
        RulePart::TypeExpr(ct) => Some(RulePart::TypeExpr(ConditionalType {
            positive: substitute_set(&ct.positive, bindings)?,
            negative: substitute_set(&ct.negative, bindings)?,
            is_all: ct.is_all,
        })),
        RulePart::ClassSet(_) | RulePart::Unresolved(_) => Some(part.clone()),
    }
}

/// Substitute bound placeholders into every part and vararg of a template rule
pub fn substitute_rule(rule: &Rule, bindings: &Bindings) -> Option<Rule> {
    let parts = rule
        .parts
        .iter()
        .map(|p| substitute_part(p, bindings))
        .collect::<Option<Vec<_>>>()?;
    Some(Rule {
        rule_type: rule.rule_type.clone(),
        parts,
        varargs: substitute_set(&rule.varargs, bindings)?,
    })
}
