//! Macro matching
//!
//! A macro's template rules are matched one at a time against the rule
//! store. Every candidate carries the rules it consumed so far and the
//! placeholder values bound so far; each template rule is filled in with the
//! candidate's bindings, looked up with the still-unbound positions
//! wildcarded, and unified with every hit.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::engine::index::{RuleStore, SharedRule};
use crate::engine::unify::{
    Bindings, Unifier, has_placeholders, merge_bindings, rule_placeholders, substitute_rule,
    varargs_have_placeholders,
};
use crate::error::InvariantViolation;
use crate::macros::{MacroLibrary, MacroTemplate};
use crate::types::{Rule, RuleKey};

/// A complete or partial match of one macro
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub macro_name: String,
    /// Consumed rules in template order
    pub rules: Vec<SharedRule>,
    rule_set: BTreeSet<SharedRule>,
    pub bindings: Bindings,
}

impl PartialEq for RuleMatch {
    fn eq(&self, other: &Self) -> bool {
        self.macro_name == other.macro_name
            && self.bindings == other.bindings
            && self.rule_set == other.rule_set
    }
}

impl Eq for RuleMatch {}

impl Hash for RuleMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.macro_name.hash(state);
        self.bindings.hash(state);
        self.rule_set.hash(state);
    }
}

impl RuleMatch {
    pub fn new(macro_name: impl Into<String>) -> Self {
        Self {
            macro_name: macro_name.into(),
            rules: Vec::new(),
            rule_set: BTreeSet::new(),
            bindings: Bindings::new(),
        }
    }

    /// The consumed rules as a set
    pub fn rule_set(&self) -> &BTreeSet<SharedRule> {
        &self.rule_set
    }

    fn extend(&self, rule: &SharedRule, bindings: Bindings) -> Self {
        let mut next = self.clone();
        if next.rule_set.insert(rule.clone()) {
            next.rules.push(rule.clone());
        }
        next.bindings = bindings;
        next
    }

    /// The macro-call rule replacing the consumed rules
    ///
    /// Arguments are the bound values in placeholder order.
    pub fn macro_call(&self) -> Rule {
        Rule::macro_call(
            self.macro_name.clone(),
            self.bindings.values().cloned().collect(),
        )
    }
}

impl fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.macro_call().fmt(f)
    }
}

/// Template rules ordered so the most constraining come first
///
/// Rules with more distinct placeholders bind more arguments early, which
/// turns later lookups into exact probes. Ties keep their template order.
pub fn matching_order(template: &MacroTemplate) -> Vec<&Rule> {
    let mut rules: Vec<(usize, &Rule)> = template
        .rules
        .iter()
        .map(|r| (rule_placeholders(r).len(), r))
        .collect();
    rules.sort_by(|a, b| b.0.cmp(&a.0));
    rules.into_iter().map(|(_, r)| r).collect()
}

/// Key pattern of a filled-in template rule
///
/// Positions that still contain placeholders are wildcarded.
fn lookup_keys(rule: &Rule) -> Vec<Option<RuleKey>> {
    let mut keys = Vec::with_capacity(rule.parts.len() + 2);
    keys.push(Some(RuleKey::Type(rule.rule_type.clone())));
    for part in &rule.parts {
        keys.push((!has_placeholders(part)).then(|| RuleKey::Part(part.clone())));
    }
    keys.push(
        (!varargs_have_placeholders(&rule.varargs)).then(|| RuleKey::Varargs(rule.varargs.clone())),
    );
    keys
}

/// Matches macro templates against a rule store
pub struct MacroMatcher<'s> {
    store: &'s RuleStore,
    unifier: Unifier,
}

impl<'s> MacroMatcher<'s> {
    pub fn new(store: &'s RuleStore) -> Self {
        Self {
            store,
            unifier: Unifier::new(),
        }
    }

    /// Every complete match of every template in the library
    pub fn match_library(&mut self, library: &MacroLibrary) -> Result<Vec<RuleMatch>, InvariantViolation> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for template in &library.templates {
            for found in self.match_macro(template)? {
                if seen.insert(found.clone()) {
                    all.push(found);
                }
            }
        }
        Ok(all)
    }

    /// Every complete match of one template
    pub fn match_macro(&mut self, template: &MacroTemplate) -> Result<Vec<RuleMatch>, InvariantViolation> {
        if template.rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = vec![RuleMatch::new(template.name.clone())];
        for template_rule in matching_order(template) {
            candidates = self.match_rule(template_rule, &candidates)?;
            trace!(
                "Macro {}: {} candidates after {}",
                template.name,
                candidates.len(),
                template_rule
            );
            if candidates.is_empty() {
                break;
            }
        }

        if !candidates.is_empty() {
            debug!("Macro {}: {} matches", template.name, candidates.len());
        }
        Ok(candidates)
    }

    /// Extend every candidate with each ground rule matching `template_rule`
    fn match_rule(
        &mut self,
        template_rule: &Rule,
        candidates: &[RuleMatch],
    ) -> Result<Vec<RuleMatch>, InvariantViolation> {
        let mut seen = HashSet::new();
        let mut extended = Vec::new();

        for candidate in candidates {
            let Some(filled) = substitute_rule(template_rule, &candidate.bindings) else {
                continue;
            };

            let keys = lookup_keys(&filled);
            let fully_bound = keys.iter().all(Option::is_some);
            let hits: Vec<SharedRule> = self.store.query(&keys).cloned().collect();

            for ground in hits {
                let bindings = if fully_bound {
                    candidate.bindings.clone()
                } else {
                    let Some(found) = self.unifier.unify_rule(&filled, &ground)? else {
                        continue;
                    };
                    let Some(merged) = merge_bindings(&candidate.bindings, &found) else {
                        continue;
                    };
                    merged
                };

                let next = candidate.extend(&ground, bindings);
                if seen.insert(next.clone()) {
                    extended.push(next);
                }
            }
        }

        Ok(extended)
    }
}
