//! Rewrite passes over the rule store
//!
//! Each pass removes a group of rules and inserts the rules that replace
//! them. Passes only look at rules in the shape they produce from, so
//! running one twice changes nothing the second time.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::engine::index::{RuleStore, SharedRule};
use crate::engine::matcher::RuleMatch;
use crate::macros::NamedGroup;
use crate::policy::Classmap;
use crate::types::{ClassSet, ConditionalType, Rule, RuleKey, RulePart, RuleType};

/// Rules removed and inserted by a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub removed: usize,
    pub added: usize,
}

impl PassSummary {
    fn apply(store: &mut RuleStore, removed: Vec<SharedRule>, added: Vec<Rule>) -> Self {
        let mut summary = PassSummary::default();
        for rule in &removed {
            if store.remove(rule).is_ok() {
                summary.removed += 1;
            }
        }
        for rule in added {
            if store.insert(rule) {
                summary.added += 1;
            }
        }
        summary
    }
}

/// Remove rules that come from known sources
///
/// Rules missing from the store are ignored. Returns the number removed.
pub fn remove_known_rules(store: &mut RuleStore, known: &[Rule]) -> usize {
    known.iter().filter(|rule| store.remove(rule).is_ok()).count()
}

/// Result of replacing matched rules with macro calls
#[derive(Debug, Clone, Default)]
pub struct Replacement {
    pub summary: PassSummary,
    /// Rules consumed by more than one surviving match
    pub already_removed: Vec<Rule>,
}

/// Replace the rules of every match with its macro call
pub fn replace_matches(store: &mut RuleStore, matches: &[RuleMatch]) -> Replacement {
    let mut replacement = Replacement::default();
    let mut already_removed = BTreeSet::new();

    for m in matches {
        for rule in &m.rules {
            if store.remove(rule).is_ok() {
                replacement.summary.removed += 1;
            } else {
                already_removed.insert(Rule::clone(rule));
            }
        }
        if store.insert(m.macro_call()) {
            replacement.summary.added += 1;
        }
    }

    let mut already_removed: Vec<Rule> = already_removed.into_iter().collect();
    already_removed.sort_by_cached_key(Rule::sort_key);
    for rule in &already_removed {
        warn!("Rule already removed: {}", rule);
    }
    replacement.already_removed = already_removed;
    replacement
}

/// Collapse `typeattribute T a` facts into `type T, a, ...;`
///
/// An existing `type T, ...` rule for the same type is merged in.
pub fn merge_typeattributes(store: &mut RuleStore) -> PassSummary {
    let keys = [
        Some(RuleKey::Type(RuleType::TypeAttribute)),
        None,
        None,
        Some(RuleKey::Varargs(BTreeSet::new())),
    ];
    let facts: Vec<SharedRule> = store.query(&keys).cloned().collect();

    let mut types: BTreeMap<RulePart, BTreeSet<String>> = BTreeMap::new();
    for fact in &facts {
        if let [t, attribute] = fact.parts.as_slice() {
            types
                .entry(t.clone())
                .or_default()
                .insert(attribute.to_string());
        }
    }

    let mut removed = facts;
    for (t, attributes) in types.iter_mut() {
        let keys = [
            Some(RuleKey::Type(RuleType::Type)),
            Some(RuleKey::Part(t.clone())),
            None,
        ];
        for existing in store.query(&keys) {
            attributes.extend(existing.varargs.iter().cloned());
            removed.push(existing.clone());
        }
    }

    let added = types
        .into_iter()
        .map(|(t, attributes)| Rule::new(RuleType::Type, vec![t], attributes))
        .collect();
    PassSummary::apply(store, removed, added)
}

/// Union the values of extended-permission rules that differ only in values
pub fn merge_ioctl_rules(store: &mut RuleStore) -> PassSummary {
    let mut groups: BTreeMap<(RuleType, Vec<RulePart>), Vec<SharedRule>> = BTreeMap::new();
    for rule_type in &RuleType::XPERM_FAMILY {
        for rule in store.rules_of_type(rule_type, 4) {
            groups
                .entry((rule.rule_type.clone(), rule.parts.clone()))
                .or_default()
                .push(rule);
        }
    }

    let mut removed = Vec::new();
    let mut added = Vec::new();
    for ((rule_type, parts), rules) in groups {
        if rules.len() < 2 {
            continue;
        }
        let values: BTreeSet<String> = rules.iter().flat_map(|r| r.varargs.iter().cloned()).collect();
        removed.extend(rules);
        added.push(Rule::new(rule_type, parts, values));
    }
    PassSummary::apply(store, removed, added)
}

/// Replace every group fully contained in `values` with its name
///
/// Groups are tried in order; each is checked against the values left after
/// the previous replacements.
pub fn replace_groups(values: &BTreeSet<String>, groups: &[NamedGroup], first_only: bool) -> BTreeSet<String> {
    let mut result = values.clone();
    for group in groups {
        if !group.members.is_empty() && group.members.is_subset(&result) {
            result.retain(|v| !group.members.contains(v));
            result.insert(group.name.clone());
            if first_only {
                break;
            }
        }
    }
    result
}

/// Classes a permission group applies to, from its name
fn perm_group_suffix(name: &str) -> Option<&'static str> {
    if name.contains("_file_") {
        Some("file")
    } else if name.contains("_dir_") {
        Some("dir")
    } else if name.contains("_socket_") {
        Some("socket")
    } else {
        None
    }
}

/// Replace permission lists with `*` or a named permission group
///
/// A list equal to the full permission set of the class becomes `*`.
/// Otherwise the largest group that fits is substituted. Groups apply to
/// classes by name: `_file_` groups to classes ending in `file`, and so on.
pub fn replace_perms(store: &mut RuleStore, classmap: &Classmap, perms: &[NamedGroup]) -> PassSummary {
    let mut by_suffix: BTreeMap<&str, Vec<NamedGroup>> = BTreeMap::new();
    for group in perms {
        match perm_group_suffix(&group.name) {
            Some(suffix) => by_suffix.entry(suffix).or_default().push(group.clone()),
            None if group.name.contains("_ipc_") => {}
            None => warn!("Permission macro {} does not name a class kind", group.name),
        }
    }

    let mut removed = Vec::new();
    let mut added = Vec::new();

    for suffix in ["file", "dir", "socket"] {
        let groups = by_suffix.remove(suffix).unwrap_or_default();
        for class in classmap.classes_ending_with(suffix) {
            let Some(all_perms) = classmap.class_perms(class) else {
                continue;
            };
            for rule_type in &RuleType::ALLOW_FAMILY {
                let keys = [
                    Some(RuleKey::Type(rule_type.clone())),
                    None,
                    None,
                    Some(RuleKey::Part(RulePart::literal(class))),
                    None,
                ];
                for rule in store.query(&keys) {
                    let replaced = if rule.varargs == *all_perms {
                        BTreeSet::from(["*".to_string()])
                    } else {
                        replace_groups(&rule.varargs, &groups, true)
                    };
                    if replaced != rule.varargs {
                        added.push(Rule::new(rule.rule_type.clone(), rule.parts.clone(), replaced));
                        removed.push(rule.clone());
                    }
                }
            }
        }
    }

    PassSummary::apply(store, removed, added)
}

/// Replace ioctl values with named ioctl groups, then with define names
pub fn replace_ioctls(
    store: &mut RuleStore,
    ioctls: &[NamedGroup],
    defines: &BTreeMap<String, String>,
) -> PassSummary {
    let mut removed = Vec::new();
    let mut added = Vec::new();

    for rule_type in &RuleType::XPERM_FAMILY {
        for rule in store.rules_of_type(rule_type, 4) {
            let replaced: BTreeSet<String> = replace_groups(&rule.varargs, ioctls, false)
                .into_iter()
                .map(|v| defines.get(&v).cloned().unwrap_or(v))
                .collect();
            if replaced != rule.varargs {
                added.push(Rule::new(rule.rule_type.clone(), rule.parts.clone(), replaced));
                removed.push(rule);
            }
        }
    }

    PassSummary::apply(store, removed, added)
}

/// Types whose rules carry a class in position 2
fn class_rule_types() -> Vec<(RuleType, usize)> {
    let allow = RuleType::ALLOW_FAMILY.into_iter().map(|t| (t, 3));
    let xperm = RuleType::XPERM_FAMILY.into_iter().map(|t| (t, 4));
    allow.chain(xperm).collect()
}

/// Rules sharing every field except one position
type Groups = BTreeMap<(Vec<RulePart>, BTreeSet<String>), (BTreeSet<String>, Vec<SharedRule>)>;

/// Merge rules differing only in class into one class-set rule
///
/// Named class sets fully contained in the merged classes replace their
/// members.
pub fn merge_class_sets(store: &mut RuleStore, class_sets: &[NamedGroup]) -> PassSummary {
    let mut removed = Vec::new();
    let mut added = Vec::new();

    for (rule_type, arity) in class_rule_types() {
        let mut groups = Groups::new();
        for rule in store.rules_of_type(&rule_type, arity) {
            let Some(class) = rule.parts[2].as_literal() else {
                continue;
            };
            let mut key = rule.parts.clone();
            key[2] = RulePart::literal("");
            let entry = groups.entry((key, rule.varargs.clone())).or_default();
            entry.0.insert(class.to_string());
            entry.1.push(rule);
        }

        for (_, (classes, rules)) in groups {
            if classes.len() < 2 {
                continue;
            }
            let classes = replace_groups(&classes, class_sets, false);
            let template = &rules[0];
            let mut parts = template.parts.clone();
            parts[2] = RulePart::ClassSet(ClassSet(classes));
            added.push(Rule {
                rule_type: template.rule_type.clone(),
                parts,
                varargs: template.varargs.clone(),
            });
            removed.extend(rules);
        }
    }

    PassSummary::apply(store, removed, added)
}

/// Merge rules differing only in a literal target into one rule on a type set
pub fn merge_target_domains(store: &mut RuleStore) -> PassSummary {
    let mut removed = Vec::new();
    let mut added = Vec::new();

    for (rule_type, arity) in class_rule_types() {
        let mut groups = Groups::new();
        for rule in store.rules_of_type(&rule_type, arity) {
            let Some(target) = rule.parts[1].as_literal() else {
                continue;
            };
            let mut key = rule.parts.clone();
            key[1] = RulePart::literal("");
            let entry = groups.entry((key, rule.varargs.clone())).or_default();
            entry.0.insert(target.to_string());
            entry.1.push(rule);
        }

        for (_, (targets, rules)) in groups {
            if targets.len() < 2 {
                continue;
            }
            let template = &rules[0];
            let mut parts = template.parts.clone();
            parts[1] = RulePart::TypeExpr(ConditionalType::new(targets, Vec::<String>::new()));
            added.push(Rule {
                rule_type: template.rule_type.clone(),
                parts,
                varargs: template.varargs.clone(),
            });
            removed.extend(rules);
        }
    }

    PassSummary::apply(store, removed, added)
}
