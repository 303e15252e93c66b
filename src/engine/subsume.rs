//! Discarding matches explained by a larger match

use std::collections::{BTreeSet, HashMap};

use crate::engine::index::SharedRule;
use crate::engine::matcher::RuleMatch;
use crate::error::InvariantViolation;

/// Drop every match whose rules are covered by another match
///
/// A match M is discarded when some other match C consumed every rule of M
/// and either consumed strictly more rules, or the same rules with more bound
/// arguments. Returns the surviving matches in their original order and the
/// number discarded.
pub fn discard_subsumed(matches: Vec<RuleMatch>) -> Result<(Vec<RuleMatch>, usize), InvariantViolation> {
    let mut by_rule: HashMap<&SharedRule, BTreeSet<usize>> = HashMap::new();
    for (i, m) in matches.iter().enumerate() {
        for rule in m.rule_set() {
            by_rule.entry(rule).or_default().insert(i);
        }
    }

    let mut discarded = BTreeSet::new();
    for (i, m) in matches.iter().enumerate() {
        let mut supersets: Option<BTreeSet<usize>> = None;
        for rule in m.rule_set() {
            let containing = by_rule.get(rule).cloned().unwrap_or_default();
            supersets = Some(match supersets {
                None => containing,
                Some(current) => current.intersection(&containing).copied().collect(),
            });
        }

        let Some(mut supersets) = supersets.filter(|s| s.contains(&i)) else {
            return Err(InvariantViolation::OrphanMatch(m.to_string()));
        };
        supersets.remove(&i);

        let subsumed = supersets.iter().any(|&c| {
            let candidate = &matches[c];
            let (mine, theirs) = (m.rule_set().len(), candidate.rule_set().len());
            theirs > mine || (theirs == mine && candidate.bindings.len() > m.bindings.len())
        });
        if subsumed {
            discarded.insert(i);
        }
    }

    let count = discarded.len();
    let kept = matches
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !discarded.contains(i))
        .map(|(_, m)| m)
        .collect();
    Ok((kept, count))
}
