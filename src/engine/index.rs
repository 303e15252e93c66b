//! Wildcard-keyed rule index
//!
//! Every value is stored under each combination of its key positions with
//! positions from `dynamic_start` onward optionally replaced by a wildcard.
//! A lookup with some positions unknown is then a single hash probe. Keys of
//! different lengths live in separate buckets.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::rc::Rc;

use crate::types::{Rule, RuleKey, RuleType};

/// Removing a value that is not in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value is not indexed")]
pub struct NotIndexed;

/// Multi-level index keyed by tuples with optional wildcards
#[derive(Debug, Clone)]
pub struct WildcardIndex<K, V> {
    buckets: HashMap<usize, HashMap<Vec<Option<K>>, HashSet<V>>>,
    values: HashSet<V>,
    dynamic_start: usize,
}

impl<K, V> WildcardIndex<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Eq + Hash,
{
    /// Positions before `dynamic_start` are never wildcarded
    pub fn new(dynamic_start: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            values: HashSet::new(),
            dynamic_start,
        }
    }

    fn variants(&self, keys: &[K]) -> Vec<Vec<Option<K>>> {
        let mut variants: Vec<Vec<Option<K>>> = vec![Vec::with_capacity(keys.len())];
        for (position, key) in keys.iter().enumerate() {
            let wildcard = position >= self.dynamic_start;
            let mut next = Vec::with_capacity(variants.len() * if wildcard { 2 } else { 1 });
            for variant in variants {
                if wildcard {
                    let mut with_wildcard = variant.clone();
                    with_wildcard.push(None);
                    next.push(with_wildcard);
                }
                let mut with_key = variant;
                with_key.push(Some(key.clone()));
                next.push(with_key);
            }
            variants = next;
        }
        variants
    }

    /// Store `value` under every wildcard variant of `keys`
    ///
    /// Returns `false` if the value was already indexed.
    pub fn add(&mut self, keys: &[K], value: V) -> bool {
        if !self.values.insert(value.clone()) {
            return false;
        }

        let variants = self.variants(keys);
        let bucket = self.buckets.entry(keys.len()).or_default();
        for variant in variants {
            bucket.entry(variant).or_default().insert(value.clone());
        }
        true
    }

    /// Remove `value` from every wildcard variant of `keys`
    pub fn remove<Q>(&mut self, keys: &[K], value: &Q) -> Result<(), NotIndexed>
    where
        V: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.values.remove(value) {
            return Err(NotIndexed);
        }

        let variants = self.variants(keys);
        let Some(bucket) = self.buckets.get_mut(&keys.len()) else {
            return Ok(());
        };
        for variant in variants {
            if let Some(set) = bucket.get_mut(&variant) {
                set.remove(value);
                if set.is_empty() {
                    bucket.remove(&variant);
                }
            }
        }
        Ok(())
    }

    /// Values whose key matches every `Some` position of `keys`
    pub fn get(&self, keys: &[Option<K>]) -> impl Iterator<Item = &V> {
        self.buckets
            .get(&keys.len())
            .and_then(|bucket| bucket.get(keys))
            .into_iter()
            .flatten()
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        V: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.values.contains(value)
    }

    /// Every stored value, unordered
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rules are shared between the index and match results
pub type SharedRule = Rc<Rule>;

/// The rule type position is always concrete
pub const RULE_DYNAMIC_START: usize = 1;

/// The working set of rules
#[derive(Debug, Clone)]
pub struct RuleStore {
    index: WildcardIndex<RuleKey, SharedRule>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            index: WildcardIndex::new(RULE_DYNAMIC_START),
        }
    }

    pub fn from_rules<I: IntoIterator<Item = Rule>>(rules: I) -> Self {
        let mut store = Self::new();
        for rule in rules {
            store.insert(rule);
        }
        store
    }

    pub fn insert(&mut self, rule: Rule) -> bool {
        self.insert_shared(Rc::new(rule))
    }

    pub fn insert_shared(&mut self, rule: SharedRule) -> bool {
        let keys = rule.index_keys();
        self.index.add(&keys, rule)
    }

    pub fn remove(&mut self, rule: &Rule) -> Result<(), NotIndexed> {
        self.index.remove(&rule.index_keys(), rule)
    }

    pub fn contains(&self, rule: &Rule) -> bool {
        self.index.contains(rule)
    }

    /// Rules matching a key pattern laid out like [`Rule::index_keys`]
    pub fn query(&self, keys: &[Option<RuleKey>]) -> impl Iterator<Item = &SharedRule> {
        self.index.get(keys)
    }

    /// Every rule of a type with the given number of parts
    pub fn rules_of_type(&self, rule_type: &RuleType, arity: usize) -> Vec<SharedRule> {
        let mut keys = vec![None; arity + 2];
        keys[0] = Some(RuleKey::Type(rule_type.clone()));
        self.query(&keys).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedRule> {
        self.index.iter()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All rules in output order
    pub fn sorted_rules(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.iter().map(|r| Rule::clone(r)).collect();
        rules.sort_by_cached_key(Rule::sort_key);
        rules
    }
}
