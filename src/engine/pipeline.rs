//! The decompilation pipeline
//!
//! Passes run in a fixed order, each relying on the shape of the store left
//! by the ones before it:
//!
//! 1. remove rules from known sources
//! 2. match every macro template
//! 3. discard subsumed matches
//! 4. replace matched rules with macro calls
//! 5. remove known rules again, which drops known macro calls
//! 6. consolidation passes enabled in [`PassesConfig`]
//!
//! `genfscon` rules and context file entries bypass matching; only the ones
//! missing from the known sources are kept.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::PassesConfig;
use crate::engine::index::RuleStore;
use crate::engine::matcher::MacroMatcher;
use crate::engine::passes::{self, PassSummary};
use crate::engine::subsume::discard_subsumed;
use crate::error::InvariantViolation;
use crate::macros::MacroLibrary;
use crate::policy::{Classmap, Contexts, ContextsType};
use crate::types::Rule;

/// Rule counts of one consolidation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub name: &'static str,
    #[serde(flatten)]
    pub summary: PassSummary,
}

/// What a run did to the rule set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecompileReport {
    pub input_rules: usize,
    pub known_removed: usize,
    pub matches_found: usize,
    pub matches_discarded: usize,
    pub rules_replaced: usize,
    pub macro_calls: usize,
    pub already_removed: usize,
    pub passes: Vec<PassReport>,
    pub genfs_removed: usize,
    /// Context file entries found in the known sources, per context file kind
    pub contexts_removed: BTreeMap<ContextsType, usize>,
    pub leftover_rules: usize,
}

/// Output of a run
#[derive(Debug, Clone)]
pub struct Decompilation {
    /// Leftover, macro-call and consolidated rules in output order
    pub rules: Vec<Rule>,
    /// `genfscon` rules not present in the known sources
    pub genfs: Vec<Rule>,
    /// Context file entries not present in the known sources
    pub contexts: Contexts,
    pub report: DecompileReport,
}

/// Runs every pass over one policy
pub struct Decompiler {
    store: RuleStore,
    known: Vec<Rule>,
    library: MacroLibrary,
    classmap: Option<Classmap>,
    passes: PassesConfig,
    genfs: Vec<Rule>,
    known_genfs: Vec<Rule>,
    contexts: Contexts,
    known_contexts: Contexts,
}

impl Decompiler {
    pub fn new(policy: Vec<Rule>, library: MacroLibrary) -> Self {
        Self {
            store: RuleStore::from_rules(policy),
            known: Vec::new(),
            library,
            classmap: None,
            passes: PassesConfig::default(),
            genfs: Vec::new(),
            known_genfs: Vec::new(),
            contexts: Contexts::new(),
            known_contexts: Contexts::new(),
        }
    }

    /// Rules already present in platform policy or policy sources
    pub fn with_known(mut self, known: Vec<Rule>) -> Self {
        self.known = known;
        self
    }

    pub fn with_classmap(mut self, classmap: Classmap) -> Self {
        self.classmap = Some(classmap);
        self
    }

    pub fn with_passes(mut self, passes: PassesConfig) -> Self {
        self.passes = passes;
        self
    }

    /// `genfscon` rules of the policy and of the known sources
    pub fn with_genfs(mut self, genfs: Vec<Rule>, known_genfs: Vec<Rule>) -> Self {
        self.genfs = genfs;
        self.known_genfs = known_genfs;
        self
    }

    /// Context file entries of the policy and of the known sources
    pub fn with_contexts(mut self, contexts: Contexts, known_contexts: Contexts) -> Self {
        self.contexts = contexts;
        self.known_contexts = known_contexts;
        self
    }

    pub fn run(self) -> Result<Decompilation, InvariantViolation> {
        let Decompiler {
            mut store,
            known,
            library,
            classmap,
            passes: enabled,
            genfs,
            known_genfs,
            mut contexts,
            known_contexts,
        } = self;

        let mut report = DecompileReport {
            input_rules: store.len(),
            ..DecompileReport::default()
        };
        info!("Decompiling {} rules", report.input_rules);

        report.known_removed = passes::remove_known_rules(&mut store, &known);
        info!("Removed {} rules from known sources", report.known_removed);

        let matches = MacroMatcher::new(&store).match_library(&library)?;
        report.matches_found = matches.len();

        let (matches, discarded) = discard_subsumed(matches)?;
        report.matches_discarded = discarded;
        info!(
            "Found {} macro matches, {} subsumed",
            report.matches_found, report.matches_discarded
        );

        let replacement = passes::replace_matches(&mut store, &matches);
        drop(matches);
        report.rules_replaced = replacement.summary.removed;
        report.macro_calls = replacement.summary.added;
        report.already_removed = replacement.already_removed.len();
        info!(
            "Replaced {} rules with {} macro calls",
            report.rules_replaced, report.macro_calls
        );

        report.known_removed += passes::remove_known_rules(&mut store, &known);

        let mut record = |name: &'static str, summary: PassSummary| {
            debug!("{}: -{} +{}", name, summary.removed, summary.added);
            report.passes.push(PassReport { name, summary });
        };

        if enabled.merge_ioctls {
            record("merge_ioctls", passes::merge_ioctl_rules(&mut store));
            let removed = passes::remove_known_rules(&mut store, &known);
            record(
                "remove_known",
                PassSummary {
                    removed,
                    added: 0,
                },
            );
        }
        if enabled.merge_typeattributes {
            record("merge_typeattributes", passes::merge_typeattributes(&mut store));
        }
        if enabled.replace_perms {
            match &classmap {
                Some(classmap) => record(
                    "replace_perms",
                    passes::replace_perms(&mut store, classmap, &library.perms),
                ),
                None => debug!("No class map, permission lists left as is"),
            }
        }
        if enabled.replace_ioctls {
            record(
                "replace_ioctls",
                passes::replace_ioctls(&mut store, &library.ioctls, &library.ioctl_defines),
            );
        }
        if enabled.merge_class_sets {
            record(
                "merge_class_sets",
                passes::merge_class_sets(&mut store, &library.class_sets),
            );
        }
        if enabled.merge_target_domains {
            record("merge_target_domains", passes::merge_target_domains(&mut store));
        }

        let known_genfs: HashSet<&Rule> = known_genfs.iter().collect();
        let genfs_total = genfs.len();
        let mut genfs: Vec<Rule> = genfs
            .into_iter()
            .filter(|rule| !known_genfs.contains(rule))
            .collect();
        genfs.sort_by_cached_key(Rule::sort_key);
        genfs.dedup();
        report.genfs_removed = genfs_total - genfs.len();

        report.contexts_removed = contexts.remove_known(&known_contexts);
        for (kind, removed) in &report.contexts_removed {
            info!("Removed {} {} source entries", removed, kind);
        }

        let rules = store.sorted_rules();
        report.leftover_rules = rules.len();
        info!("Leftover rules: {}", report.leftover_rules);

        Ok(Decompilation {
            rules,
            genfs,
            contexts,
            report,
        })
    }
}
