//! Library-level decompilation tests
//!
//! These tests drive the matcher, the consolidation passes and the loader
//! through the public API, from hand-built rules up to a policy tree on disk.

mod common;

use common::{DECOMPILE_TOML, setup_policy_tree};
use sepolicy_decompile::config::{Config, PassesConfig};
use sepolicy_decompile::engine::index::WildcardIndex;
use sepolicy_decompile::engine::passes::{self, PassSummary};
use sepolicy_decompile::engine::subsume::discard_subsumed;
use sepolicy_decompile::engine::{Decompiler, MacroMatcher, RuleStore};
use sepolicy_decompile::input::loader;
use sepolicy_decompile::macros::{MacroLibrary, MacroTemplate, NamedGroup};
use sepolicy_decompile::policy::{Classmap, ContextsType};
use sepolicy_decompile::{Rule, RulePart, RuleType};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn allow(src: &str, dst: &str, class: &str, perms: &[&str]) -> Rule {
    Rule::new(
        RuleType::Allow,
        vec![src.into(), dst.into(), class.into()],
        perms.iter().copied(),
    )
}

fn typeattribute(t: &str, attribute: &str) -> Rule {
    Rule::new(
        RuleType::TypeAttribute,
        vec![t.into(), attribute.into()],
        Vec::<String>::new(),
    )
}

fn hal_client_domain() -> MacroTemplate {
    MacroTemplate {
        name: "hal_client_domain".into(),
        arity: 2,
        rules: vec![
            allow("$1", "$2", "file", &["read", "open", "map"]),
            typeattribute("$1", "hal_client"),
        ],
    }
}

#[test]
fn test_basic_match_binds_both_arguments() {
    let store = RuleStore::from_rules([
        allow("vendor_foo_client", "vendor_foo_hwservice", "file", &["read", "open", "map"]),
        typeattribute("vendor_foo_client", "hal_client"),
    ]);

    let matches = assert_ok!(MacroMatcher::new(&store).match_macro(&hal_client_domain()));
    assert_eq!(matches.len(), 1);
    let expected = BTreeMap::from([
        (1, RulePart::literal("vendor_foo_client")),
        (2, RulePart::literal("vendor_foo_hwservice")),
    ]);
    assert_eq!(matches[0].bindings, expected);
    assert_eq!(matches[0].rule_set().len(), 2);
}

#[test]
fn test_basic_match_replaces_rules_with_call() {
    let policy = vec![
        allow("vendor_foo_client", "vendor_foo_hwservice", "file", &["read", "open", "map"]),
        typeattribute("vendor_foo_client", "hal_client"),
    ];
    let library = MacroLibrary {
        templates: vec![hal_client_domain()],
        ..MacroLibrary::default()
    };

    let result = assert_ok!(Decompiler::new(policy, library).run());
    assert_eq!(
        result.rules,
        vec![Rule::macro_call(
            "hal_client_domain",
            vec!["vendor_foo_client".into(), "vendor_foo_hwservice".into()],
        )]
    );
    assert_eq!(result.report.rules_replaced, 2);
}

#[test]
fn test_partial_match_is_not_reported() {
    let store = RuleStore::from_rules([allow(
        "vendor_foo_client",
        "vendor_foo_hwservice",
        "file",
        &["read", "open", "map"],
    )]);
    let matches = assert_ok!(MacroMatcher::new(&store).match_macro(&hal_client_domain()));
    assert!(matches.is_empty());
}

#[test]
fn test_smaller_macro_is_subsumed() {
    let rule1 = allow("$1", "$2", "binder", &["call"]);
    let rule2 = allow("$2", "$1", "binder", &["transfer"]);
    let library = MacroLibrary {
        templates: vec![
            MacroTemplate {
                name: "binder_call_only".into(),
                arity: 2,
                rules: vec![rule1.clone()],
            },
            MacroTemplate {
                name: "binder_call".into(),
                arity: 2,
                rules: vec![rule1, rule2],
            },
        ],
        ..MacroLibrary::default()
    };
    let store = RuleStore::from_rules([
        allow("foo", "bar", "binder", &["call"]),
        allow("bar", "foo", "binder", &["transfer"]),
    ]);

    let matches = assert_ok!(MacroMatcher::new(&store).match_library(&library));
    let (kept, discarded) = assert_ok!(discard_subsumed(matches));
    assert_eq!(discarded, 1);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].to_string(), "binder_call(foo, bar)");
}

#[test]
fn test_index_wildcard_lookup() {
    let mut index: WildcardIndex<&str, &str> = WildcardIndex::new(1);
    index.add(&["allow", "a", "b"], "value");

    let all: Vec<_> = index.get(&[Some("allow"), None, None]).collect();
    assert_eq!(all, vec![&"value"]);
    let by_source: Vec<_> = index.get(&[Some("allow"), Some("a"), None]).collect();
    assert_eq!(by_source, vec![&"value"]);
    assert_eq!(index.get(&[Some("allow"), Some("x"), None]).count(), 0);
}

fn file_classmap() -> Classmap {
    Classmap::from_classes([
        (
            "file".to_string(),
            ["read", "write", "execute", "open", "getattr"]
                .map(String::from)
                .to_vec(),
        ),
        ("dir".to_string(), ["search", "read"].map(String::from).to_vec()),
    ])
}

#[test]
fn test_permission_replacement() {
    let perms = vec![NamedGroup::new("rw_file_perms", ["read", "write"])];
    let mut store = RuleStore::from_rules([allow("a", "b", "file", &["read", "write", "execute"])]);

    let summary = passes::replace_perms(&mut store, &file_classmap(), &perms);
    assert_eq!(summary, PassSummary { removed: 1, added: 1 });
    assert!(store.contains(&allow("a", "b", "file", &["rw_file_perms", "execute"])));
}

#[test]
fn test_full_permission_set_becomes_star() {
    let mut store = RuleStore::from_rules([allow(
        "a",
        "b",
        "file",
        &["read", "write", "execute", "open", "getattr"],
    )]);
    passes::replace_perms(&mut store, &file_classmap(), &[]);
    assert!(store.contains(&allow("a", "b", "file", &["*"])));
}

#[test]
fn test_passes_can_be_disabled() {
    let policy = vec![
        typeattribute("foo", "domain"),
        typeattribute("foo", "coredomain"),
    ];

    let merged = assert_ok!(Decompiler::new(policy.clone(), MacroLibrary::default()).run());
    assert_eq!(merged.rules.len(), 1);
    assert_eq!(merged.rules[0].to_string(), "type foo, coredomain, domain;");

    let passes = PassesConfig {
        merge_typeattributes: false,
        ..PassesConfig::default()
    };
    let separate = assert_ok!(
        Decompiler::new(policy, MacroLibrary::default())
            .with_passes(passes)
            .run()
    );
    assert_eq!(separate.rules.len(), 2);
}

#[test]
fn test_policy_tree_end_to_end() {
    let dir = TempDir::new().unwrap();
    setup_policy_tree(dir.path());
    let config = assert_ok!(Config::parse(DECOMPILE_TOML)).rebase(dir.path());

    let inputs = assert_ok!(loader::load(&config.decompile));
    assert!(inputs.classmap.is_some());
    let result = assert_ok!(inputs.into_decompiler(config.passes).run());

    let text: Vec<String> = result.rules.iter().map(ToString::to_string).collect();
    assert!(text.contains(&"hal_client_domain(vendor_foo_client, vendor_foo_hwservice)".to_string()));
    assert!(text.contains(&"type vendor_foo_client, domain;".to_string()));
    assert!(text.contains(
        &"allow vendor_foo_client vendor_data_file:file { getattr rw_file_perms };".to_string()
    ));
    // Already in vendor/foo.te
    assert!(!text.iter().any(|t| t.contains(":dir")));

    let genfs: Vec<String> = result.genfs.iter().map(ToString::to_string).collect();
    assert_eq!(genfs, vec!["genfscon sysfs /kernel/bar u:object_r:sysfs_bar:s0"]);
    assert_eq!(result.report.known_removed, 1);
    assert_eq!(result.report.genfs_removed, 1);
}

#[test]
fn test_policy_tree_context_files() {
    let dir = TempDir::new().unwrap();
    setup_policy_tree(dir.path());
    let config = assert_ok!(Config::parse(DECOMPILE_TOML)).rebase(dir.path());

    let inputs = assert_ok!(loader::load(&config.decompile));
    let result = assert_ok!(inputs.into_decompiler(config.passes).run());

    // The foo service entry is in vendor/file_contexts, with other spacing
    let files: Vec<String> = result
        .contexts
        .get(ContextsType::File)
        .iter()
        .map(|entry| entry.join(" "))
        .collect();
    assert_eq!(files, vec!["/vendor/bin/bar u:object_r:vendor_bar_exec:s0"]);

    // No source hwservice_contexts, so every entry stays
    assert_eq!(result.contexts.get(ContextsType::HwService).len(), 1);
    assert_eq!(result.report.contexts_removed.get(&ContextsType::File), Some(&1));
    assert_eq!(result.report.contexts_removed.get(&ContextsType::HwService), Some(&0));
    assert!(result.contexts.get(ContextsType::Property).is_empty());
}
