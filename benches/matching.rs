//! Performance benchmarks for sepolicy-decompile
//!
//! These benchmarks measure the performance of key operations:
//! - Building the wildcard rule index
//! - Decoding compiled CIL
//! - Matching a macro library against policies of increasing size
//! - The full decompile pipeline
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench macro_matching
//! ```
//!
//! ## Expected Performance Characteristics
//!
//! - Index insertion costs one entry per wildcard variant, so it grows
//!   with 2^(parts - 1) per rule but linearly with the number of rules
//! - Matching is dominated by the first template rule of each macro; later
//!   rules are exact probes once their placeholders are bound
//! - CIL decoding is line-local and scales linearly with input size

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sepolicy_decompile::engine::{Decompiler, MacroMatcher, RuleStore};
use sepolicy_decompile::macros::{MacroLibrary, MacroTemplate, NamedGroup};
use sepolicy_decompile::policy::{VersionedNaming, parse_cil};
use sepolicy_decompile::{Rule, RuleType};

// ============================================================================
// Helper Functions
// ============================================================================

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

/// A policy with `domains` HAL clients, each with one macro expansion and
/// a few unrelated rules
fn create_policy(domains: usize) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(domains * 5);
    for i in 0..domains {
        let client = format!("vendor_hal{i}_client");
        let service = format!("vendor_hal{i}_hwservice");
        rules.push(allow(&client, &service, "file", &["read", "open", "map"]));
        rules.push(typeattribute(&client, "hal_client"));
        rules.push(typeattribute(&client, "domain"));
        rules.push(allow(&client, "vendor_data_file", "file", &["read", "write", "getattr"]));
        rules.push(allow(&client, "vendor_data_file", "dir", &["search"]));
    }
    rules
}

fn create_library() -> MacroLibrary {
    MacroLibrary {
        templates: vec![
            MacroTemplate {
                name: "hal_client_domain".into(),
                arity: 2,
                rules: vec![
                    allow("$1", "$2", "file", &["read", "open", "map"]),
                    typeattribute("$1", "hal_client"),
                ],
            },
            MacroTemplate {
                name: "binder_call".into(),
                arity: 2,
                rules: vec![
                    allow("$1", "$2", "binder", &["call", "transfer"]),
                    allow("$2", "$1", "binder", &["transfer"]),
                ],
            },
        ],
        perms: vec![NamedGroup::new("rw_file_perms", ["read", "write"])],
        class_sets: vec![NamedGroup::new("dir_file_class_set", ["dir", "file"])],
        ..MacroLibrary::default()
    }
}

fn create_cil(domains: usize) -> String {
    let mut text = String::new();
    for i in 0..domains {
        text.push_str(&format!(
            "(typeattributeset hal_client (vendor_hal{i}_client_30_0))\n\
             (allow vendor_hal{i}_client_30_0 vendor_hal{i}_hwservice_30_0 (file (read open map)))\n\
             (allowx vendor_hal{i}_client_30_0 vendor_hal{i}_device_30_0 (ioctl chr_file (0x5401 (range 0x10 0x20))))\n"
        ));
    }
    text
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");

    for domains in [100, 1_000, 5_000].iter() {
        let policy = create_policy(*domains);
        group.throughput(Throughput::Elements(policy.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(domains), &policy, |b, policy| {
            b.iter(|| black_box(RuleStore::from_rules(policy.iter().cloned())));
        });
    }

    group.finish();
}

fn bench_cil_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("cil_parsing");
    let naming = VersionedNaming::new(Some("30.0"));

    for domains in [100, 1_000].iter() {
        let text = create_cil(*domains);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(domains), &text, |b, text| {
            b.iter(|| black_box(parse_cil(text, "bench.cil", &naming).unwrap()));
        });
    }

    group.finish();
}

fn bench_macro_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("macro_matching");
    let library = create_library();

    for domains in [100, 1_000, 5_000].iter() {
        let store = RuleStore::from_rules(create_policy(*domains));
        group.throughput(Throughput::Elements(store.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(domains), &store, |b, store| {
            b.iter(|| black_box(MacroMatcher::new(store).match_library(&library).unwrap()));
        });
    }

    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");
    group.sample_size(20);

    for domains in [100, 1_000].iter() {
        let policy = create_policy(*domains);
        group.bench_with_input(BenchmarkId::from_parameter(domains), &policy, |b, policy| {
            b.iter(|| {
                let result = Decompiler::new(policy.clone(), create_library())
                    .run()
                    .unwrap();
                black_box(result)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_index_build,
    bench_cil_parsing,
    bench_macro_matching,
    bench_full_pipeline
);
criterion_main!(benches);
