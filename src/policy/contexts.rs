//! Context files (`file_contexts`, `property_contexts`, ...)
//!
//! Entries are kept as their whitespace-separated fields. They are compared
//! with the entries of source context files and never matched against
//! macros. `genfs_contexts` holds rules and is decoded by
//! [`parse_genfs_contexts`](super::parse_genfs_contexts) instead.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::significant_lines;

/// Kind of a context file, named after its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ContextsType {
    #[serde(rename = "file_contexts")]
    File,
    #[serde(rename = "property_contexts")]
    Property,
    #[serde(rename = "service_contexts")]
    Service,
    #[serde(rename = "hwservice_contexts")]
    HwService,
    #[serde(rename = "vndservice_contexts")]
    VndService,
    #[serde(rename = "seapp_contexts")]
    Seapp,
}

impl ContextsType {
    pub const ALL: [ContextsType; 6] = [
        ContextsType::File,
        ContextsType::Property,
        ContextsType::Service,
        ContextsType::HwService,
        ContextsType::VndService,
        ContextsType::Seapp,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ContextsType::File => "file_contexts",
            ContextsType::Property => "property_contexts",
            ContextsType::Service => "service_contexts",
            ContextsType::HwService => "hwservice_contexts",
            ContextsType::VndService => "vndservice_contexts",
            ContextsType::Seapp => "seapp_contexts",
        }
    }

    /// Kind of a context file from its name
    ///
    /// Compiled partitions prefix their files, as in `vendor_file_contexts`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let base = kind.file_name();
            name == base
                || name
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('_'))
        })
    }
}

impl fmt::Display for ContextsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Fields of one context entry
pub type ContextEntry = Vec<String>;

/// Entries of one context file, one per logical line
///
/// A line with an unclosed `(` continues on the next one, so a macro call
/// spanning lines stays one entry.
pub fn parse_contexts(text: &str) -> Vec<ContextEntry> {
    let mut entries = Vec::new();
    let mut pending = String::new();
    let mut depth: i32 = 0;

    for (_, line) in significant_lines(text) {
        if !pending.is_empty() {
            pending.push(' ');
        }
        pending.push_str(line);
        for c in line.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 {
            entries.push(pending.split_whitespace().map(str::to_string).collect());
            pending.clear();
            depth = 0;
        }
    }
    if !pending.is_empty() {
        entries.push(pending.split_whitespace().map(str::to_string).collect());
    }
    entries
}

/// Context entries grouped by kind, in reading order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contexts {
    entries: BTreeMap<ContextsType, Vec<ContextEntry>>,
}

impl Contexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ContextsType, entries: impl IntoIterator<Item = ContextEntry>) {
        self.entries.entry(kind).or_default().extend(entries);
    }

    pub fn extend(&mut self, other: Contexts) {
        for (kind, entries) in other.entries {
            self.add(kind, entries);
        }
    }

    pub fn get(&self, kind: ContextsType) -> &[ContextEntry] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Kinds with at least one entry, in kind order
    pub fn iter(&self) -> impl Iterator<Item = (ContextsType, &[ContextEntry])> {
        self.entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(kind, entries)| (*kind, entries.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry also present in `known` under the same kind
    ///
    /// Returns the number of entries removed for each kind held.
    pub fn remove_known(&mut self, known: &Contexts) -> BTreeMap<ContextsType, usize> {
        let mut removed = BTreeMap::new();
        for (kind, entries) in &mut self.entries {
            let known: HashSet<&ContextEntry> = known.get(*kind).iter().collect();
            let before = entries.len();
            entries.retain(|entry| !known.contains(entry));
            removed.insert(*kind, before - entries.len());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[&str]) -> ContextEntry {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(ContextsType::from_file_name("file_contexts"), Some(ContextsType::File));
        assert_eq!(
            ContextsType::from_file_name("vendor_file_contexts"),
            Some(ContextsType::File)
        );
        assert_eq!(
            ContextsType::from_file_name("vndservice_contexts"),
            Some(ContextsType::VndService)
        );
        assert_eq!(
            ContextsType::from_file_name("vendor_hwservice_contexts"),
            Some(ContextsType::HwService)
        );
        assert_eq!(ContextsType::from_file_name("genfs_contexts"), None);
        assert_eq!(ContextsType::from_file_name("_file_contexts"), None);
        assert_eq!(ContextsType::from_file_name("keystore2_key_contexts"), None);
    }

    #[test]
    fn test_parse_splits_fields() {
        let text = "\
# vendor files
/vendor/bin/hw/foo    u:object_r:foo_exec:s0
/dev/foo(/.*)?        u:object_r:foo_device:s0   # trailing

user=_app seinfo=platform domain=foo_app type=app_data_file
";
        assert_eq!(
            parse_contexts(text),
            vec![
                entry(&["/vendor/bin/hw/foo", "u:object_r:foo_exec:s0"]),
                entry(&["/dev/foo(/.*)?", "u:object_r:foo_device:s0"]),
                entry(&["user=_app", "seinfo=platform", "domain=foo_app", "type=app_data_file"]),
            ]
        );
    }

    #[test]
    fn test_parse_joins_open_calls() {
        let text = "is_flag_enabled(RELEASE_FOO,\n  vendor.foo u:object_r:foo_prop:s0\n)\nvendor.bar u:object_r:bar_prop:s0\n";
        let entries = parse_contexts(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0][0], "is_flag_enabled(RELEASE_FOO,");
        assert_eq!(entries[0].last().map(String::as_str), Some(")"));
        assert_eq!(entries[1], entry(&["vendor.bar", "u:object_r:bar_prop:s0"]));
    }

    #[test]
    fn test_remove_known_counts_per_kind() {
        let foo = entry(&["/vendor/bin/foo", "u:object_r:foo_exec:s0"]);
        let bar = entry(&["/vendor/bin/bar", "u:object_r:bar_exec:s0"]);
        let prop = entry(&["vendor.foo", "u:object_r:foo_prop:s0"]);

        let mut compiled = Contexts::new();
        compiled.add(ContextsType::File, [foo.clone(), bar.clone()]);
        compiled.add(ContextsType::Property, [prop.clone()]);

        let mut known = Contexts::new();
        known.add(ContextsType::File, [foo]);
        // Same fields under another kind do not count
        known.add(ContextsType::Service, [prop.clone()]);

        let removed = compiled.remove_known(&known);
        assert_eq!(removed.get(&ContextsType::File), Some(&1));
        assert_eq!(removed.get(&ContextsType::Property), Some(&0));
        assert_eq!(compiled.get(ContextsType::File), &[bar]);
        assert_eq!(compiled.get(ContextsType::Property), &[prop]);
        assert_eq!(compiled.len(), 2);
    }

    #[test]
    fn test_iter_skips_empty_kinds() {
        let mut contexts = Contexts::new();
        contexts.add(ContextsType::Seapp, Vec::new());
        contexts.add(ContextsType::File, [entry(&["/a", "u:object_r:a:s0"])]);
        let kinds: Vec<ContextsType> = contexts.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![ContextsType::File]);
        assert!(!contexts.is_empty());
    }
}
