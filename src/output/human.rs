//! Policy text output and the colored run summary

use std::io;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::engine::{DecompileReport, Decompilation};
use crate::types::Rule;

/// Renders decompiled rules as policy source
pub struct HumanFormatter {
    color: ColorChoice,
}

impl HumanFormatter {
    pub fn new(color: ColorChoice) -> Self {
        Self { color }
    }

    /// Rules one per line, with a blank line whenever the rule type changes
    pub fn format_rules(&self, rules: &[Rule]) -> String {
        let mut output = String::new();
        let mut previous: Option<&Rule> = None;
        for rule in rules {
            if let Some(previous) = previous
                && previous.rule_type != rule.rule_type
            {
                output.push('\n');
            }
            output.push_str(&rule.to_string());
            output.push('\n');
            previous = Some(rule);
        }
        output
    }

    /// The rules, then the leftover `genfscon` lines, then one block per
    /// context file headed by its name
    pub fn format(&self, result: &Decompilation) -> String {
        let mut output = self.format_rules(&result.rules);
        if !result.genfs.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&self.format_rules(&result.genfs));
        }
        for (kind, entries) in result.contexts.iter() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&format!("# {kind}\n"));
            for entry in entries {
                output.push_str(&entry.join(" "));
                output.push('\n');
            }
        }
        output
    }

    /// Print the run summary to stderr
    pub fn print_summary(&self, report: &DecompileReport) -> io::Result<()> {
        let mut stderr = StandardStream::stderr(self.color);
        self.write_summary(&mut stderr, report)
    }

    pub fn write_summary<W: WriteColor>(&self, out: &mut W, report: &DecompileReport) -> io::Result<()> {
        let mut heading = ColorSpec::new();
        heading.set_fg(Some(Color::Green)).set_bold(true);
        let mut warning = ColorSpec::new();
        warning.set_fg(Some(Color::Yellow));

        out.set_color(&heading)?;
        writeln!(out, "Decompiled {} rules", report.input_rules)?;
        out.reset()?;

        writeln!(out, "  known rules removed: {}", report.known_removed)?;
        writeln!(
            out,
            "  macro matches:       {} ({} subsumed)",
            report.matches_found, report.matches_discarded
        )?;
        writeln!(
            out,
            "  macro calls:         {} replacing {} rules",
            report.macro_calls, report.rules_replaced
        )?;
        for pass in &report.passes {
            writeln!(
                out,
                "  {:<20} -{} +{}",
                format!("{}:", pass.name),
                pass.summary.removed,
                pass.summary.added
            )?;
        }
        if report.genfs_removed > 0 {
            writeln!(out, "  known genfscon:      {}", report.genfs_removed)?;
        }
        for (kind, removed) in &report.contexts_removed {
            writeln!(out, "  {:<20} {}", format!("known {kind}:"), removed)?;
        }

        if report.already_removed > 0 {
            out.set_color(&warning)?;
            writeln!(
                out,
                "  {} rules were consumed by more than one macro call",
                report.already_removed
            )?;
            out.reset()?;
        }

        out.set_color(&heading)?;
        writeln!(out, "Leftover rules: {}", report.leftover_rules)?;
        out.reset()?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PassReport;
    use crate::engine::PassSummary;
    use crate::policy::{Contexts, ContextsType};
    use crate::types::{RulePart, RuleType};
    use std::collections::BTreeMap;
    use termcolor::{Buffer, NoColor};

    fn rule(rule_type: RuleType, parts: &[&str], varargs: &[&str]) -> Rule {
        Rule::new(
            rule_type,
            parts.iter().map(|p| RulePart::literal(*p)).collect(),
            varargs.iter().copied(),
        )
    }

    #[test]
    fn test_blank_line_between_rule_types() {
        let rules = vec![
            rule(RuleType::Type, &["foo"], &["domain"]),
            rule(RuleType::Type, &["foo_exec"], &["exec_type"]),
            Rule::macro_call("init_daemon_domain", vec![RulePart::literal("foo")]),
            rule(RuleType::Allow, &["foo", "bar", "file"], &["read"]),
        ];

        let text = HumanFormatter::new(ColorChoice::Never).format_rules(&rules);
        assert_eq!(
            text,
            "type foo, domain;\n\
             type foo_exec, exec_type;\n\
             \n\
             init_daemon_domain(foo)\n\
             \n\
             allow foo bar:file read;\n"
        );
    }

    #[test]
    fn test_genfs_follow_rules() {
        let result = Decompilation {
            rules: vec![rule(RuleType::Allow, &["a", "b", "file"], &["read"])],
            genfs: vec![rule(RuleType::Genfscon, &["sysfs", "/kernel/foo", "sysfs_foo"], &[])],
            contexts: Contexts::new(),
            report: DecompileReport::default(),
        };
        let text = HumanFormatter::new(ColorChoice::Never).format(&result);
        assert_eq!(
            text,
            "allow a b:file read;\n\ngenfscon sysfs /kernel/foo u:object_r:sysfs_foo:s0\n"
        );
    }

    #[test]
    fn test_context_blocks_follow_genfs() {
        let mut contexts = Contexts::new();
        contexts.add(
            ContextsType::Property,
            [vec!["vendor.foo".to_string(), "u:object_r:foo_prop:s0".to_string()]],
        );
        contexts.add(
            ContextsType::File,
            [vec!["/vendor/bin/foo".to_string(), "u:object_r:foo_exec:s0".to_string()]],
        );
        let result = Decompilation {
            rules: Vec::new(),
            genfs: vec![rule(RuleType::Genfscon, &["sysfs", "/kernel/foo", "sysfs_foo"], &[])],
            contexts,
            report: DecompileReport::default(),
        };
        let text = HumanFormatter::new(ColorChoice::Never).format(&result);
        assert_eq!(
            text,
            "genfscon sysfs /kernel/foo u:object_r:sysfs_foo:s0\n\
             \n\
             # file_contexts\n\
             /vendor/bin/foo u:object_r:foo_exec:s0\n\
             \n\
             # property_contexts\n\
             vendor.foo u:object_r:foo_prop:s0\n"
        );
    }

    #[test]
    fn test_summary_lists_passes() {
        let report = DecompileReport {
            input_rules: 10,
            matches_found: 3,
            macro_calls: 2,
            rules_replaced: 5,
            passes: vec![PassReport {
                name: "merge_class_sets",
                summary: PassSummary {
                    removed: 2,
                    added: 1,
                },
            }],
            contexts_removed: BTreeMap::from([(ContextsType::File, 3)]),
            leftover_rules: 6,
            ..DecompileReport::default()
        };

        let mut out = NoColor::new(Vec::new());
        HumanFormatter::new(ColorChoice::Never)
            .write_summary(&mut out, &report)
            .unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert!(text.starts_with("Decompiled 10 rules\n"));
        assert!(text.contains("macro calls:         2 replacing 5 rules"));
        assert!(text.contains("merge_class_sets:    -2 +1"));
        assert!(text.contains("known file_contexts: 3"));
        assert!(text.ends_with("Leftover rules: 6\n"));
    }

    #[test]
    fn test_summary_colors_when_asked() {
        let report = DecompileReport {
            already_removed: 1,
            ..DecompileReport::default()
        };
        let mut out = Buffer::ansi();
        HumanFormatter::new(ColorChoice::Always)
            .write_summary(&mut out, &report)
            .unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert!(text.contains("\x1b["));
        assert!(text.contains("consumed by more than one macro call"));
    }
}
