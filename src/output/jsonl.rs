#![forbid(unsafe_code)]

//! JSONL output formatter for machine-readable output
//!
//! Outputs one JSON object per line in a deterministic order:
//! 1. All rule records, in output order
//! 2. All genfscon records
//! 3. All context records, grouped by context file kind
//! 4. One summary record

use crate::engine::{DecompileReport, Decompilation};
use crate::policy::ContextsType;
use crate::types::Rule;
use serde::Serialize;

/// JSONL output formatter
pub struct JsonlFormatter;

impl JsonlFormatter {
    /// Creates a new JsonlFormatter
    pub fn new() -> Self {
        JsonlFormatter
    }

    /// Format a decompilation as JSONL
    pub fn format(&self, result: &Decompilation) -> String {
        let mut output = String::new();

        let rules = result
            .rules
            .iter()
            .map(|rule| ("rule", rule))
            .chain(result.genfs.iter().map(|rule| ("genfscon", rule)));
        for (record_type, rule) in rules {
            push_record(&mut output, &RuleRecord::new(record_type, rule));
        }

        for (contexts_type, entries) in result.contexts.iter() {
            for entry in entries {
                push_record(
                    &mut output,
                    &ContextRecord {
                        record_type: "context",
                        contexts_type,
                        fields: entry,
                        text: entry.join(" "),
                    },
                );
            }
        }

        push_record(
            &mut output,
            &SummaryRecord {
                record_type: "summary",
                report: &result.report,
            },
        );

        output
    }
}

impl Default for JsonlFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn push_record<T: Serialize>(output: &mut String, record: &T) {
    if let Ok(json) = serde_json::to_string(record) {
        output.push_str(&json);
        output.push('\n');
    }
}

/// Rule record for JSONL output
#[derive(Debug, Serialize)]
struct RuleRecord {
    #[serde(rename = "type")]
    record_type: &'static str,
    rule_type: String,
    /// Macro name for macro calls
    #[serde(skip_serializing_if = "Option::is_none")]
    macro_name: Option<String>,
    parts: Vec<String>,
    varargs: Vec<String>,
    text: String,
}

impl RuleRecord {
    fn new(record_type: &'static str, rule: &Rule) -> Self {
        let macro_name = rule.is_macro().then(|| rule.rule_type.to_string());
        Self {
            record_type,
            rule_type: if rule.is_macro() {
                "macro".to_string()
            } else {
                rule.rule_type.to_string()
            },
            macro_name,
            parts: rule.parts.iter().map(ToString::to_string).collect(),
            varargs: rule.varargs.iter().cloned().collect(),
            text: rule.to_string(),
        }
    }
}

/// Context file entry record for JSONL output
#[derive(Debug, Serialize)]
struct ContextRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    contexts_type: ContextsType,
    fields: &'a [String],
    text: String,
}

/// Summary record for JSONL output
#[derive(Debug, Serialize)]
struct SummaryRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    #[serde(flatten)]
    report: &'a DecompileReport,
}
