//! Policy decoding
//!
//! Turns compiled CIL, source-syntax rules and `access_vectors` files into
//! [`Rule`](crate::types::Rule) values, and reads context files.

pub mod cil;
pub mod classmap;
pub mod contexts;
pub mod resolver;
pub mod source;
pub mod tokenizer;

pub use cil::{CilPolicy, GeneratedType, parse_cil};
pub use classmap::Classmap;
pub use contexts::{ContextEntry, Contexts, ContextsType, parse_contexts};
pub use resolver::{TypeNaming, TypeResolver, VersionedNaming};
pub use source::{parse_genfs_contexts, parse_source};

/// Non-empty lines with `#` comments removed, numbered from 1
pub(crate) fn significant_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(index, line)| {
        let content = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let content = content.trim();
        (!content.is_empty()).then_some((index + 1, content))
    })
}
