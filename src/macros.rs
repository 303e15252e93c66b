//! Macro library: rule templates and named groups

pub mod library;

pub use library::{
    MacroDefinition, MacroKind, MacroLibrary, MacroTemplate, NamedGroup, split_definitions,
};
