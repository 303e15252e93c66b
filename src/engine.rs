//! Macro matching and rule rewriting

pub mod index;
pub mod matcher;
pub mod passes;
pub mod pipeline;
pub mod subsume;
pub mod unify;

pub use index::{RuleStore, SharedRule, WildcardIndex};
pub use matcher::{MacroMatcher, RuleMatch};
pub use passes::PassSummary;
pub use pipeline::{DecompileReport, Decompilation, Decompiler, PassReport};
pub use unify::{Bindings, Unifier};
