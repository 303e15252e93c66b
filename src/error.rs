//! Error types for the decompiler
//!
//! Errors follow a hierarchical structure: tokenizer and decoder errors are
//! wrapped in a [`ParseError`] that carries the source location, engine
//! failures are [`InvariantViolation`]s, and everything converts into the
//! top-level [`DecompileError`].

use std::path::PathBuf;

use crate::input::file_walker::FileWalkerError;

/// Errors raised while splitting a statement into nested token groups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    /// A close character with no matching open character
    #[error("unmatched '{close}' at column {column}")]
    UnmatchedClose { close: char, column: usize },

    /// Input ended while a group was still open
    #[error("{depth} unclosed group(s) at end of input")]
    UnclosedGroup { depth: usize },

    /// Input does not start with a group
    #[error("expected the statement to start with '{open}'")]
    MissingGroup { open: char },

    /// More tokens follow the outer group
    #[error("unexpected input after the closing '{close}'")]
    TrailingInput { close: char },
}

/// What went wrong while decoding one statement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    /// Statement tag is not a known rule keyword
    #[error("unknown rule tag '{0}'")]
    UnknownTag(String),

    /// Statement has the wrong number of fields for its tag
    #[error("'{tag}' expects {expected} fields, found {found}")]
    Arity {
        tag: String,
        expected: String,
        found: usize,
    },

    /// A field has the wrong structure
    #[error("malformed '{tag}' statement: {message}")]
    Shape { tag: String, message: String },

    /// A generated type name was defined twice with different expressions
    #[error("generated type '{0}' is defined twice")]
    DuplicateDefinition(String),

    /// An ioctl value or range bound is not a number
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// A `*` or `~` permission list needs the class map
    #[error("permission list for class '{0}' needs a class map")]
    MissingClassmap(String),

    /// The class map has no entry for a class
    #[error("unknown class '{0}'")]
    UnknownClass(String),
}

impl ParseErrorKind {
    pub(crate) fn shape(tag: &str, message: impl Into<String>) -> Self {
        ParseErrorKind::Shape {
            tag: tag.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn arity(tag: &str, expected: impl Into<String>, found: usize) -> Self {
        ParseErrorKind::Arity {
            tag: tag.to_string(),
            expected: expected.into(),
            found,
        }
    }
}

/// A decoding failure with the location of the offending statement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source_name}:{line}: {kind}")]
pub struct ParseError {
    pub source_name: String,
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(source_name: impl Into<String>, line: usize, kind: ParseErrorKind) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            kind,
        }
    }
}

/// Internal consistency failures of the matching engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A set pattern unified with a concrete set in more than one way
    #[error("set {template} unifies with {concrete} in {count} different ways")]
    AmbiguousSet {
        template: String,
        concrete: String,
        count: usize,
    },

    /// A completed match has no entry in the reverse index
    #[error("match {0} is missing from the reverse index")]
    OrphanMatch(String),
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid TOML syntax or schema
    #[error("Invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration is well-formed but unusable
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Invalid configuration value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum DecompileError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Internal error: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("File discovery error: {0}")]
    Discovery(#[from] FileWalkerError),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
