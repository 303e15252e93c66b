//! Nested-group tokenizer for CIL and source-syntax statements
//!
//! A single explicit-stack pass splits a statement into atoms and groups.
//! CIL statements are parenthesized; source statements use braces for sets
//! and are treated as one implicit outer group.

use crate::error::TokenizeError;

/// An atom or a nested group of tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    Group(Vec<Token>),
}

impl Token {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Token::Atom(s) => Some(s),
            Token::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&[Token]> {
        match self {
            Token::Group(tokens) => Some(tokens),
            Token::Atom(_) => None,
        }
    }

    pub fn is_atom(&self, value: &str) -> bool {
        self.as_atom() == Some(value)
    }
}

/// Delimiter configuration for [`unpack`]
#[derive(Debug, Clone, Copy)]
pub struct UnpackOptions {
    pub open: char,
    pub close: char,
    /// Characters that end an atom
    pub separators: &'static str,
    /// Treat the whole input as if it were wrapped in `open` ... `close`
    pub wrap: bool,
    /// Characters dropped from the input
    pub ignored: &'static str,
}

impl UnpackOptions {
    /// `(allow a b (file (read)))`
    pub const CIL: UnpackOptions = UnpackOptions {
        open: '(',
        close: ')',
        separators: " \t",
        wrap: false,
        ignored: "",
    };

    /// `allow a { b c }:file { read open };`
    pub const SOURCE: UnpackOptions = UnpackOptions {
        open: '{',
        close: '}',
        separators: " \t:,",
        wrap: true,
        ignored: ";",
    };

    /// Source syntax split on whitespace only, for `genfscon` labels
    pub const SOURCE_WORDS: UnpackOptions = UnpackOptions {
        open: '{',
        close: '}',
        separators: " \t",
        wrap: true,
        ignored: ";",
    };
}

/// Split `text` into nested groups
///
/// Returns the contents of the outer group. Empty input yields an empty list.
pub fn unpack(text: &str, options: &UnpackOptions) -> Result<Vec<Token>, TokenizeError> {
    let mut stack: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut atom = String::new();

    let flush = |atom: &mut String, current: &mut Vec<Token>| {
        if !atom.is_empty() {
            current.push(Token::Atom(std::mem::take(atom)));
        }
    };

    let opening = options.wrap.then_some(options.open);
    let closing = options.wrap.then_some(options.close);
    let chars = opening
        .into_iter()
        .chain(text.chars())
        .chain(closing)
        .enumerate();

    for (column, c) in chars {
        if options.ignored.contains(c) {
            continue;
        }

        if c == options.open {
            flush(&mut atom, &mut current);
            stack.push(std::mem::take(&mut current));
        } else if c == options.close {
            flush(&mut atom, &mut current);
            let Some(mut parent) = stack.pop() else {
                return Err(TokenizeError::UnmatchedClose {
                    close: options.close,
                    column,
                });
            };
            parent.push(Token::Group(std::mem::take(&mut current)));
            current = parent;
        } else if options.separators.contains(c) || c == '\n' || c == '\r' {
            flush(&mut atom, &mut current);
        } else {
            atom.push(c);
        }
    }
    flush(&mut atom, &mut current);

    if !stack.is_empty() {
        return Err(TokenizeError::UnclosedGroup { depth: stack.len() });
    }

    let mut outer = current.into_iter();
    match (outer.next(), outer.next()) {
        (None, _) => Ok(Vec::new()),
        (Some(Token::Group(tokens)), None) => Ok(tokens),
        (Some(Token::Group(_)), Some(_)) => Err(TokenizeError::TrailingInput {
            close: options.close,
        }),
        (Some(Token::Atom(_)), _) => Err(TokenizeError::MissingGroup { open: options.open }),
    }
}

/// Collect every atom of a token tree in order
pub fn flatten(tokens: &[Token]) -> Vec<&str> {
    let mut atoms = Vec::new();
    flatten_into(tokens, &mut atoms);
    atoms
}

fn flatten_into<'a>(tokens: &'a [Token], atoms: &mut Vec<&'a str>) {
    for token in tokens {
        match token {
            Token::Atom(s) => atoms.push(s),
            Token::Group(inner) => flatten_into(inner, atoms),
        }
    }
}

/// [`flatten`] applied to a single token
pub fn flatten_token(token: &Token) -> Vec<&str> {
    flatten(std::slice::from_ref(token))
}
