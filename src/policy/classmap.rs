//! Class-to-permissions map parsed from an `access_vectors` file

use std::collections::{BTreeSet, HashMap};

use crate::error::{ParseError, ParseErrorKind};
use crate::policy::significant_lines;

/// Every class and the full list of permissions it supports
#[derive(Debug, Clone, Default)]
pub struct Classmap {
    classes: HashMap<String, BTreeSet<String>>,
}

impl Classmap {
    /// Parse `common` and `class` declarations
    ///
    /// `class X inherits C { ... }` gets the permissions of `common C` plus its own.
    pub fn parse(text: &str, source_name: &str) -> Result<Self, ParseError> {
        let tokens: Vec<(usize, &str)> = significant_lines(text)
            .flat_map(|(line, content)| content.split_whitespace().map(move |t| (line, t)))
            .collect();

        let mut commons: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut classes: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut i = 0;

        let err = |line: usize, kind: ParseErrorKind| ParseError::new(source_name, line, kind);

        while let Some(&(line, keyword)) = tokens.get(i) {
            let is_common = match keyword {
                "common" => true,
                "class" => false,
                other => return Err(err(line, ParseErrorKind::UnknownTag(other.to_string()))),
            };
            i += 1;

            let Some(&(_, name)) = tokens.get(i) else {
                return Err(err(line, ParseErrorKind::shape(keyword, "missing name")));
            };
            i += 1;

            let mut perms = BTreeSet::new();

            if let Some(&(line, "inherits")) = tokens.get(i) {
                if is_common {
                    return Err(err(line, ParseErrorKind::shape(keyword, "a common cannot inherit")));
                }
                let Some(&(_, parent)) = tokens.get(i + 1) else {
                    return Err(err(line, ParseErrorKind::shape(keyword, "missing inherited name")));
                };
                let Some(inherited) = commons.get(parent) else {
                    return Err(err(line, ParseErrorKind::UnknownClass(parent.to_string())));
                };
                perms.extend(inherited.iter().cloned());
                i += 2;
            }

            if let Some(&(_, "{")) = tokens.get(i) {
                i += 1;
                loop {
                    match tokens.get(i) {
                        Some(&(_, "}")) => break,
                        Some(&(_, perm)) => perms.insert(perm.to_string()),
                        None => {
                            return Err(err(line, ParseErrorKind::shape(keyword, "unclosed permission list")));
                        }
                    };
                    i += 1;
                }
                i += 1;
            }

            let map = if is_common { &mut commons } else { &mut classes };
            if map.insert(name.to_string(), perms).is_some() {
                return Err(err(line, ParseErrorKind::DuplicateDefinition(name.to_string())));
            }
        }

        Ok(Self { classes })
    }

    pub fn from_classes<I, P>(classes: I) -> Self
    where
        I: IntoIterator<Item = (String, P)>,
        P: IntoIterator<Item = String>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|(class, perms)| (class, perms.into_iter().collect()))
                .collect(),
        }
    }

    /// Full permission set of a class
    pub fn class_perms(&self, class: &str) -> Option<&BTreeSet<String>> {
        self.classes.get(class)
    }

    /// Classes whose name ends with `suffix`, sorted
    pub fn classes_ending_with(&self, suffix: &str) -> Vec<&str> {
        let mut classes: Vec<&str> = self
            .classes
            .keys()
            .filter(|c| c.ends_with(suffix))
            .map(String::as_str)
            .collect();
        classes.sort_unstable();
        classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
