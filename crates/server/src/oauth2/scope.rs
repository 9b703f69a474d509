//! Space-delimited scope strings.

use std::collections::BTreeSet;
use std::fmt;

/// A parsed scope: distinct tokens in the order they were first requested.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope(Vec<String>);

impl Scope {
    pub fn parse(raw: &str) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        for token in raw.split_whitespace() {
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
            }
        }
        Scope(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Every token is contained in `allowed`.
    pub fn is_subset_of(&self, allowed: &BTreeSet<String>) -> bool {
        self.0.iter().all(|t| allowed.contains(t))
    }

    pub fn to_set(&self) -> BTreeSet<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl From<&BTreeSet<String>> for Scope {
    fn from(set: &BTreeSet<String>) -> Self {
        Scope(set.iter().cloned().collect())
    }
}
