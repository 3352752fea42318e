//! Decoding of a node's observable state.
//!
//! On the wire a node answers `get` with a bracketed list of every value it
//! has accepted, e.g. `[location1 1,location2 2]`. The order on the wire is
//! irrelevant: two nodes agree when they hold the same set of values. A JSON
//! array of strings (`["location1 1","location2 2"]`) is accepted too.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The set of values observed on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSet(BTreeSet<String>);

fn trailing_index() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\s*$").expect("trailing index pattern is valid"))
}

impl StateSet {
    pub fn new() -> Self {
        StateSet(BTreeSet::new())
    }

    /// Decode a `get` response.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| format!("expected a bracketed list, got '{}'", truncate(trimmed)))?;

        if inner.trim_start().starts_with('"') {
            let values: Vec<String> = serde_json::from_str(trimmed)
                .map_err(|e| format!("invalid JSON state list: {}", e))?;
            return Ok(values.into_iter().collect());
        }

        Ok(inner
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Encode in the bracketed wire form, values in sorted order.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        self.0.insert(value.into())
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Highest integer sequence index encoded at the end of any value.
    pub fn max_sequence_index(&self) -> Option<u64> {
        self.0
            .iter()
            .filter_map(|value| {
                trailing_index()
                    .captures(value)
                    .and_then(|caps| caps[1].parse::<u64>().ok())
            })
            .max()
    }

    /// Values present in `self` but not in `other`.
    pub fn difference<'a>(&'a self, other: &'a StateSet) -> impl Iterator<Item = &'a String> {
        self.0.difference(&other.0)
    }
}

impl FromStr for StateSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateSet::decode(s)
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

impl<S: Into<String>> FromIterator<S> for StateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        StateSet(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for StateSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(64) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
