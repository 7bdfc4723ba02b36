use crate::keys::StitchKey;
use crate::value::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Uninformative values that must never produce a stitch edge, per key.
///
/// String values match case-insensitively after trimming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blacklist {
    values: BTreeMap<StitchKey, BTreeSet<String>>,
}

/// One `[[blacklist]]` table of a mapping file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub key: StitchKey,
    pub values: Vec<String>,
}

fn token(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, key: StitchKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for v in values {
            self.insert(key, v.as_ref());
        }
        self
    }

    pub fn insert(&mut self, key: StitchKey, value: &str) {
        let token = token(value);
        if !token.is_empty() {
            self.values.entry(key).or_default().insert(token);
        }
    }

    pub fn extend(&mut self, other: &Blacklist) {
        for (key, values) in &other.values {
            self.values.entry(*key).or_default().extend(values.iter().cloned());
        }
    }

    pub fn contains(&self, key: StitchKey, value: &Scalar) -> bool {
        self.values
            .get(&key)
            .map(|set| set.contains(&token(&value.to_string())))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&[BlacklistEntry]> for Blacklist {
    fn from(entries: &[BlacklistEntry]) -> Self {
        entries
            .iter()
            .fold(Blacklist::new(), |acc, e| acc.with(e.key, &e.values))
    }
}
