use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Timestamp;

/// Dynamically typed value. Two values are equal only when the active
/// alternative and its payload match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mixed {
    Int(i64),
    Text(String),
    Bool(bool),
    Float(f64),
    Time(Timestamp),
    Raw(Vec<u8>),
}

impl Mixed {
    pub fn time(at: DateTime<Utc>) -> Self {
        Self::Time(Timestamp::from_datetime(&at))
    }
}

impl Default for Mixed {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl fmt::Display for Mixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Time(ts) => write!(f, "{}", ts.to_datetime().to_rfc3339()),
            Self::Raw(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<i64> for Mixed {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Mixed {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Mixed {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Mixed {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Mixed {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// String-keyed map of [`Mixed`] values that tracks pending upserts and
/// removals between mutations.
///
/// A default map is untouched and is left out of mutations entirely. A map
/// built from a full set of entries, or cleared, is written as a replacement.
/// Otherwise only the recorded deltas are sent.
#[derive(Debug, Clone, Default)]
pub struct KeyMixed {
    values: BTreeMap<String, Mixed>,
    upserts: BTreeMap<String, Mixed>,
    removed: BTreeSet<String>,
    replace: bool,
}

impl KeyMixed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Mixed)>,
    {
        Self {
            values: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            replace: true,
            ..Self::default()
        }
    }

    pub fn append(&mut self, key: impl Into<String>, value: Mixed) {
        let key = key.into();
        self.values.insert(key.clone(), value.clone());
        if !self.replace {
            self.removed.remove(&key);
            self.upserts.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
        if !self.replace {
            self.upserts.remove(key);
            self.removed.insert(key.to_string());
        }
    }

    /// Drops every entry; the next mutation writes an empty replacement.
    pub fn clear(&mut self) {
        self.values.clear();
        self.upserts.clear();
        self.removed.clear();
        self.replace = true;
    }

    pub fn get(&self, key: &str) -> Option<&Mixed> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, Mixed> {
        &self.values
    }

    pub fn is_replacement(&self) -> bool {
        self.replace
    }

    pub fn pending_upserts(&self) -> &BTreeMap<String, Mixed> {
        &self.upserts
    }

    pub fn pending_removals(&self) -> &BTreeSet<String> {
        &self.removed
    }

    pub(crate) fn load(&mut self, values: BTreeMap<String, Mixed>) {
        self.values = values;
        self.mark_clean();
    }

    pub fn mark_clean(&mut self) {
        self.upserts.clear();
        self.removed.clear();
        self.replace = false;
    }
}

impl PartialEq for KeyMixed {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}
