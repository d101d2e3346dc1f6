use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// Server-assigned opaque entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    #[default]
    Active,
    Archived,
    Offline,
    Corrupt,
}

impl EntityState {
    pub const ALL: [EntityState; 4] = [
        EntityState::Active,
        EntityState::Archived,
        EntityState::Offline,
        EntityState::Corrupt,
    ];
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
            Self::Offline => write!(f, "offline"),
            Self::Corrupt => write!(f, "corrupt"),
        }
    }
}

/// Which entity states a find or list should include.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StateFilter {
    #[default]
    OnlyActive,
    IncludeArchived,
    OnlyArchived,
    WithStates(Vec<EntityState>),
    AllStates,
}

impl StateFilter {
    /// The explicit state set this filter selects.
    pub fn states(&self) -> Vec<EntityState> {
        match self {
            Self::OnlyActive => vec![EntityState::Active],
            Self::IncludeArchived => vec![EntityState::Active, EntityState::Archived],
            Self::OnlyArchived => vec![EntityState::Archived],
            Self::WithStates(states) => states.clone(),
            Self::AllStates => EntityState::ALL.to_vec(),
        }
    }

    pub fn matches(&self, state: EntityState) -> bool {
        self.states().contains(&state)
    }
}

/// Joins a property prefix and a field name into a dotted path.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// True when `path` is `root` itself or nested somewhere beneath it.
pub fn path_within(path: &str, root: &str) -> bool {
    path == root
        || (path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'.')
}

/// Flat map of dotted property paths to tagged values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySet(BTreeMap<String, Value>);

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(path.into(), value)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.0.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.0.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// True if any stored path is `root` or lives beneath it.
    pub fn has_within(&self, root: &str) -> bool {
        self.0
            .range(root.to_string()..)
            .take_while(|(path, _)| path.starts_with(root))
            .any(|(path, _)| path_within(path, root))
    }

    /// Entries at or beneath `root`.
    pub fn within<'a>(&'a self, root: &'a str) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        self.0
            .range(root.to_string()..)
            .take_while(move |(path, _)| path.starts_with(root))
            .filter(move |(path, _)| path_within(path, root))
    }

    /// Keeps only paths covered by `selection`. A selected path covers itself
    /// and everything nested beneath it.
    pub fn retain_selected(&mut self, selection: &[String]) {
        self.0
            .retain(|path, _| selection.iter().any(|selected| path_within(path, selected)));
    }

    pub fn extend(&mut self, other: PropertySet) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertySet {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
