use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::core::EntityId;

/// Closed numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Reference to a record held in another system.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExternalId {
    pub vendor: String,
    pub app: String,
    pub entity_type: String,
    pub id: String,
}

impl ExternalId {
    pub fn new(
        vendor: impl Into<String>,
        app: impl Into<String>,
        entity_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            app: app.into(),
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("vendor".to_string(), self.vendor.clone()),
            ("app".to_string(), self.app.clone()),
            ("type".to_string(), self.entity_type.clone()),
            ("id".to_string(), self.id.clone()),
        ])
    }

    pub(crate) fn from_map(map: &BTreeMap<String, String>) -> Self {
        let field = |key: &str| map.get(key).cloned().unwrap_or_default();
        Self {
            vendor: field("vendor"),
            app: field("app"),
            entity_type: field("type"),
            id: field("id"),
        }
    }
}

/// Text keyed by language tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Translations(pub BTreeMap<String, String>);

impl Translations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.0.insert(language.into(), text.into());
        self
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonName {
    pub title: String,
    pub first: String,
    pub middle: String,
    pub last: String,
}

impl PersonName {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for PersonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [&self.title, &self.first, &self.middle, &self.last]
            .into_iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Email(pub String);

impl Email {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn domain(&self) -> Option<&str> {
        self.0.rsplit_once('@').map(|(_, domain)| domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Phone(pub String);

impl Phone {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }
}

/// Entity identifier tagged with the entity type it refers to.
pub struct Id<T> {
    id: EntityId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            _marker: PhantomData,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new(EntityId::default())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.id)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
