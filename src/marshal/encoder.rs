use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{EntityId, PropertySet, Result, StoreError, Timestamp, Value, path_within};
use crate::values::Mixed;

use super::base::PendingWrites;
use super::Entity;

/// Add/remove pair for a set-like property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    Strings {
        path: String,
        add: Vec<String>,
        remove: Vec<String>,
    },
    Ints {
        path: String,
        add: Vec<i64>,
        remove: Vec<i64>,
    },
    Keyed {
        path: String,
        upsert: BTreeMap<String, Mixed>,
        remove: Vec<String>,
    },
}

impl Delta {
    pub fn path(&self) -> &str {
        match self {
            Self::Strings { path, .. } | Self::Ints { path, .. } | Self::Keyed { path, .. } => path,
        }
    }
}

/// A path is selected when no selection was given, or when it equals or
/// nests beneath one of the selected paths.
pub fn is_selected(path: &str, selection: &[String]) -> bool {
    selection.is_empty() || selection.iter().any(|s| path_within(path, s))
}

/// Collects the property set and deltas of one encode pass.
pub struct Encoder<'a> {
    selection: &'a [String],
    properties: PropertySet,
    deltas: Vec<Delta>,
    rejected: Vec<String>,
}

impl<'a> Encoder<'a> {
    pub fn new(selection: &'a [String]) -> Self {
        Self {
            selection,
            properties: PropertySet::new(),
            deltas: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn is_selected(&self, path: &str) -> bool {
        is_selected(path, self.selection)
    }

    /// Records a value that cannot be stored at `path`. The pass fails when
    /// it finishes.
    pub fn reject(&mut self, path: &str, reason: impl Into<String>) {
        self.rejected.push(format!("property '{}': {}", path, reason.into()));
    }

    pub fn put(&mut self, path: &str, value: Value) {
        if self.is_selected(path) {
            self.properties.insert(path, value);
        }
    }

    pub fn delta(&mut self, delta: Delta) {
        if self.is_selected(delta.path()) {
            self.deltas.push(delta);
        }
    }

    pub fn finish(self) -> Result<(PropertySet, Vec<Delta>)> {
        match self.rejected.into_iter().next() {
            Some(reason) => Err(StoreError::Marshal(reason)),
            None => Ok((self.properties, self.deltas)),
        }
    }
}

/// Read side of the marshaller over a received property set.
pub struct Decoder<'a> {
    properties: &'a PropertySet,
}

impl<'a> Decoder<'a> {
    pub fn new(properties: &'a PropertySet) -> Self {
        Self { properties }
    }

    pub fn get(&self, path: &str) -> Option<&'a Value> {
        self.properties.get(path)
    }

    pub fn has_within(&self, path: &str) -> bool {
        self.properties.has_within(path)
    }

    pub fn within<'p>(&'p self, path: &'p str) -> impl Iterator<Item = (&'p String, &'p Value)> + 'p {
        self.properties.within(path)
    }
}

/// Everything a mutation carries for one entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Encoded {
    pub schema: String,
    pub id: Option<EntityId>,
    pub hashed_id: Option<String>,
    pub properties: PropertySet,
    pub deltas: Vec<Delta>,
    pub parent: Option<EntityId>,
    pub input_time: Option<Timestamp>,
    pub pending: PendingWrites,
}

/// Encodes `entity`, restricted to `selection` when it is non-empty.
pub fn encode_entity<E: Entity>(entity: &E, selection: &[String]) -> Result<Encoded> {
    let mut encoder = Encoder::new(selection);
    entity.encode_properties("", &mut encoder);
    let (properties, deltas) = encoder.finish()?;

    let base = entity.base();
    Ok(Encoded {
        schema: E::schema_key(),
        id: base.has_id().then(|| base.id().clone()),
        hashed_id: base.hashed_id().map(str::to_string),
        properties,
        deltas,
        parent: entity
            .child_link()
            .filter(|link| link.is_linked())
            .map(|link| link.parent().clone()),
        input_time: entity
            .time_series()
            .and_then(|ts| ts.time())
            .map(|at| Timestamp::from_datetime(&at)),
        pending: base.pending().clone(),
    })
}
