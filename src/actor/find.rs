use crate::core::{EntityState, Result, StateFilter, StoreError, Value};
use crate::marshal::{Entity, EntityRecord, decode_all};
use crate::transport::proto::{
    FindRequest, ListRequest, LookupRequest, Predicate, PropertySelection, Sort,
};
use crate::transport::Request;

use super::Actor;

/// Predicate query. Predicates are combined with AND.
#[derive(Debug, Clone)]
pub struct FindQuery {
    predicates: Vec<Predicate>,
    states: StateFilter,
    properties: PropertySelection,
    limit: Option<u32>,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            states: StateFilter::OnlyActive,
            properties: PropertySelection::All,
            limit: None,
        }
    }
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn states(mut self, filter: StateFilter) -> Self {
        self.states = filter;
        self
    }

    pub fn include_archived(self) -> Self {
        self.states(StateFilter::IncludeArchived)
    }

    pub fn only_archived(self) -> Self {
        self.states(StateFilter::OnlyArchived)
    }

    pub fn with_states(self, states: Vec<EntityState>) -> Self {
        self.states(StateFilter::WithStates(states))
    }

    pub fn all_states(self) -> Self {
        self.states(StateFilter::AllStates)
    }

    pub fn properties(mut self, selection: PropertySelection) -> Self {
        self.properties = selection;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Paged listing of a projection of fields.
#[derive(Debug, Clone)]
pub struct ListQuery {
    fields: Vec<String>,
    limit: u32,
    offset: u32,
    sort: Vec<Sort>,
    predicates: Vec<Predicate>,
    states: StateFilter,
}

impl ListQuery {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            limit: 100,
            offset: 0,
            sort: Vec::new(),
            predicates: Vec::new(),
            states: StateFilter::OnlyActive,
        }
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            ascending,
        });
        self
    }

    pub fn matching(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn states(mut self, filter: StateFilter) -> Self {
        self.states = filter;
        self
    }
}

impl Actor {
    pub async fn find<E: Entity>(&self, query: FindQuery) -> Result<Vec<EntityRecord>> {
        let request = FindRequest {
            schema: E::schema_key(),
            predicates: query.predicates,
            states: query.states.states(),
            properties: query.properties,
            limit: query.limit,
        };
        self.call(Request::Find(request)).await?.into_records()
    }

    /// [`Actor::find`] decoded into entities.
    pub async fn find_as<E: Entity>(&self, query: FindQuery) -> Result<Vec<E>> {
        decode_all(&self.find::<E>(query).await?)
    }

    pub async fn list<E: Entity>(&self, query: ListQuery) -> Result<Vec<EntityRecord>> {
        if query.fields.is_empty() {
            return Err(StoreError::Schema(format!(
                "list over '{}' needs at least one field",
                E::schema_key()
            )));
        }
        let request = ListRequest {
            schema: E::schema_key(),
            fields: query.fields,
            limit: query.limit,
            offset: query.offset,
            sort: query.sort,
            predicates: query.predicates,
            states: query.states.states(),
        };
        self.call(Request::List(request)).await?.into_records()
    }

    /// Entities whose `property` equals `value`. The property must be
    /// declared `lookup` or `unique` when `E` is registered locally.
    pub async fn lookup<E: Entity>(&self, property: &str, value: impl Into<Value>) -> Result<Vec<EntityRecord>> {
        if let Some(definition) = self.connection().registry().get(&E::schema_key()) {
            let searchable = definition
                .property(property)
                .map(|p| p.flags.lookup || p.flags.unique)
                .unwrap_or(false);
            if !searchable {
                return Err(StoreError::Schema(format!(
                    "property '{}' of '{}' is not declared lookup or unique",
                    property,
                    E::schema_key()
                )));
            }
        }

        let request = LookupRequest {
            schema: E::schema_key(),
            property: property.to_string(),
            value: value.into(),
            properties: PropertySelection::All,
        };
        self.call(Request::Lookup(request)).await?.into_records()
    }

    /// Exactly one match; none is `EntityNotFound`, several is a conflict.
    pub async fn lookup_one<E: Entity>(&self, property: &str, value: impl Into<Value>) -> Result<E> {
        let value = value.into();
        let described = format!("{} = {}", property, value);
        let mut records = self.lookup::<E>(property, value).await?;
        match records.len() {
            0 => Err(StoreError::EntityNotFound(described)),
            1 => records.remove(0).decode(),
            n => Err(StoreError::conflict(format!("lookup {} matched {} entities", described, n))),
        }
    }
}
