use serde::{Deserialize, Serialize};

use crate::core::{EntityId, EntityState, PropertySet, Result, StoreError};

use super::encoder::Decoder;
use super::sections::{Document, Relationship, RevisionInfo, StoredObject, Summary};
use super::{Entity, Properties};

/// One entity as returned by a retrieve, find, list or lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub schema: String,
    pub hashed_id: Option<String>,
    pub state: EntityState,
    /// `None` when properties were not requested or not loaded.
    pub properties: Option<PropertySet>,
    pub labels: Vec<String>,
    pub relationships: Vec<Relationship>,
    pub summary: Option<Summary>,
    pub objects: Vec<StoredObject>,
    pub document: Option<Document>,
    pub revisions: Vec<RevisionInfo>,
}

impl EntityRecord {
    pub fn properties(&self) -> Option<&PropertySet> {
        self.properties.as_ref()
    }

    /// Hydrates `entity` from this record.
    pub fn decode_into<E: Entity>(&self, entity: &mut E) -> Result<()> {
        if self.schema != E::schema_key() && !self.schema.is_empty() {
            return Err(StoreError::Marshal(format!(
                "record of type '{}' cannot decode into '{}'",
                self.schema,
                E::schema_key()
            )));
        }

        let empty = PropertySet::new();
        let properties = self.properties.as_ref().unwrap_or(&empty);
        entity.decode_properties("", &Decoder::new(properties))?;
        entity.mark_properties_clean();
        entity.base_mut().load(self);
        Ok(())
    }

    pub fn decode<E: Entity>(&self) -> Result<E> {
        let mut entity = E::default();
        self.decode_into(&mut entity)?;
        Ok(entity)
    }
}

/// Decodes every record into a fresh entity.
pub fn decode_all<E: Entity>(records: &[EntityRecord]) -> Result<Vec<E>> {
    records.iter().map(EntityRecord::decode).collect()
}
