use crate::connection::Tenant;
use crate::core::{EntityId, Result, StoreError};
use crate::marshal::{Entity, EntityRecord};
use crate::schema::CountSource;
use crate::transport::proto::{DocumentSelection, PropertySelection, RetrieveRequest, Target};
use crate::transport::Request;

use super::{Actor, require_id};

/// Which sections a retrieve loads. The default loads every property and
/// nothing else.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    properties: PropertySelection,
    decrypt: bool,
    summary: bool,
    objects: Option<Vec<String>>,
    document: DocumentSelection,
    revision_list: bool,
    descendant_counts: Vec<String>,
    relation_counts: Vec<String>,
    labels: bool,
    relationships: Option<Vec<String>>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            properties: PropertySelection::All,
            decrypt: false,
            summary: false,
            objects: None,
            document: DocumentSelection::None,
            revision_list: false,
            descendant_counts: Vec::new(),
            relation_counts: Vec::new(),
            labels: false,
            relationships: None,
        }
    }
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity and requested sections only.
    pub fn without_properties(mut self) -> Self {
        self.properties = PropertySelection::None;
        self
    }

    pub fn only<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = PropertySelection::Only(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Returns plaintext for secure properties the caller may read.
    pub fn decrypted(mut self) -> Self {
        self.decrypt = true;
        self
    }

    pub fn with_summary(mut self) -> Self {
        self.summary = true;
        self
    }

    pub fn with_objects(mut self) -> Self {
        self.objects = Some(Vec::new());
        self
    }

    pub fn with_objects_at<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objects = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_document(mut self) -> Self {
        self.document = DocumentSelection::Latest;
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.document = DocumentSelection::Revision(revision.into());
        self
    }

    pub fn with_revision_list(mut self) -> Self {
        self.revision_list = true;
        self
    }

    /// Requests the number of descendants of the given schema.
    pub fn with_descendant_count(mut self, schema: impl Into<String>) -> Self {
        self.descendant_counts.push(schema.into());
        self
    }

    /// Requests the number of relationships under `key`.
    pub fn with_relation_count(mut self, key: impl Into<String>) -> Self {
        self.relation_counts.push(key.into());
        self
    }

    /// Requests every synthetic count declared on `E`.
    pub fn with_declared_counts<E: Entity>(mut self) -> Result<Self> {
        let definition = E::type_definition()?;
        for source in definition.properties.iter().filter_map(|p| p.count.clone()) {
            match source {
                CountSource::Relation(key) => self.relation_counts.push(key),
                CountSource::Descendant(schema) => self.descendant_counts.push(schema),
            }
        }
        Ok(self)
    }

    pub fn with_labels(mut self) -> Self {
        self.labels = true;
        self
    }

    pub fn with_relationships<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_all_relationships(self) -> Self {
        self.with_relationships(Vec::<String>::new())
    }

    fn request(self, schema: String, target: Target, owner: Option<Tenant>) -> RetrieveRequest {
        RetrieveRequest {
            schema,
            target,
            owner,
            properties: self.properties,
            decrypt: self.decrypt,
            summary: self.summary,
            objects: self.objects,
            document: self.document,
            revision_list: self.revision_list,
            descendant_counts: self.descendant_counts,
            relation_counts: self.relation_counts,
            labels: self.labels,
            relationships: self.relationships,
        }
    }
}

impl Actor {
    /// Raw record for `target`. Fails with `PropertiesNotLoaded` when
    /// properties were requested but the record carries none.
    pub async fn get_record<E: Entity>(&self, target: impl Into<Target>, options: RetrieveOptions) -> Result<EntityRecord> {
        self.retrieve(E::schema_key(), target.into(), None, options).await
    }

    pub async fn get<E: Entity>(&self, target: impl Into<Target>, options: RetrieveOptions) -> Result<E> {
        self.get_record::<E>(target, options).await?.decode()
    }

    /// Re-reads `entity` by its id, replacing its loaded state.
    pub async fn reload<E: Entity>(&self, entity: &mut E, options: RetrieveOptions) -> Result<()> {
        let id = require_id(entity)?;
        let record = self.get_record::<E>(id, options).await?;
        *entity = E::default();
        record.decode_into(entity)
    }

    /// Reads an entity owned by another tenant.
    pub async fn remote_get<E: Entity>(&self, owner: Tenant, id: &EntityId, options: RetrieveOptions) -> Result<E> {
        self.retrieve(E::schema_key(), Target::from(id), Some(owner), options)
            .await?
            .decode()
    }

    async fn retrieve(
        &self,
        schema: String,
        target: Target,
        owner: Option<Tenant>,
        options: RetrieveOptions,
    ) -> Result<EntityRecord> {
        let wants_properties = options.properties != PropertySelection::None;
        let described = target.to_string();
        let request = options.request(schema, target, owner);
        let record = self
            .call(Request::Retrieve(Box::new(request)))
            .await?
            .into_retrieved()?;
        if wants_properties && record.properties.is_none() {
            return Err(StoreError::PropertiesNotLoaded(described));
        }
        Ok(record)
    }
}
