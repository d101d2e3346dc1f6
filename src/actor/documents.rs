use std::collections::BTreeMap;

use tracing::debug;

use crate::core::{EntityId, Result, StoreError};
use crate::marshal::{Document, DocumentOp, Entity, RevisionInfo};

use super::{Actor, MutateOptions, RetrieveOptions};

/// Selection that matches no property, so document mutations leave
/// properties untouched.
const DOCUMENT_ONLY: &str = "_document";

impl Actor {
    /// Writes a new document revision and returns its id.
    pub async fn write_document<E: Entity>(
        &self,
        entity: &mut E,
        content_type: &str,
        data: impl Into<Vec<u8>>,
        meta: BTreeMap<String, String>,
    ) -> Result<String> {
        let op = DocumentOp::Write {
            content_type: content_type.to_string(),
            data: data.into(),
            meta,
        };
        let result = self.document_mutation(entity, op).await?;
        result.ok_or_else(|| StoreError::Codec("document write returned no revision".into()))
    }

    /// Latest document, or the given revision.
    pub async fn load_document<E: Entity>(&self, id: &EntityId, revision: Option<&str>) -> Result<Document> {
        let options = match revision {
            Some(revision) => RetrieveOptions::new().without_properties().with_revision(revision),
            None => RetrieveOptions::new().without_properties().with_document(),
        };
        self.get_record::<E>(id, options)
            .await?
            .document
            .ok_or_else(|| StoreError::EntityNotFound(format!("document of {}", id)))
    }

    pub async fn document_revisions<E: Entity>(&self, id: &EntityId) -> Result<Vec<RevisionInfo>> {
        let options = RetrieveOptions::new().without_properties().with_revision_list();
        Ok(self.get_record::<E>(id, options).await?.revisions)
    }

    /// Adds and removes metadata on an existing revision, then reads the
    /// revision back. The data of the revision is never changed.
    pub async fn update_revision<E: Entity>(
        &self,
        entity: &mut E,
        revision: &str,
        add: BTreeMap<String, String>,
        remove: Vec<String>,
    ) -> Result<Document> {
        if !add.is_empty() {
            self.document_mutation(
                entity,
                DocumentOp::AddMeta {
                    revision: revision.to_string(),
                    meta: add,
                },
            )
            .await?;
        }
        if !remove.is_empty() {
            self.document_mutation(
                entity,
                DocumentOp::RemoveMeta {
                    revision: revision.to_string(),
                    keys: remove,
                },
            )
            .await?;
        }
        debug!(revision, "revision metadata updated");
        let id = entity.base().id().clone();
        self.load_document::<E>(&id, Some(revision)).await
    }

    async fn document_mutation<E: Entity>(&self, entity: &mut E, op: DocumentOp) -> Result<Option<String>> {
        let options = MutateOptions::new().select([DOCUMENT_ONLY]).document(op);
        Ok(self.mutate(entity, options).await?.revision)
    }
}
