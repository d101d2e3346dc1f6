use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::{EntityId, EntityState, Result};
use crate::marshal::Entity;
use crate::transport::proto::MutateRequest;
use crate::transport::Request;

use super::{Actor, require_id};

/// Confirmation hash the server requires before destroying `id`.
pub fn destroy_confirmation(id: &EntityId) -> String {
    format!("{:x}", Sha256::digest(id.as_str().as_bytes()))
}

impl Actor {
    /// Moves an existing entity to `state` without touching its properties.
    pub async fn transition<E: Entity>(&self, entity: &mut E, state: EntityState) -> Result<()> {
        let id = require_id(entity)?;
        let request = MutateRequest {
            schema: E::schema_key(),
            id: Some(id.clone()),
            hashed_id: entity.base().hashed_id().map(str::to_string),
            state: Some(state),
            comment: format!("state -> {}", state),
            ..MutateRequest::default()
        };
        self.call(Request::Mutate(Box::new(request)))
            .await?
            .into_mutated()?;
        entity.base_mut().set_state(state);
        Ok(())
    }

    pub async fn archive<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.transition(entity, EntityState::Archived).await
    }

    pub async fn set_offline<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.transition(entity, EntityState::Offline).await
    }

    pub async fn mark_corrupt<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.transition(entity, EntityState::Corrupt).await
    }

    pub async fn restore<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.transition(entity, EntityState::Active).await
    }

    /// Permanently deletes the entity. This cannot be undone.
    pub async fn destroy<E: Entity>(&self, id: &EntityId, reason: &str) -> Result<()> {
        let confirmation = destroy_confirmation(id);
        self.destroy_confirmed::<E>(id, &confirmation, reason).await
    }

    /// Like [`Actor::destroy`] with a caller-supplied confirmation hash.
    pub async fn destroy_confirmed<E: Entity>(&self, id: &EntityId, confirmation: &str, reason: &str) -> Result<()> {
        self.call(Request::Destroy {
            schema: E::schema_key(),
            id: id.clone(),
            confirmation: confirmation.to_string(),
            reason: reason.to_string(),
        })
        .await?
        .into_ack()?;
        info!(schema = %E::schema_key(), %id, reason, "entity destroyed");
        Ok(())
    }
}
