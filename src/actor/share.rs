use crate::connection::Tenant;
use crate::core::{EntityId, Result, StoreError};
use crate::marshal::{Entity, EntityRecord};
use crate::transport::proto::SharedView;
use crate::transport::Request;

use super::Actor;

impl Actor {
    /// Grants `grantee` read access to `properties` of an entity and returns
    /// the share id.
    pub async fn share_view<E: Entity>(&self, id: &EntityId, grantee: Tenant, properties: &[&str]) -> Result<String> {
        if properties.is_empty() {
            return Err(StoreError::validation(
                http::StatusCode::BAD_REQUEST,
                "a shared view needs at least one property",
            ));
        }
        self.call(Request::ShareView {
            schema: E::schema_key(),
            id: id.clone(),
            grantee,
            properties: properties.iter().map(|p| p.to_string()).collect(),
        })
        .await?
        .into_shared()
    }

    /// Views shared with this tenant, optionally limited to one type.
    pub async fn shared_views(&self, schema: Option<&str>) -> Result<Vec<SharedView>> {
        self.call(Request::SharedViews {
            schema: schema.map(str::to_string),
        })
        .await?
        .into_shared_views()
    }

    /// Reads a shared view. Secure properties arrive masked; properties
    /// outside the share are absent.
    pub async fn get_shared_by_id(&self, share_id: &str) -> Result<EntityRecord> {
        self.call(Request::GetShared {
            share_id: share_id.to_string(),
        })
        .await?
        .into_retrieved()
    }

    pub async fn get_shared_as<E: Entity>(&self, share_id: &str) -> Result<E> {
        self.get_shared_by_id(share_id).await?.decode()
    }
}
