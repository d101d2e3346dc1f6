use crate::core::{EntityId, PropertySet, Result, StoreError, Value};
use crate::marshal::Entity;
use crate::transport::proto::{DynamicPropertiesRequest, GetDynamicPropertiesRequest};
use crate::transport::Request;

use super::Actor;

/// Suffix that turns a dynamic property key into a prefix match.
pub const PREFIX_WILDCARD: char = '~';

impl Actor {
    /// Stores `value` under `key` in the application key-value store.
    pub async fn akv_put(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::validation(http::StatusCode::BAD_REQUEST, "akv key is empty"));
        }
        self.call(Request::AkvPut {
            key: key.to_string(),
            value: value.into(),
        })
        .await?
        .into_ack()
    }

    pub async fn akv_get(&self, key: &str) -> Result<Option<Value>> {
        self.call(Request::AkvGet { key: key.to_string() })
            .await?
            .into_akv()
    }

    /// Sets properties outside the declared schema of an entity.
    pub async fn set_dynamic_properties<E: Entity>(&self, id: &EntityId, properties: PropertySet) -> Result<()> {
        let request = DynamicPropertiesRequest {
            schema: E::schema_key(),
            id: id.clone(),
            properties,
        };
        self.call(Request::SetDynamicProperties(request))
            .await?
            .into_ack()
    }

    /// Reads dynamic properties. A key ending in `~` selects every key
    /// with that prefix.
    pub async fn get_dynamic_properties<E: Entity>(&self, id: &EntityId, keys: &[&str]) -> Result<PropertySet> {
        let request = GetDynamicPropertiesRequest {
            schema: E::schema_key(),
            id: id.clone(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        };
        self.call(Request::GetDynamicProperties(request))
            .await?
            .into_properties()
    }
}

/// True when dynamic property `path` is selected by `key`.
pub fn key_selects(key: &str, path: &str) -> bool {
    match key.strip_suffix(PREFIX_WILDCARD) {
        Some(prefix) => path.starts_with(prefix),
        None => key == path,
    }
}
