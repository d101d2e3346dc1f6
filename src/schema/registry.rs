use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::core::{Result, StoreError};
use crate::marshal::Entity;

use super::descriptor::TypeDefinition;

/// Type definitions known to a connection, keyed by schema key.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<BTreeMap<String, TypeDefinition>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives and validates the definition of `E`. Returns the definition
    /// and whether it was newly added.
    pub fn register<E: Entity>(&self) -> Result<(TypeDefinition, bool)> {
        let definition = E::type_definition()?;
        self.insert(definition)
    }

    pub fn insert(&self, definition: TypeDefinition) -> Result<(TypeDefinition, bool)> {
        definition.validate()?;

        let mut types = self
            .types
            .write()
            .map_err(|_| StoreError::Schema("Type registry lock poisoned".into()))?;

        match types.get(&definition.key) {
            Some(existing) if *existing == definition => Ok((definition, false)),
            Some(_) => Err(StoreError::Schema(format!(
                "type '{}' is already registered with a different shape",
                definition.key
            ))),
            None => {
                debug!(schema = %definition.key, properties = definition.properties.len(), "registered type");
                types.insert(definition.key.clone(), definition.clone());
                Ok((definition, true))
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<TypeDefinition> {
        self.types.read().ok().and_then(|types| types.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.types
            .read()
            .map(|types| types.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.types.read().map(|types| types.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
