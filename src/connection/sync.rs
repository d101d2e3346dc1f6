use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::core::{Result, StoreError};
use crate::schema::TypeDefinition;
use crate::transport::proto::{Request, TypeAck, TypeStatus};

use super::Connection;

/// Type definitions registered locally but not yet pushed to the server.
#[derive(Debug, Default)]
pub struct SchemaSynchronizer {
    pending: Mutex<Vec<TypeDefinition>>,
}

impl SchemaSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, definition: TypeDefinition) -> Result<()> {
        let mut pending = self.lock()?;
        if !pending.iter().any(|d| d.key == definition.key) {
            pending.push(definition);
        }
        Ok(())
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.pending
            .lock()
            .map(|p| p.iter().map(|d| d.key.clone()).collect())
            .unwrap_or_default()
    }

    fn take(&self) -> Result<Vec<TypeDefinition>> {
        Ok(std::mem::take(&mut *self.lock()?))
    }

    fn requeue(&self, definitions: Vec<TypeDefinition>) {
        if let Ok(mut pending) = self.pending.lock() {
            for definition in definitions {
                if !pending.iter().any(|d| d.key == definition.key) {
                    pending.push(definition);
                }
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TypeDefinition>>> {
        self.pending
            .lock()
            .map_err(|_| StoreError::Schema("Schema synchronizer lock poisoned".into()))
    }
}

/// Completion of a schema sync started with [`Connection::sync_schema`].
pub struct SyncHandle {
    rx: oneshot::Receiver<Result<Vec<TypeAck>>>,
}

impl SyncHandle {
    fn ready(result: Result<Vec<TypeAck>>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Waits until the server acknowledged every pending type.
    pub async fn wait(self) -> Result<Vec<TypeAck>> {
        self.rx
            .await
            .map_err(|_| StoreError::Schema("Schema sync task ended without a result".into()))?
    }
}

impl Connection {
    /// Pushes all pending type definitions. Types the server already holds
    /// with a compatible shape are acknowledged as unchanged.
    pub fn sync_schema(&self) -> SyncHandle {
        let definitions = match self.schemas.take() {
            Ok(definitions) => definitions,
            Err(err) => return SyncHandle::ready(Err(err)),
        };
        if definitions.is_empty() {
            return SyncHandle::ready(Ok(Vec::new()));
        }

        let (tx, rx) = oneshot::channel();
        let connection = self.clone();
        tokio::spawn(async move {
            let keys: Vec<String> = definitions.iter().map(|d| d.key.clone()).collect();
            debug!(types = ?keys, "syncing schema");

            let result = connection
                .call_as_system(Request::DefineTypes(definitions.clone()))
                .await
                .and_then(|response| response.into_types_defined());

            match &result {
                Ok(acks) => {
                    let changed = acks.iter().filter(|a| a.status != TypeStatus::Unchanged).count();
                    info!(types = keys.len(), changed, "schema synchronized");
                }
                Err(_) => connection.schemas.requeue(definitions),
            }
            let _ = tx.send(result);
        });

        SyncHandle { rx }
    }
}
