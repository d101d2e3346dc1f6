//! Operation surface used by requirements. An [`Actor`] binds a connection
//! to a caller identity and a cancellation token.

pub mod akv;
pub mod counters;
pub mod documents;
pub mod find;
pub mod gdpr;
pub mod lifecycle;
pub mod mutate;
pub mod records;
pub mod retrieve;
pub mod share;
pub mod streams;
pub mod timeseries;

use tokio_util::sync::CancellationToken;

use crate::connection::{CallerContext, Connection};
use crate::core::{EntityId, Result, StoreError};
use crate::marshal::Entity;
use crate::transport::{Request, Response};

pub use counters::{IncrementingIds, RateLimiter};
pub use find::{FindQuery, ListQuery};
pub use mutate::{MutateOptions, Upload};
pub use retrieve::RetrieveOptions;
pub use timeseries::ChartQuery;

/// Caller context plus connection. Clones share the connection and the
/// cancellation token.
#[derive(Clone)]
pub struct Actor {
    connection: Connection,
    caller: CallerContext,
    cancel: CancellationToken,
}

impl Actor {
    pub(crate) fn new(connection: Connection, caller: CallerContext, cancel: CancellationToken) -> Self {
        Self {
            connection,
            caller,
            cancel,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Same actor scoped to `token`: cancelling it aborts in-flight and
    /// future operations issued through the returned actor.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self::new(self.connection.clone(), self.caller.clone(), token)
    }

    pub fn with_caller(&self, caller: CallerContext) -> Self {
        Self::new(self.connection.clone(), caller, self.cancel.clone())
    }

    /// Issues one RPC, racing it against cancellation.
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            response = self.connection.call(&self.caller, request) => response,
        }
    }
}

/// Identity of an entity that must already exist on the server.
pub(crate) fn require_id<E: Entity>(entity: &E) -> Result<EntityId> {
    let base = entity.base();
    if base.has_id() {
        Ok(base.id().clone())
    } else {
        Err(StoreError::EntityNotFound(format!(
            "{} has no id; create it first",
            E::schema_key()
        )))
    }
}
