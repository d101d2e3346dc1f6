//! Connection to a store: transport session, credentials, registered types.

pub mod auth;
pub mod config;
pub mod sync;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actor::Actor;
use crate::core::{Result, StoreError};
use crate::marshal::Entity;
use crate::schema::TypeRegistry;
use crate::transport::{Envelope, Request, Response, TcpTransport, Transport};

pub use auth::{Authorization, CallerContext, Tenant};
pub use config::ConnectionConfig;
pub use sync::{SchemaSynchronizer, SyncHandle};

struct Session {
    transport: Arc<dyn Transport>,
    next_request: AtomicU64,
    closed: AtomicBool,
    config: ConnectionConfig,
}

/// Authenticated handle to a store. Cheap to clone; clones share the
/// transport, registry and pending schema.
#[derive(Clone)]
pub struct Connection {
    session: Arc<Session>,
    authorization: Authorization,
    registry: Arc<TypeRegistry>,
    schemas: Arc<SchemaSynchronizer>,
}

impl Connection {
    /// Dials the store described by `config`.
    pub async fn dial(config: ConnectionConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Transport(format!("Invalid connection config: {}", e)))?;
        let transport = TcpTransport::connect(&config).await?;
        info!(endpoint = %config.to_url(), "connected");
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Uses an existing transport, e.g. an in-process server.
    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let authorization = Authorization::new(&config.vendor, &config.app, &config.access_token);
        Self {
            session: Arc::new(Session {
                transport,
                next_request: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                config,
            }),
            authorization,
            registry: Arc::new(TypeRegistry::new()),
            schemas: Arc::new(SchemaSynchronizer::new()),
        }
    }

    /// A connection for another tenant over the same transport. It keeps
    /// its own registry and pending schema.
    pub fn tenant(&self, vendor: &str, app: &str, access_token: &str) -> Self {
        Self {
            session: self.session.clone(),
            authorization: Authorization::new(vendor, app, access_token),
            registry: Arc::new(TypeRegistry::new()),
            schemas: Arc::new(SchemaSynchronizer::new()),
        }
    }

    pub fn owner(&self) -> Tenant {
        self.authorization.tenant()
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.session.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Registers `E` locally and queues it for the next schema sync.
    pub fn register<E: Entity>(&self) -> Result<()> {
        let (definition, added) = self.registry.register::<E>()?;
        if added {
            self.schemas.enqueue(definition)?;
        }
        Ok(())
    }

    pub fn actor(&self, caller: CallerContext) -> Actor {
        Actor::new(self.clone(), caller, CancellationToken::new())
    }

    pub fn is_closed(&self) -> bool {
        self.session.closed.load(Ordering::Acquire)
    }

    /// Releases the transport for every connection sharing it.
    pub async fn close(&self) -> Result<()> {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("closing connection");
        self.session.transport.close().await
    }

    pub(crate) async fn call(&self, caller: &CallerContext, request: Request) -> Result<Response> {
        if self.is_closed() {
            return Err(StoreError::Transport("Connection is closed".into()));
        }
        let request_id = self.session.next_request.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind();
        debug!(request_id, kind, tenant = %self.authorization.tenant(), "rpc");

        let envelope = Envelope {
            request_id,
            authorization: self.authorization.clone(),
            actor: caller.clone(),
            request,
        };
        let result = self.session.transport.call(envelope).await;
        if let Err(err) = &result {
            debug!(request_id, kind, "rpc failed: {}", err);
        }
        result
    }

    pub(crate) async fn call_as_system(&self, request: Request) -> Result<Response> {
        self.call(&CallerContext::new("schema-sync"), request).await
    }
}
