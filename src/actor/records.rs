use crate::core::{EntityId, Result};
use crate::marshal::{Entity, EventRecord, LogEntry, LogLevel};
use crate::transport::proto::{EventsRequest, LogsRequest, WriteLogsRequest};
use crate::transport::Request;

use super::Actor;

impl Actor {
    /// Audit events of an entity, optionally restricted to `types`.
    pub async fn events<E: Entity>(&self, id: &EntityId, types: &[&str]) -> Result<Vec<EventRecord>> {
        let request = EventsRequest {
            schema: E::schema_key(),
            id: id.clone(),
            types: types.iter().map(|t| t.to_string()).collect(),
        };
        self.call(Request::Events(request)).await?.into_events()
    }

    /// Log entries at or above `min_level`.
    pub async fn logs<E: Entity>(&self, id: &EntityId, min_level: LogLevel) -> Result<Vec<LogEntry>> {
        let request = LogsRequest {
            schema: E::schema_key(),
            id: id.clone(),
            min_level,
        };
        self.call(Request::Logs(request)).await?.into_logs()
    }

    /// Appends log entries without a mutation.
    pub async fn write_logs<E: Entity>(&self, id: &EntityId, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let request = WriteLogsRequest {
            schema: E::schema_key(),
            id: id.clone(),
            entries,
        };
        self.call(Request::WriteLogs(request)).await?.into_ack()
    }

    pub async fn log<E: Entity>(&self, id: &EntityId, level: LogLevel, message: &str) -> Result<()> {
        self.write_logs::<E>(id, vec![LogEntry::new(level, message)]).await
    }
}
