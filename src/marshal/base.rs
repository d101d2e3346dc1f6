use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{EntityId, EntityState, Timestamp};

use super::record::EntityRecord;
use super::sections::{
    Document, EventRecord, LabelChanges, LogEntry, Measurement, Relationship, RelationshipChanges,
    RevisionInfo, StoredObject, Summary,
};

/// Writes queued on an entity and sent with its next mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PendingWrites {
    pub events: Vec<EventRecord>,
    pub logs: Vec<LogEntry>,
    pub labels: LabelChanges,
    pub relationships: RelationshipChanges,
    pub measurements: Vec<Measurement>,
}

impl PendingWrites {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.logs.is_empty()
            && self.labels.is_empty()
            && self.relationships.is_empty()
            && self.measurements.is_empty()
    }
}

/// Identity, state and loaded views shared by every entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseEntity {
    id: EntityId,
    hashed_id: Option<String>,
    state: EntityState,
    labels: Vec<String>,
    relationships: Vec<Relationship>,
    summary: Option<Summary>,
    objects: Vec<StoredObject>,
    document: Option<Document>,
    revisions: Vec<RevisionInfo>,
    pending: PendingWrites,
}

impl BaseEntity {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<EntityId>) {
        self.id = id.into();
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn hashed_id(&self) -> Option<&str> {
        self.hashed_id.as_deref()
    }

    /// Caller-supplied identity for types registered with a hashed id.
    pub fn set_hashed_id(&mut self, hashed_id: impl Into<String>) {
        self.hashed_id = Some(hashed_id.into());
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn objects(&self) -> &[StoredObject] {
        &self.objects
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn revisions(&self) -> &[RevisionInfo] {
        &self.revisions
    }

    pub fn add_event(&mut self, event: EventRecord) {
        self.pending.events.push(event);
    }

    pub fn add_log(&mut self, entry: LogEntry) {
        self.pending.logs.push(entry);
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.pending.labels.remove.retain(|l| *l != label);
        self.pending.labels.add.push(label);
    }

    pub fn remove_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.pending.labels.add.retain(|l| *l != label);
        self.pending.labels.remove.push(label);
    }

    pub fn add_relationship(&mut self, key: impl Into<String>, target: impl Into<EntityId>) {
        let relationship = Relationship::new(key, target);
        self.pending.relationships.remove.retain(|r| *r != relationship);
        self.pending.relationships.add.push(relationship);
    }

    pub fn remove_relationship(&mut self, key: impl Into<String>, target: impl Into<EntityId>) {
        let relationship = Relationship::new(key, target);
        self.pending.relationships.add.retain(|r| *r != relationship);
        self.pending.relationships.remove.push(relationship);
    }

    pub fn add_measurement(&mut self, sensor: impl Into<String>, at: DateTime<Utc>, value: f64) {
        self.pending.measurements.push(Measurement {
            sensor: sensor.into(),
            at: Timestamp::from_datetime(&at),
            value,
        });
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = PendingWrites::default();
    }

    /// Replaces identity and the loaded views with what the server returned.
    pub(crate) fn load(&mut self, record: &EntityRecord) {
        self.id = record.id.clone();
        if record.hashed_id.is_some() {
            self.hashed_id = record.hashed_id.clone();
        }
        self.state = record.state;
        self.labels = record.labels.clone();
        self.relationships = record.relationships.clone();
        self.summary = record.summary.clone();
        self.objects = record.objects.clone();
        self.document = record.document.clone();
        self.revisions = record.revisions.clone();
    }
}

/// Marks an entity as the child of another entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChildLink {
    parent: EntityId,
}

impl ChildLink {
    pub fn new(parent: impl Into<EntityId>) -> Self {
        Self {
            parent: parent.into(),
        }
    }

    pub fn parent(&self) -> &EntityId {
        &self.parent
    }

    pub fn set_parent(&mut self, parent: impl Into<EntityId>) {
        self.parent = parent.into();
    }

    pub fn is_linked(&self) -> bool {
        !self.parent.is_empty()
    }
}

/// Event time for entities of a time-series type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSeriesInput {
    at: Option<DateTime<Utc>>,
}

impl TimeSeriesInput {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at: Some(at) }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    pub fn set_time(&mut self, at: DateTime<Utc>) {
        self.at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_add_then_remove_cancels() {
        let mut base = BaseEntity::default();
        base.add_label("vip");
        base.remove_label("vip");
        assert!(base.pending().labels.add.is_empty());
        assert_eq!(base.pending().labels.remove, vec!["vip".to_string()]);
    }

    #[test]
    fn test_clear_pending() {
        let mut base = BaseEntity::default();
        base.add_event(EventRecord::new("created"));
        base.add_relationship("owner", "e-1");
        assert!(!base.pending().is_empty());
        base.clear_pending();
        assert!(base.pending().is_empty());
    }
}
