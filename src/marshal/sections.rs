use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{EntityId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub key: String,
    pub target: EntityId,
}

impl Relationship {
    pub fn new(key: impl Into<String>, target: impl Into<EntityId>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelChanges {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipChanges {
    pub add: Vec<Relationship>,
    pub remove: Vec<Relationship>,
}

impl RelationshipChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Audit event attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub at: Timestamp,
    pub data: BTreeMap<String, String>,
    /// User id of the caller that wrote the event, stamped by the server.
    pub user_id: String,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            at: Timestamp::now(),
            data: BTreeMap::new(),
            user_id: String::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub reference: String,
    pub trace_id: String,
    pub data: BTreeMap<String, String>,
    pub at: Timestamp,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            reference: String::new(),
            trace_id: String::new(),
            data: BTreeMap::new(),
            at: Timestamp::now(),
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Sensor reading written alongside a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor: String,
    pub at: Timestamp,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub created: Option<Timestamp>,
    pub updated: Option<Timestamp>,
    pub mutations: i64,
    pub descendant_counts: BTreeMap<String, i64>,
    pub relation_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document {
    pub revision: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub revision: String,
    pub created: Timestamp,
    pub meta: BTreeMap<String, String>,
}

/// Document change carried by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentOp {
    Write {
        content_type: String,
        data: Vec<u8>,
        meta: BTreeMap<String, String>,
    },
    AddMeta {
        revision: String,
        meta: BTreeMap<String, String>,
    },
    RemoveMeta {
        revision: String,
        keys: Vec<String>,
    },
}

impl DocumentOp {
    pub fn write(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::Write {
            content_type: content_type.into(),
            data: data.into(),
            meta: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub path: String,
    pub content_type: String,
    pub size: u64,
}

/// Pre-signed location returned by the server for an object upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub path: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}
