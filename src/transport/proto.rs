//! Messages exchanged with the store. Every frame body is one of
//! [`Envelope`] (client to server) or [`Reply`] (server to client).

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::connection::auth::{Authorization, CallerContext, Tenant};
use crate::core::{
    EntityId, EntityState, ErrorKind, FieldError, PropertySet, Result, StoreError, Timestamp, Value,
};
use crate::marshal::{
    Delta, DocumentOp, EntityRecord, EventRecord, LogEntry, LogLevel, PendingWrites, UploadRequest,
    UploadTarget,
};
use crate::schema::TypeDefinition;
use crate::values::Interval;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: u64,
    pub authorization: Authorization,
    pub actor: CallerContext,
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub request_id: u64,
    pub outcome: std::result::Result<Response, WireError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub code: u16,
    pub message: String,
    pub details: Vec<FieldError>,
}

impl WireError {
    pub fn new(kind: ErrorKind, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.as_u16(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = details;
        self
    }

    /// Wire form of a local error, used by in-process servers.
    pub fn from_error(err: &StoreError) -> Self {
        let message = match err {
            StoreError::Transport(m)
            | StoreError::Codec(m)
            | StoreError::Authorization(m)
            | StoreError::Schema(m)
            | StoreError::ImmutabilityViolation(m)
            | StoreError::EntityNotFound(m)
            | StoreError::PropertiesNotLoaded(m)
            | StoreError::PiiGate(m)
            | StoreError::Marshal(m) => m.clone(),
            StoreError::Validation { message, .. } => message.clone(),
            StoreError::Cancelled => "cancelled".to_string(),
        };
        let code = match err {
            StoreError::Validation { code, .. } => *code,
            StoreError::Authorization(_) => StatusCode::UNAUTHORIZED,
            StoreError::Schema(_) | StoreError::Marshal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::ImmutabilityViolation(_) | StoreError::PiiGate(_) => StatusCode::FORBIDDEN,
            StoreError::EntityNotFound(_) | StoreError::PropertiesNotLoaded(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(err.kind(), code, message).with_details(err.details().to_vec())
    }
}

impl From<WireError> for StoreError {
    fn from(err: WireError) -> Self {
        match err.kind {
            ErrorKind::Transport => StoreError::Transport(err.message),
            ErrorKind::Authorization => StoreError::Authorization(err.message),
            ErrorKind::Schema => StoreError::Schema(err.message),
            ErrorKind::Validation => StoreError::Validation {
                code: StatusCode::from_u16(err.code).unwrap_or(StatusCode::BAD_REQUEST),
                message: err.message,
                details: err.details,
            },
            ErrorKind::ImmutabilityViolation => StoreError::ImmutabilityViolation(err.message),
            ErrorKind::NotFound => StoreError::EntityNotFound(err.message),
            ErrorKind::PiiGate => StoreError::PiiGate(err.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    #[default]
    Fail,
    /// Return the existing entity instead of failing on a duplicate identity.
    Ignore,
}

/// Pre-write predicate a mutation requires to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    Exists,
    Absent,
    PropertyEquals { path: String, value: Value },
}

/// Credential authorizing a PII write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PiiAuth {
    Token(String),
    Reference(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutateRequest {
    pub schema: String,
    pub id: Option<EntityId>,
    pub hashed_id: Option<String>,
    pub owner: Option<Tenant>,
    pub properties: PropertySet,
    pub deltas: Vec<Delta>,
    pub parent: Option<EntityId>,
    pub input_time: Option<Timestamp>,
    pub state: Option<EntityState>,
    pub comment: String,
    pub expect: Vec<Expectation>,
    pub on_conflict: ConflictPolicy,
    pub pending: PendingWrites,
    pub document: Option<DocumentOp>,
    pub uploads: Vec<UploadRequest>,
    pub pii: Option<PiiAuth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutateResult {
    pub id: EntityId,
    pub hashed_id: Option<String>,
    pub created: bool,
    pub revision: Option<String>,
    pub uploads: Vec<UploadTarget>,
}

/// How a retrieve addresses its entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Id(EntityId),
    Unique { property: String, value: Value },
    Hashed(String),
}

impl Target {
    pub fn id(id: impl Into<EntityId>) -> Self {
        Self::Id(id.into())
    }

    pub fn unique(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Unique {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn hashed(hashed_id: impl Into<String>) -> Self {
        Self::Hashed(hashed_id.into())
    }
}

impl From<&EntityId> for Target {
    fn from(id: &EntityId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<EntityId> for Target {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {}", id),
            Self::Unique { property, value } => write!(f, "{} = {}", property, value),
            Self::Hashed(hash) => write!(f, "hash {}", hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertySelection {
    #[default]
    None,
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentSelection {
    #[default]
    None,
    Latest,
    Revision(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub schema: String,
    pub target: Target,
    pub owner: Option<Tenant>,
    pub properties: PropertySelection,
    pub decrypt: bool,
    pub summary: bool,
    /// `Some(empty)` loads every object.
    pub objects: Option<Vec<String>>,
    pub document: DocumentSelection,
    pub revision_list: bool,
    pub descendant_counts: Vec<String>,
    pub relation_counts: Vec<String>,
    pub labels: bool,
    /// `Some(empty)` loads relationships of every key.
    pub relationships: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Equals { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    GreaterThan { path: String, value: Value },
    ChildOf(EntityId),
    RelatedToSibling { key: String, target: EntityId },
    LabelMatch(String),
}

impl Predicate {
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn greater_than(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::GreaterThan {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn child_of(parent: impl Into<EntityId>) -> Self {
        Self::ChildOf(parent.into())
    }

    pub fn related_to_sibling(key: impl Into<String>, target: impl Into<EntityId>) -> Self {
        Self::RelatedToSibling {
            key: key.into(),
            target: target.into(),
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self::LabelMatch(label.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    pub schema: String,
    pub predicates: Vec<Predicate>,
    pub states: Vec<EntityState>,
    pub properties: PropertySelection,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub schema: String,
    pub fields: Vec<String>,
    pub limit: u32,
    pub offset: u32,
    pub sort: Vec<Sort>,
    pub predicates: Vec<Predicate>,
    pub states: Vec<EntityState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub schema: String,
    pub property: String,
    pub value: Value,
    pub properties: PropertySelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsRequest {
    pub schema: String,
    pub id: EntityId,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsRequest {
    pub schema: String,
    pub id: EntityId,
    pub min_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteLogsRequest {
    pub schema: String,
    pub id: EntityId,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicPropertiesRequest {
    pub schema: String,
    pub id: EntityId,
    pub properties: PropertySet,
}

/// Keys ending in `~` select every dynamic property with that prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDynamicPropertiesRequest {
    pub schema: String,
    pub id: EntityId,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub at: Timestamp,
    pub properties: PropertySet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRequest {
    pub schema: String,
    pub metric: String,
    pub group_by: Option<String>,
    pub interval: Interval,
    pub from: Timestamp,
    pub to: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: Timestamp,
    pub count: i64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub group: String,
    pub buckets: Vec<Bucket>,
}

impl Series {
    pub fn total_count(&self) -> i64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    pub fn total_sum(&self) -> f64 {
        self.buckets.iter().map(|b| b.sum).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRequest {
    pub key: String,
    pub limit: u32,
    pub window_seconds: u32,
    pub tracked: bool,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub count: u32,
    pub hit_limit: bool,
}

/// Opaque token that retrieves a previously issued squid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Squat(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquidIssued {
    pub squat: Squat,
    pub squid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementingIdRequest {
    pub schema: String,
    pub id: EntityId,
    pub counters: Vec<String>,
    pub read_only: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub schema: String,
    pub entity: EntityId,
    pub event_type: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdprToken {
    pub token: String,
    pub reference: String,
    pub region: String,
    pub expires: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedView {
    pub share_id: String,
    pub owner: Tenant,
    pub schema: String,
    pub id: EntityId,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeStatus {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAck {
    pub key: String,
    pub status: TypeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    DefineTypes(Vec<TypeDefinition>),
    Mutate(Box<MutateRequest>),
    Retrieve(Box<RetrieveRequest>),
    Find(FindRequest),
    List(ListRequest),
    Lookup(LookupRequest),
    Events(EventsRequest),
    Logs(LogsRequest),
    WriteLogs(WriteLogsRequest),
    AkvPut { key: String, value: Value },
    AkvGet { key: String },
    SetDynamicProperties(DynamicPropertiesRequest),
    GetDynamicProperties(GetDynamicPropertiesRequest),
    Snapshot { schema: String, id: EntityId },
    ReportTimeSeries { schema: String, points: Vec<SeriesPoint> },
    ChartTimeSeries(ChartRequest),
    RateLimit(RateLimitRequest),
    Squid { key: String },
    SquidRetrieve { key: String, squat: Squat },
    IncrementingId(IncrementingIdRequest),
    TaskPush { queue: String, payload: Vec<u8> },
    TaskPull { queue: String, max: u32, wait_ms: u64 },
    TaskAck { queue: String, task_id: String },
    EventPull { group: String, own_key: Option<String>, max: u32, wait_ms: u64 },
    EventAck { group: String, own_key: Option<String>, event_ids: Vec<String> },
    GdprToken { reference: String, region: String },
    Anonymize { reference: String, token: String },
    AnonymizeRollback { reference: String, token: String },
    ShareView { schema: String, id: EntityId, grantee: Tenant, properties: Vec<String> },
    SharedViews { schema: Option<String> },
    GetShared { share_id: String },
    Destroy { schema: String, id: EntityId, confirmation: String, reason: String },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DefineTypes(_) => "define_types",
            Self::Mutate(_) => "mutate",
            Self::Retrieve(_) => "retrieve",
            Self::Find(_) => "find",
            Self::List(_) => "list",
            Self::Lookup(_) => "lookup",
            Self::Events(_) => "events",
            Self::Logs(_) => "logs",
            Self::WriteLogs(_) => "write_logs",
            Self::AkvPut { .. } => "akv_put",
            Self::AkvGet { .. } => "akv_get",
            Self::SetDynamicProperties(_) => "set_dynamic_properties",
            Self::GetDynamicProperties(_) => "get_dynamic_properties",
            Self::Snapshot { .. } => "snapshot",
            Self::ReportTimeSeries { .. } => "report_time_series",
            Self::ChartTimeSeries(_) => "chart_time_series",
            Self::RateLimit(_) => "rate_limit",
            Self::Squid { .. } => "squid",
            Self::SquidRetrieve { .. } => "squid_retrieve",
            Self::IncrementingId(_) => "incrementing_id",
            Self::TaskPush { .. } => "task_push",
            Self::TaskPull { .. } => "task_pull",
            Self::TaskAck { .. } => "task_ack",
            Self::EventPull { .. } => "event_pull",
            Self::EventAck { .. } => "event_ack",
            Self::GdprToken { .. } => "gdpr_token",
            Self::Anonymize { .. } => "anonymize",
            Self::AnonymizeRollback { .. } => "anonymize_rollback",
            Self::ShareView { .. } => "share_view",
            Self::SharedViews { .. } => "shared_views",
            Self::GetShared { .. } => "get_shared",
            Self::Destroy { .. } => "destroy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    TypesDefined(Vec<TypeAck>),
    Mutated(MutateResult),
    Retrieved(Box<EntityRecord>),
    Records(Vec<EntityRecord>),
    Events(Vec<EventRecord>),
    Logs(Vec<LogEntry>),
    Ack,
    Akv(Option<Value>),
    Properties(PropertySet),
    Chart(Vec<Series>),
    RateLimited(RateLimitStatus),
    Squid(SquidIssued),
    Counters(BTreeMap<String, i64>),
    TaskPushed(String),
    Tasks(Vec<Task>),
    StreamEvents(Vec<StreamEvent>),
    GdprToken(GdprToken),
    Anonymized(Timestamp),
    Shared(String),
    SharedViews(Vec<SharedView>),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypesDefined(_) => "types_defined",
            Self::Mutated(_) => "mutated",
            Self::Retrieved(_) => "retrieved",
            Self::Records(_) => "records",
            Self::Events(_) => "events",
            Self::Logs(_) => "logs",
            Self::Ack => "ack",
            Self::Akv(_) => "akv",
            Self::Properties(_) => "properties",
            Self::Chart(_) => "chart",
            Self::RateLimited(_) => "rate_limited",
            Self::Squid(_) => "squid",
            Self::Counters(_) => "counters",
            Self::TaskPushed(_) => "task_pushed",
            Self::Tasks(_) => "tasks",
            Self::StreamEvents(_) => "stream_events",
            Self::GdprToken(_) => "gdpr_token",
            Self::Anonymized(_) => "anonymized",
            Self::Shared(_) => "shared",
            Self::SharedViews(_) => "shared_views",
        }
    }

    pub fn into_ack(self) -> Result<()> {
        match self {
            Self::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }

    pub fn into_retrieved(self) -> Result<EntityRecord> {
        match self {
            Self::Retrieved(record) => Ok(*record),
            other => Err(unexpected("retrieved", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Response) -> StoreError {
    StoreError::Codec(format!(
        "expected a '{}' response, got '{}'",
        expected,
        got.kind()
    ))
}

macro_rules! response_accessors {
    ($($method:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl Response {
            $(
                pub fn $method(self) -> Result<$ty> {
                    match self {
                        Self::$variant(inner) => Ok(inner),
                        other => Err(unexpected(stringify!($variant), &other)),
                    }
                }
            )*
        }
    };
}

response_accessors! {
    into_types_defined => TypesDefined(Vec<TypeAck>),
    into_mutated => Mutated(MutateResult),
    into_records => Records(Vec<EntityRecord>),
    into_events => Events(Vec<EventRecord>),
    into_logs => Logs(Vec<LogEntry>),
    into_akv => Akv(Option<Value>),
    into_properties => Properties(PropertySet),
    into_chart => Chart(Vec<Series>),
    into_rate_limited => RateLimited(RateLimitStatus),
    into_squid => Squid(SquidIssued),
    into_counters => Counters(BTreeMap<String, i64>),
    into_task_pushed => TaskPushed(String),
    into_tasks => Tasks(Vec<Task>),
    into_stream_events => StreamEvents(Vec<StreamEvent>),
    into_gdpr_token => GdprToken(GdprToken),
    into_anonymized => Anonymized(Timestamp),
    into_shared => Shared(String),
    into_shared_views => SharedViews(Vec<SharedView>),
}
