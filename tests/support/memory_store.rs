//! In-process store that answers the wire protocol from memory. Object
//! uploads are only accepted when the store was given an object store URL.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as Days, Utc};
use http::StatusCode;
use sha2::{Digest, Sha256};

use storecheck::actor::akv::key_selects;
use storecheck::connection::{CallerContext, Tenant};
use storecheck::core::{
    EntityId, EntityState, IMMUTABLE_UPDATE_MESSAGE, PropertySet, Result, StoreError, Timestamp,
    Value,
};
use storecheck::marshal::{
    Delta, Document, DocumentOp, EntityRecord, EventRecord, LogEntry, PendingWrites, Relationship,
    RevisionInfo, StoredObject, Summary, UploadTarget,
};
use storecheck::schema::{CountSource, TypeDefinition};
use storecheck::transport::proto::{
    Bucket, ChartRequest, ConflictPolicy, DocumentSelection, Expectation, FindRequest, GdprToken,
    IncrementingIdRequest, ListRequest, LookupRequest, MutateRequest, MutateResult, PiiAuth,
    Predicate, PropertySelection, RateLimitRequest, RateLimitStatus, RetrieveRequest, Series,
    SeriesPoint, SharedView, Squat, SquidIssued, StreamEvent, Target, Task, TypeAck, TypeStatus,
};
use storecheck::values::IntervalUnit;
use storecheck::transport::{Envelope, Request, Response, Transport, WireError};

/// Pause before answering an empty task pull, so an idle stream does not
/// spin on the runtime.
const EMPTY_PULL_DELAY: Duration = Duration::from_millis(10);

const RECOVERY_DAYS: i64 = 7;

#[derive(Debug, Clone)]
struct StoredEntity {
    id: EntityId,
    schema: String,
    owner: Tenant,
    hashed_id: Option<String>,
    state: EntityState,
    parent: Option<EntityId>,
    properties: PropertySet,
    dynamic: PropertySet,
    labels: Vec<String>,
    relationships: Vec<Relationship>,
    events: Vec<EventRecord>,
    logs: Vec<LogEntry>,
    created: Timestamp,
    updated: Timestamp,
    mutations: i64,
    revisions: Vec<(Document, Timestamp)>,
    objects: Vec<StoredObject>,
    pii_reference: Option<String>,
    /// PII values removed by an anonymize, kept until rollback.
    anonymized: PropertySet,
}

impl StoredEntity {
    fn new(id: EntityId, schema: &str, owner: Tenant) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            schema: schema.to_string(),
            owner,
            hashed_id: None,
            state: EntityState::Active,
            parent: None,
            properties: PropertySet::new(),
            dynamic: PropertySet::new(),
            labels: Vec::new(),
            relationships: Vec::new(),
            events: Vec::new(),
            logs: Vec::new(),
            created: now,
            updated: now,
            mutations: 0,
            revisions: Vec::new(),
            objects: Vec::new(),
            pii_reference: None,
            anonymized: PropertySet::new(),
        }
    }

    fn revision_mut(&mut self, revision: &str) -> Result<&mut Document> {
        self.revisions
            .iter_mut()
            .map(|(document, _)| document)
            .find(|d| d.revision == revision)
            .ok_or_else(|| StoreError::EntityNotFound(format!("revision {} of {}", revision, self.id)))
    }

    fn record(&self, selection: &PropertySelection, decrypt: bool) -> EntityRecord {
        EntityRecord {
            id: self.id.clone(),
            schema: self.schema.clone(),
            hashed_id: self.hashed_id.clone(),
            state: self.state,
            properties: present(&self.properties, selection, decrypt),
            ..EntityRecord::default()
        }
    }

    fn apply_pending(&mut self, pending: PendingWrites, caller: &CallerContext) {
        for mut event in pending.events {
            event.user_id = caller.user_id.clone();
            self.events.push(event);
        }
        self.logs.extend(pending.logs);

        self.labels.retain(|l| !pending.labels.remove.contains(l));
        for label in pending.labels.add {
            if !self.labels.contains(&label) {
                self.labels.push(label);
            }
        }

        self.relationships
            .retain(|r| !pending.relationships.remove.contains(r));
        for relationship in pending.relationships.add {
            if !self.relationships.contains(&relationship) {
                self.relationships.push(relationship);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedTask {
    task: Task,
    acked: bool,
}

#[derive(Debug, Clone)]
struct Share {
    view: SharedView,
    grantee: Tenant,
}

#[derive(Default)]
struct State {
    object_store: Option<String>,
    types: HashMap<String, TypeDefinition>,
    entities: BTreeMap<EntityId, StoredEntity>,
    next_id: u64,
    akv: HashMap<(Tenant, String), Value>,
    squids: HashMap<String, u32>,
    squats: HashMap<(String, Squat), u32>,
    rate_limits: HashMap<String, u32>,
    counters: HashMap<(EntityId, String), i64>,
    queues: HashMap<String, Vec<QueuedTask>>,
    next_task: u64,
    next_revision: u64,
    series: HashMap<String, Vec<SeriesPoint>>,
    gdpr_tokens: HashMap<String, String>,
    shares: BTreeMap<String, Share>,
    stream: Vec<StreamEvent>,
    stream_acks: HashMap<String, HashSet<String>>,
}

/// Store state behind one lock. Every request is answered synchronously
/// and errors travel through their wire form, as they would from a server.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    requests: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out upload URLs beneath `base`.
    pub fn with_object_store(base: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.object_store = Some(base.into());
        }
        store
    }

    /// Kinds of every request received, in arrival order.
    pub fn request_kinds(&self) -> Vec<&'static str> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().map(|s| s.entities.len()).unwrap_or(0)
    }

    pub fn defined_types(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .map(|s| s.types.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn handle(&self, envelope: Envelope) -> Result<Response> {
        if !envelope.authorization.is_complete() {
            return Err(StoreError::Authorization("missing vendor, app or access token".into()));
        }
        let tenant = envelope.authorization.tenant();
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Transport("memory store lock poisoned".into()))?;
        state.handle(&tenant, &envelope.actor, envelope.request)
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn call(&self, envelope: Envelope) -> Result<Response> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(envelope.request.kind());
        }
        let response = self
            .handle(envelope)
            .map_err(|err| StoreError::from(WireError::from_error(&err)))?;
        let idle = match &response {
            Response::Tasks(tasks) => tasks.is_empty(),
            Response::StreamEvents(events) => events.is_empty(),
            _ => false,
        };
        if idle {
            tokio::time::sleep(EMPTY_PULL_DELAY).await;
        }
        Ok(response)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl State {
    fn handle(&mut self, tenant: &Tenant, caller: &CallerContext, request: Request) -> Result<Response> {
        match request {
            Request::DefineTypes(definitions) => self.define(definitions).map(Response::TypesDefined),
            Request::Mutate(request) => self.mutate(tenant, caller, *request).map(Response::Mutated),
            Request::Retrieve(request) => self
                .retrieve(tenant, *request)
                .map(|record| Response::Retrieved(Box::new(record))),
            Request::Find(request) => self.find(tenant, request).map(Response::Records),
            Request::List(request) => self.list(tenant, request).map(Response::Records),
            Request::Lookup(request) => self.lookup(tenant, request).map(Response::Records),
            Request::Events(request) => {
                let entity = self.entity(tenant, &request.schema, &request.id)?;
                let events = entity
                    .events
                    .iter()
                    .filter(|e| request.types.is_empty() || request.types.contains(&e.event_type))
                    .cloned()
                    .collect();
                Ok(Response::Events(events))
            }
            Request::Logs(request) => {
                let entity = self.entity(tenant, &request.schema, &request.id)?;
                let logs = entity
                    .logs
                    .iter()
                    .filter(|l| l.level >= request.min_level)
                    .cloned()
                    .collect();
                Ok(Response::Logs(logs))
            }
            Request::WriteLogs(request) => {
                self.entity_mut(tenant, &request.schema, &request.id)?
                    .logs
                    .extend(request.entries);
                Ok(Response::Ack)
            }
            Request::AkvPut { key, value } => {
                self.akv.insert((tenant.clone(), key), value);
                Ok(Response::Ack)
            }
            Request::AkvGet { key } => Ok(Response::Akv(self.akv.get(&(tenant.clone(), key)).cloned())),
            Request::SetDynamicProperties(request) => {
                self.entity_mut(tenant, &request.schema, &request.id)?
                    .dynamic
                    .extend(request.properties);
                Ok(Response::Ack)
            }
            Request::GetDynamicProperties(request) => {
                let entity = self.entity(tenant, &request.schema, &request.id)?;
                let selected = entity
                    .dynamic
                    .iter()
                    .filter(|(path, _)| request.keys.iter().any(|k| key_selects(k, path)))
                    .map(|(path, value)| (path.clone(), value.clone()))
                    .collect();
                Ok(Response::Properties(selected))
            }
            Request::RateLimit(request) => self.rate_limit(request).map(Response::RateLimited),
            Request::Squid { key } => {
                let next = self.squids.entry(key.clone()).or_insert(0);
                *next += 1;
                let squid = *next;
                let squat = Squat(format!("{}#{}", key, squid));
                self.squats.insert((key, squat.clone()), squid);
                Ok(Response::Squid(SquidIssued { squat, squid }))
            }
            Request::SquidRetrieve { key, squat } => {
                let squid = self
                    .squats
                    .get(&(key.clone(), squat.clone()))
                    .copied()
                    .ok_or_else(|| StoreError::EntityNotFound(format!("squat {} for '{}'", squat.0, key)))?;
                Ok(Response::Squid(SquidIssued { squat, squid }))
            }
            Request::IncrementingId(request) => self.incrementing_ids(tenant, request).map(Response::Counters),
            Request::TaskPush { queue, payload } => {
                self.next_task += 1;
                let id = format!("task-{:06}", self.next_task);
                self.queues.entry(queue.clone()).or_default().push(QueuedTask {
                    task: Task {
                        id: id.clone(),
                        queue,
                        payload,
                        attempt: 0,
                    },
                    acked: false,
                });
                Ok(Response::TaskPushed(id))
            }
            Request::TaskPull { queue, max, .. } => {
                let mut tasks = Vec::new();
                for queued in self.queues.entry(queue).or_default().iter_mut() {
                    if queued.acked || tasks.len() >= max as usize {
                        continue;
                    }
                    queued.task.attempt += 1;
                    tasks.push(queued.task.clone());
                }
                Ok(Response::Tasks(tasks))
            }
            Request::TaskAck { queue, task_id } => {
                let queued = self
                    .queues
                    .get_mut(&queue)
                    .and_then(|q| q.iter_mut().find(|t| t.task.id == task_id))
                    .ok_or_else(|| StoreError::EntityNotFound(format!("task {} in '{}'", task_id, queue)))?;
                queued.acked = true;
                Ok(Response::Ack)
            }
            Request::Destroy {
                schema,
                id,
                confirmation,
                ..
            } => {
                self.entity(tenant, &schema, &id)?;
                let expected = format!("{:x}", Sha256::digest(id.as_str().as_bytes()));
                if confirmation != expected {
                    return Err(StoreError::validation(
                        StatusCode::BAD_REQUEST,
                        format!("confirmation does not match entity {}", id),
                    ));
                }
                self.entities.remove(&id);
                Ok(Response::Ack)
            }
            Request::Snapshot { schema, id } => {
                let definition = self.definition(&schema)?;
                let mut record = self.entity(tenant, &schema, &id)?.record(&PropertySelection::All, false);
                if let Some(properties) = record.properties.as_mut() {
                    *properties = std::mem::take(properties)
                        .into_iter()
                        .filter(|(path, _)| !definition.property(path).is_some_and(|p| p.flags.no_snapshot))
                        .collect();
                }
                Ok(Response::Retrieved(Box::new(record)))
            }
            Request::ReportTimeSeries { schema, points } => {
                if !self.definition(&schema)?.options.time_series {
                    return Err(StoreError::Schema(format!("'{}' is not a time-series type", schema)));
                }
                self.series.entry(schema).or_default().extend(points);
                Ok(Response::Ack)
            }
            Request::ChartTimeSeries(request) => self.chart(request).map(Response::Chart),
            Request::EventPull { group, max, .. } => {
                let acked = self.stream_acks.entry(group).or_default();
                let events = self
                    .stream
                    .iter()
                    .filter(|e| !acked.contains(&e.id))
                    .take(max as usize)
                    .cloned()
                    .collect();
                Ok(Response::StreamEvents(events))
            }
            Request::EventAck { group, event_ids, .. } => {
                self.stream_acks.entry(group).or_default().extend(event_ids);
                Ok(Response::Ack)
            }
            Request::GdprToken { reference, region } => {
                let token = format!("gdpr-{:06}", self.gdpr_tokens.len() + 1);
                self.gdpr_tokens.insert(token.clone(), reference.clone());
                Ok(Response::GdprToken(GdprToken {
                    token,
                    reference,
                    region,
                    expires: Timestamp::from_datetime(&(Utc::now() + Days::days(30))),
                }))
            }
            Request::Anonymize { reference, token } => {
                self.check_token(&token, &reference)?;
                for entity in self.entities.values_mut() {
                    if entity.pii_reference.as_deref() != Some(reference.as_str()) {
                        continue;
                    }
                    let Some(definition) = self.types.get(&entity.schema) else {
                        continue;
                    };
                    let pii: Vec<String> = entity
                        .properties
                        .paths()
                        .filter(|path| definition.property(path).is_some_and(|p| p.flags.pii))
                        .cloned()
                        .collect();
                    for path in pii {
                        if let Some(value) = entity.properties.remove(&path) {
                            entity.anonymized.insert(path, value);
                        }
                    }
                }
                let deadline = Utc::now() + Days::days(RECOVERY_DAYS);
                Ok(Response::Anonymized(Timestamp::from_datetime(&deadline)))
            }
            Request::AnonymizeRollback { reference, token } => {
                self.check_token(&token, &reference)?;
                for entity in self.entities.values_mut() {
                    if entity.pii_reference.as_deref() == Some(reference.as_str()) {
                        let restored = std::mem::take(&mut entity.anonymized);
                        entity.properties.extend(restored);
                    }
                }
                Ok(Response::Ack)
            }
            Request::ShareView {
                schema,
                id,
                grantee,
                properties,
            } => {
                self.entity(tenant, &schema, &id)?;
                if properties.is_empty() {
                    return Err(StoreError::validation(
                        StatusCode::BAD_REQUEST,
                        "a shared view needs at least one property",
                    ));
                }
                let share_id = format!("share-{:06}", self.shares.len() + 1);
                let view = SharedView {
                    share_id: share_id.clone(),
                    owner: tenant.clone(),
                    schema,
                    id,
                    properties,
                };
                self.shares.insert(share_id.clone(), Share { view, grantee });
                Ok(Response::Shared(share_id))
            }
            Request::SharedViews { schema } => {
                let views = self
                    .shares
                    .values()
                    .filter(|s| s.grantee == *tenant)
                    .filter(|s| schema.as_ref().is_none_or(|schema| s.view.schema == *schema))
                    .map(|s| s.view.clone())
                    .collect();
                Ok(Response::SharedViews(views))
            }
            Request::GetShared { share_id } => {
                let share = self
                    .shares
                    .get(&share_id)
                    .filter(|s| s.grantee == *tenant)
                    .ok_or_else(|| StoreError::Authorization(format!("{} holds no share {}", tenant, share_id)))?;
                let view = &share.view;
                let selection = PropertySelection::Only(view.properties.clone());
                let record = self.entity(&view.owner, &view.schema, &view.id)?.record(&selection, false);
                Ok(Response::Retrieved(Box::new(record)))
            }
        }
    }

    fn check_token(&self, token: &str, reference: &str) -> Result<()> {
        match self.gdpr_tokens.get(token) {
            Some(known) if known == reference => Ok(()),
            _ => Err(StoreError::PiiGate(format!("token does not cover reference '{}'", reference))),
        }
    }

    /// PII reference a write is authorized for.
    fn pii_reference(&self, auth: &PiiAuth) -> Result<String> {
        match auth {
            PiiAuth::Token(token) => self
                .gdpr_tokens
                .get(token)
                .cloned()
                .ok_or_else(|| StoreError::PiiGate(format!("unknown GDPR token '{}'", token))),
            PiiAuth::Reference(reference) => Ok(reference.clone()),
        }
    }

    fn chart(&self, request: ChartRequest) -> Result<Vec<Series>> {
        self.definition(&request.schema)?;
        let width = match request.interval.unit {
            IntervalUnit::Day => 86_400,
            IntervalUnit::Week => 7 * 86_400,
            IntervalUnit::Month => 30 * 86_400,
            IntervalUnit::Year => 365 * 86_400,
        } * request.interval.count;
        if width <= 0 {
            return Err(StoreError::validation(
                StatusCode::BAD_REQUEST,
                format!("invalid chart interval {}", request.interval),
            ));
        }

        let mut groups: BTreeMap<String, BTreeMap<i64, Bucket>> = BTreeMap::new();
        let points = self.series.get(&request.schema).map(Vec::as_slice).unwrap_or_default();
        for point in points {
            if point.at < request.from || point.at > request.to {
                continue;
            }
            let Some(metric) = point.properties.get(&request.metric).and_then(Value::as_f64) else {
                continue;
            };
            let group = match &request.group_by {
                Some(path) => match point.properties.get(path) {
                    Some(Value::Text(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
                None => String::new(),
            };
            let start = request.from.seconds + (point.at.seconds - request.from.seconds) / width * width;
            let bucket = groups.entry(group).or_default().entry(start).or_insert(Bucket {
                start: Timestamp { seconds: start, nanos: 0 },
                count: 0,
                sum: 0.0,
            });
            bucket.count += 1;
            bucket.sum += metric;
        }
        Ok(groups
            .into_iter()
            .map(|(group, buckets)| Series {
                group,
                buckets: buckets.into_values().collect(),
            })
            .collect())
    }

    fn define(&mut self, definitions: Vec<TypeDefinition>) -> Result<Vec<TypeAck>> {
        let mut acks = Vec::with_capacity(definitions.len());
        for definition in definitions {
            definition.validate()?;
            let status = match self.types.get(&definition.key) {
                None => TypeStatus::Created,
                Some(existing) if *existing == definition => TypeStatus::Unchanged,
                Some(_) => TypeStatus::Updated,
            };
            acks.push(TypeAck {
                key: definition.key.clone(),
                status,
            });
            self.types.insert(definition.key.clone(), definition);
        }
        Ok(acks)
    }

    fn definition(&self, schema: &str) -> Result<&TypeDefinition> {
        self.types
            .get(schema)
            .ok_or_else(|| StoreError::Schema(format!("type '{}' is not defined", schema)))
    }

    fn visible<'s>(&'s self, tenant: &Tenant, schema: &str) -> impl Iterator<Item = &'s StoredEntity> {
        self.entities
            .values()
            .filter(move |e| e.schema == schema && e.owner == *tenant)
    }

    fn entity(&self, tenant: &Tenant, schema: &str, id: &EntityId) -> Result<&StoredEntity> {
        self.entities
            .get(id)
            .filter(|e| e.schema == schema && e.owner == *tenant)
            .ok_or_else(|| StoreError::EntityNotFound(id.to_string()))
    }

    fn entity_mut(&mut self, tenant: &Tenant, schema: &str, id: &EntityId) -> Result<&mut StoredEntity> {
        self.entities
            .get_mut(id)
            .filter(|e| e.schema == schema && e.owner == *tenant)
            .ok_or_else(|| StoreError::EntityNotFound(id.to_string()))
    }

    fn resolve(&self, tenant: &Tenant, schema: &str, target: &Target) -> Result<&StoredEntity> {
        let mut candidates = self.visible(tenant, schema);
        let found = match target {
            Target::Id(id) => candidates.find(|e| e.id == *id),
            Target::Unique { property, value } => candidates.find(|e| e.properties.get(property) == Some(value)),
            Target::Hashed(hash) => candidates.find(|e| e.hashed_id.as_deref() == Some(hash.as_str())),
        };
        found.ok_or_else(|| StoreError::EntityNotFound(target.to_string()))
    }

    fn mutate(&mut self, tenant: &Tenant, caller: &CallerContext, request: MutateRequest) -> Result<MutateResult> {
        let definition = self.definition(&request.schema)?.clone();
        if !request.uploads.is_empty() && self.object_store.is_none() {
            return Err(StoreError::Transport("uploads need an object store".into()));
        }
        if request.owner.as_ref().is_some_and(|owner| owner != tenant) {
            return Err(StoreError::Authorization(format!(
                "{} may not write entities of another tenant",
                tenant
            )));
        }
        check_pii(&definition, &request)?;
        let pii_reference = request.pii.as_ref().map(|auth| self.pii_reference(auth)).transpose()?;

        let existing = match (&request.id, &request.hashed_id) {
            (Some(id), _) => Some(self.entity(tenant, &request.schema, id)?.id.clone()),
            (None, Some(hash)) if definition.options.hashed_id => self
                .resolve(tenant, &request.schema, &Target::hashed(hash.as_str()))
                .ok()
                .map(|e| e.id.clone()),
            _ => None,
        };
        let existing = match existing {
            Some(id) => Some(id),
            None => match self.primary_match(tenant, &definition, &request.properties)? {
                Some(id) if request.on_conflict == ConflictPolicy::Ignore => {
                    return Ok(MutateResult {
                        id,
                        ..MutateResult::default()
                    });
                }
                Some(id) => {
                    return Err(StoreError::conflict(format!(
                        "entity {} already has these primary properties",
                        id
                    )));
                }
                None => None,
            },
        };

        let stored = existing.as_ref().and_then(|id| self.entities.get(id));
        check_expectations(stored, &request.expect)?;
        if let Some(stored) = stored {
            check_update(&definition, stored, &request)?;
        }
        self.check_unique(tenant, &definition, existing.as_ref(), &request.properties)?;

        let created = existing.is_none();
        let id = match existing {
            Some(id) => id,
            None => {
                self.next_id += 1;
                let id = EntityId::new(format!("mem-{:06}", self.next_id));
                let mut entity = StoredEntity::new(id.clone(), &request.schema, tenant.clone());
                entity.hashed_id = request.hashed_id.clone();
                entity.parent = request.parent.clone();
                self.entities.insert(id.clone(), entity);
                id
            }
        };

        let entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| StoreError::EntityNotFound(id.to_string()))?;
        let revision = match request.document {
            Some(op) => Some(apply_document(entity, op, &mut self.next_revision)?),
            None => None,
        };
        merge(&mut entity.properties, request.properties);
        for delta in &request.deltas {
            apply_delta(&mut entity.properties, delta);
        }
        if let Some(state) = request.state {
            entity.state = state;
        }
        if pii_reference.is_some() {
            entity.pii_reference = pii_reference;
        }

        let mut uploads = Vec::with_capacity(request.uploads.len());
        for upload in request.uploads {
            let base = self.object_store.as_deref().unwrap_or_default();
            uploads.push(UploadTarget {
                path: upload.path.clone(),
                url: format!("{}/{}/{}", base, id, upload.path),
                headers: BTreeMap::new(),
            });
            entity.objects.retain(|o| o.path != upload.path);
            entity.objects.push(StoredObject {
                path: upload.path,
                content_type: upload.content_type,
                size: upload.size,
                url: None,
            });
        }

        let published: Vec<StreamEvent> = request
            .pending
            .events
            .iter()
            .map(|event| StreamEvent {
                id: String::new(),
                schema: request.schema.clone(),
                entity: id.clone(),
                event_type: event.event_type.clone(),
                data: event.data.clone(),
            })
            .collect();
        entity.apply_pending(request.pending, caller);
        entity.updated = Timestamp::now();
        entity.mutations += 1;
        let hashed_id = entity.hashed_id.clone();

        for mut event in published {
            event.id = format!("evt-{:06}", self.stream.len() + 1);
            self.stream.push(event);
        }

        Ok(MutateResult {
            id,
            hashed_id,
            created,
            revision,
            uploads,
        })
    }

    /// Existing entity carrying the same primary values. Fails when the
    /// type declares primary properties and one of them is missing.
    fn primary_match(&self, tenant: &Tenant, definition: &TypeDefinition, properties: &PropertySet) -> Result<Option<EntityId>> {
        let paths = definition.primary_paths();
        if paths.is_empty() {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(paths.len());
        for path in &paths {
            let value = properties.get(path).ok_or_else(|| {
                StoreError::validation(
                    StatusCode::BAD_REQUEST,
                    format!("primary property '{}' is required on create", path),
                )
            })?;
            values.push((*path, value));
        }
        Ok(self
            .visible(tenant, &definition.key)
            .find(|e| values.iter().all(|(path, value)| e.properties.get(path) == Some(*value)))
            .map(|e| e.id.clone()))
    }

    fn check_unique(
        &self,
        tenant: &Tenant,
        definition: &TypeDefinition,
        own: Option<&EntityId>,
        properties: &PropertySet,
    ) -> Result<()> {
        for (path, value) in properties.iter() {
            let unique = definition.property(path).is_some_and(|p| p.flags.unique);
            if !unique {
                continue;
            }
            let taken = self
                .visible(tenant, &definition.key)
                .any(|e| Some(&e.id) != own && e.properties.get(path) == Some(value));
            if taken {
                return Err(StoreError::conflict(format!("unique property '{}' already holds {}", path, value)));
            }
        }
        Ok(())
    }

    fn retrieve(&self, tenant: &Tenant, request: RetrieveRequest) -> Result<EntityRecord> {
        let owner = request.owner.clone().unwrap_or_else(|| tenant.clone());
        let entity = self.resolve(&owner, &request.schema, &request.target)?;
        // Another tenant's entity is readable through a share, limited to
        // its properties.
        let shared = if owner == *tenant {
            None
        } else {
            let share = self
                .shares
                .values()
                .find(|s| s.grantee == *tenant && s.view.owner == owner && s.view.id == entity.id)
                .ok_or_else(|| StoreError::Authorization(format!("{} has no share of {}", tenant, entity.id)))?;
            Some(&share.view.properties)
        };
        let mut record = entity.record(&request.properties, request.decrypt && shared.is_none());
        if let (Some(paths), Some(properties)) = (shared, record.properties.as_mut()) {
            properties.retain_selected(paths);
        }

        let descendants: BTreeMap<String, i64> = request
            .descendant_counts
            .iter()
            .map(|schema| {
                let count = self
                    .entities
                    .values()
                    .filter(|e| e.schema == *schema && e.parent.as_ref() == Some(&entity.id))
                    .count();
                (schema.clone(), count as i64)
            })
            .collect();
        let relations: BTreeMap<String, i64> = request
            .relation_counts
            .iter()
            .map(|key| {
                let count = entity.relationships.iter().filter(|r| r.key == *key).count();
                (key.clone(), count as i64)
            })
            .collect();

        if let Some(properties) = record.properties.as_mut() {
            for (schema, count) in &descendants {
                properties.insert(CountSource::Descendant(schema.clone()).path(), Value::Int(*count));
            }
            for (key, count) in &relations {
                properties.insert(CountSource::Relation(key.clone()).path(), Value::Int(*count));
            }
        }
        if request.summary {
            record.summary = Some(Summary {
                created: Some(entity.created),
                updated: Some(entity.updated),
                mutations: entity.mutations,
                descendant_counts: descendants,
                relation_counts: relations,
            });
        }
        if request.labels {
            record.labels = entity.labels.clone();
        }
        if let Some(paths) = &request.objects {
            record.objects = entity
                .objects
                .iter()
                .filter(|o| paths.is_empty() || paths.contains(&o.path))
                .cloned()
                .collect();
        }
        record.document = match &request.document {
            DocumentSelection::None => None,
            DocumentSelection::Latest => entity.revisions.last().map(|(d, _)| d.clone()),
            DocumentSelection::Revision(revision) => entity
                .revisions
                .iter()
                .map(|(d, _)| d)
                .find(|d| d.revision == *revision)
                .cloned(),
        };
        if request.revision_list {
            record.revisions = entity
                .revisions
                .iter()
                .map(|(document, created)| RevisionInfo {
                    revision: document.revision.clone(),
                    created: *created,
                    meta: document.meta.clone(),
                })
                .collect();
        }
        if let Some(keys) = &request.relationships {
            record.relationships = entity
                .relationships
                .iter()
                .filter(|r| keys.is_empty() || keys.contains(&r.key))
                .cloned()
                .collect();
        }
        Ok(record)
    }

    fn find(&self, tenant: &Tenant, request: FindRequest) -> Result<Vec<EntityRecord>> {
        self.definition(&request.schema)?;
        let limit = request.limit.map_or(usize::MAX, |l| l as usize);
        Ok(self
            .visible(tenant, &request.schema)
            .filter(|e| request.states.contains(&e.state))
            .filter(|e| request.predicates.iter().all(|p| satisfies(e, p)))
            .take(limit)
            .map(|e| e.record(&request.properties, false))
            .collect())
    }

    fn list(&self, tenant: &Tenant, request: ListRequest) -> Result<Vec<EntityRecord>> {
        self.definition(&request.schema)?;
        let mut matched: Vec<&StoredEntity> = self
            .visible(tenant, &request.schema)
            .filter(|e| request.states.contains(&e.state))
            .filter(|e| request.predicates.iter().all(|p| satisfies(e, p)))
            .collect();

        matched.sort_by(|a, b| {
            request
                .sort
                .iter()
                .map(|sort| {
                    let ordering = match (a.properties.get(&sort.field), b.properties.get(&sort.field)) {
                        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (None, None) => Ordering::Equal,
                    };
                    if sort.ascending { ordering } else { ordering.reverse() }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let projection = if request.fields.is_empty() {
            PropertySelection::All
        } else {
            PropertySelection::Only(request.fields.clone())
        };
        Ok(matched
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .map(|e| e.record(&projection, false))
            .collect())
    }

    fn lookup(&self, tenant: &Tenant, request: LookupRequest) -> Result<Vec<EntityRecord>> {
        let searchable = self
            .definition(&request.schema)?
            .property(&request.property)
            .is_some_and(|p| p.flags.lookup || p.flags.unique);
        if !searchable {
            return Err(StoreError::Schema(format!(
                "property '{}' of '{}' is not searchable",
                request.property, request.schema
            )));
        }
        Ok(self
            .visible(tenant, &request.schema)
            .filter(|e| e.state == EntityState::Active)
            .filter(|e| e.properties.get(&request.property) == Some(&request.value))
            .map(|e| e.record(&request.properties, false))
            .collect())
    }

    fn rate_limit(&mut self, request: RateLimitRequest) -> Result<RateLimitStatus> {
        if request.limit == 0 || request.window_seconds == 0 {
            return Err(StoreError::validation(
                StatusCode::BAD_REQUEST,
                "rate limits need a positive limit and window",
            ));
        }
        let count = self.rate_limits.entry(request.key).or_insert(0);
        *count += 1;
        Ok(RateLimitStatus {
            count: *count,
            hit_limit: *count > request.limit,
        })
    }

    fn incrementing_ids(&mut self, tenant: &Tenant, request: IncrementingIdRequest) -> Result<BTreeMap<String, i64>> {
        self.entity(tenant, &request.schema, &request.id)?;
        if let Some(name) = request.counters.iter().find(|c| request.read_only.contains(c)) {
            return Err(StoreError::validation(
                StatusCode::BAD_REQUEST,
                format!("counter '{}' cannot advance and be read-only", name),
            ));
        }

        let mut values = BTreeMap::new();
        for name in &request.counters {
            let value = self
                .counters
                .entry((request.id.clone(), name.clone()))
                .or_insert(0);
            *value += 1;
            values.insert(name.clone(), *value);
        }
        for name in &request.read_only {
            let value = self
                .counters
                .get(&(request.id.clone(), name.clone()))
                .copied()
                .unwrap_or(0);
            values.insert(name.clone(), value);
        }
        Ok(values)
    }
}

/// Stored properties as a reader sees them: verify secrets never leave,
/// secure values are masked unless decryption was asked for.
fn present(properties: &PropertySet, selection: &PropertySelection, decrypt: bool) -> Option<PropertySet> {
    if *selection == PropertySelection::None {
        return None;
    }
    let mut visible: PropertySet = properties
        .iter()
        .filter_map(|(path, value)| match value {
            Value::Verify(_) => None,
            Value::Secure { masked, .. } if !decrypt => Some((
                path.clone(),
                Value::Secure {
                    plain: None,
                    masked: masked.clone(),
                },
            )),
            other => Some((path.clone(), other.clone())),
        })
        .collect();
    if let PropertySelection::Only(paths) = selection {
        visible.retain_selected(paths);
    }
    Some(visible)
}

/// A masked secure value carries no plaintext and leaves the stored one alone.
fn merge(target: &mut PropertySet, incoming: PropertySet) {
    for (path, value) in incoming {
        if let Value::Secure { plain: None, .. } = value {
            continue;
        }
        target.insert(path, value);
    }
}

/// Applies a document change and returns the revision it touched.
fn apply_document(entity: &mut StoredEntity, op: DocumentOp, next_revision: &mut u64) -> Result<String> {
    match op {
        DocumentOp::Write {
            content_type,
            data,
            meta,
        } => {
            *next_revision += 1;
            let revision = format!("rev-{:06}", next_revision);
            let document = Document {
                revision: revision.clone(),
                content_type,
                data,
                meta,
            };
            entity.revisions.push((document, Timestamp::now()));
            Ok(revision)
        }
        DocumentOp::AddMeta { revision, meta } => {
            entity.revision_mut(&revision)?.meta.extend(meta);
            Ok(revision)
        }
        DocumentOp::RemoveMeta { revision, keys } => {
            let document = entity.revision_mut(&revision)?;
            for key in &keys {
                document.meta.remove(key);
            }
            Ok(revision)
        }
    }
}

fn apply_delta(properties: &mut PropertySet, delta: &Delta) {
    match delta {
        Delta::Strings { path, add, remove } => {
            let mut items = match properties.get(path) {
                Some(Value::StringArray(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.retain(|i| !remove.contains(i));
            for item in add {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
            properties.insert(path.clone(), Value::StringArray(items));
        }
        Delta::Ints { path, add, remove } => {
            let mut items = match properties.get(path) {
                Some(Value::IntArray(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.retain(|i| !remove.contains(i));
            for item in add {
                if !items.contains(item) {
                    items.push(*item);
                }
            }
            properties.insert(path.clone(), Value::IntArray(items));
        }
        Delta::Keyed { path, upsert, remove } => {
            let mut entries = match properties.get(path) {
                Some(Value::KeyMixed(entries)) => entries.clone(),
                _ => BTreeMap::new(),
            };
            for key in remove {
                entries.remove(key);
            }
            entries.extend(upsert.iter().map(|(k, v)| (k.clone(), v.clone())));
            properties.insert(path.clone(), Value::KeyMixed(entries));
        }
    }
}

fn check_pii(definition: &TypeDefinition, request: &MutateRequest) -> Result<()> {
    let touches_pii = request
        .properties
        .paths()
        .any(|path| definition.property(path).is_some_and(|p| p.flags.pii));
    if touches_pii && request.pii.is_none() {
        return Err(StoreError::PiiGate(format!(
            "writing PII of '{}' needs a token or reference",
            definition.key
        )));
    }
    Ok(())
}

fn check_expectations(stored: Option<&StoredEntity>, expectations: &[Expectation]) -> Result<()> {
    for expectation in expectations {
        let holds = match expectation {
            Expectation::Exists => stored.is_some(),
            Expectation::Absent => stored.is_none(),
            Expectation::PropertyEquals { path, value } => {
                stored.is_some_and(|e| e.properties.get(path) == Some(value))
            }
        };
        if !holds {
            return Err(StoreError::conflict(format!("expectation {:?} does not hold", expectation)));
        }
    }
    Ok(())
}

/// Primary properties never change; immutable types take state changes only.
fn check_update(definition: &TypeDefinition, stored: &StoredEntity, request: &MutateRequest) -> Result<()> {
    let changed = |path: &str, value: &Value| stored.properties.get(path) != Some(value);

    for path in definition.primary_paths() {
        if request.properties.get(path).is_some_and(|value| changed(path, value)) {
            return Err(StoreError::ImmutabilityViolation(format!(
                "{} on primary property '{}'",
                IMMUTABLE_UPDATE_MESSAGE, path
            )));
        }
    }

    if definition.options.immutable {
        let touched = request
            .properties
            .iter()
            .find(|(path, value)| changed(path, value))
            .map(|(path, _)| path.as_str())
            .or_else(|| request.deltas.first().map(Delta::path));
        if let Some(path) = touched {
            return Err(StoreError::ImmutabilityViolation(format!(
                "{} on '{}' of immutable type '{}'",
                IMMUTABLE_UPDATE_MESSAGE, path, definition.key
            )));
        }
    }
    Ok(())
}

fn satisfies(entity: &StoredEntity, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Equals { path, value } => entity.properties.get(path) == Some(value),
        Predicate::In { path, values } => entity.properties.get(path).is_some_and(|v| values.contains(v)),
        Predicate::GreaterThan { path, value } => {
            entity.properties.get(path).and_then(|v| compare(v, value)) == Some(Ordering::Greater)
        }
        Predicate::ChildOf(parent) => entity.parent.as_ref() == Some(parent),
        Predicate::RelatedToSibling { key, target } => entity
            .relationships
            .iter()
            .any(|r| r.key == *key && r.target == *target),
        Predicate::LabelMatch(label) => entity.labels.contains(label),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}
