use tracing::{debug, warn};

use crate::connection::Tenant;
use crate::core::{EntityState, Result, StoreError};
use crate::marshal::{DocumentOp, Entity, UploadRequest, UploadTarget, encode_entity};
use crate::transport::proto::{ConflictPolicy, Expectation, MutateRequest, MutateResult, PiiAuth};
use crate::transport::Request;

use super::Actor;

/// Object bytes sent to the pre-signed URL returned by a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub path: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MutateOptions {
    comment: String,
    selection: Vec<String>,
    expect: Vec<Expectation>,
    on_conflict: ConflictPolicy,
    state: Option<EntityState>,
    document: Option<DocumentOp>,
    uploads: Vec<Upload>,
    pii: Option<PiiAuth>,
    owner: Option<Tenant>,
}

impl MutateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Writes only the listed property paths. Nested paths update a
    /// sub-structure without touching its siblings.
    pub fn select<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    pub fn on_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    pub fn ignore_conflict(self) -> Self {
        self.on_conflict(ConflictPolicy::Ignore)
    }

    pub fn state(mut self, state: EntityState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn document(mut self, op: DocumentOp) -> Self {
        self.document = Some(op);
        self
    }

    pub fn upload(mut self, path: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.uploads.push(Upload {
            path: path.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    pub fn pii_token(mut self, token: impl Into<String>) -> Self {
        self.pii = Some(PiiAuth::Token(token.into()));
        self
    }

    pub fn pii_reference(mut self, reference: impl Into<String>) -> Self {
        self.pii = Some(PiiAuth::Reference(reference.into()));
        self
    }

    pub(crate) fn owner(mut self, owner: Tenant) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl Actor {
    /// Creates or updates `entity`. On success the assigned id is written
    /// back, pending deltas and queued writes are cleared, and any requested
    /// uploads are sent.
    pub async fn mutate<E: Entity>(&self, entity: &mut E, options: MutateOptions) -> Result<MutateResult> {
        let encoded = encode_entity(entity, &options.selection)?;
        let MutateOptions {
            comment,
            selection,
            expect,
            on_conflict,
            state,
            document,
            uploads,
            pii,
            owner,
        } = options;

        let request = MutateRequest {
            schema: encoded.schema,
            id: encoded.id,
            hashed_id: encoded.hashed_id,
            owner,
            properties: encoded.properties,
            deltas: encoded.deltas,
            parent: encoded.parent,
            input_time: encoded.input_time,
            state,
            comment,
            expect,
            on_conflict,
            pending: encoded.pending,
            document,
            uploads: uploads
                .iter()
                .map(|u| UploadRequest {
                    path: u.path.clone(),
                    content_type: u.content_type.clone(),
                    size: u.data.len() as u64,
                })
                .collect(),
            pii,
        };

        let result = self
            .call(Request::Mutate(Box::new(request)))
            .await?
            .into_mutated()?;
        debug!(schema = %E::schema_key(), id = %result.id, created = result.created, "mutated");

        let base = entity.base_mut();
        base.set_id(result.id.clone());
        if let Some(hashed_id) = &result.hashed_id {
            base.set_hashed_id(hashed_id.clone());
        }
        if let Some(state) = state {
            base.set_state(state);
        }
        base.clear_pending();
        // Unselected paths were not sent; their deltas stay pending.
        entity.mark_selected_properties_clean("", &selection);

        if !uploads.is_empty() {
            self.send_uploads(&uploads, &result.uploads).await?;
        }
        Ok(result)
    }

    /// Mutates an entity owned by another tenant using this actor's
    /// credentials. The server decides whether access is allowed.
    pub async fn remote_mutate<E: Entity>(
        &self,
        owner: Tenant,
        entity: &mut E,
        options: MutateOptions,
    ) -> Result<MutateResult> {
        self.mutate(entity, options.owner(owner)).await
    }

    async fn send_uploads(&self, uploads: &[Upload], targets: &[UploadTarget]) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.connection().config().request_timeout.unwrap_or(std::time::Duration::from_secs(60)))
            .build()?;

        for upload in uploads {
            let target = targets.iter().find(|t| t.path == upload.path).ok_or_else(|| {
                StoreError::Transport(format!("no upload target returned for '{}'", upload.path))
            })?;

            let mut request = client
                .put(&target.url)
                .header(reqwest::header::CONTENT_TYPE, upload.content_type.as_str());
            for (name, value) in &target.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = tokio::select! {
                _ = self.cancellation().cancelled() => return Err(StoreError::Cancelled),
                response = request.body(upload.data.clone()).send() => response?,
            };
            let status = response.status();
            if !status.is_success() {
                warn!(path = %upload.path, %status, "object upload rejected");
                return Err(StoreError::Transport(format!(
                    "upload of '{}' failed with status {}",
                    upload.path, status
                )));
            }
            debug!(path = %upload.path, bytes = upload.data.len(), "uploaded object");
        }
        Ok(())
    }
}
